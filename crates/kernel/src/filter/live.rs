use std::sync::Arc;

use async_trait::async_trait;

use super::{FilterChain, InboundFilter};
use crate::action::{CellActionType, UnitActionType};
use crate::fault::{FaultType, GovernanceError};
use crate::function::FunctionRegistry;
use crate::invocation::Invocation;
use crate::pipeline::FilterKey;
use crate::routing::{decide_cell, decide_unit, RouteState};

pub struct UnitFilter {
    functions: Arc<FunctionRegistry>,
}

impl UnitFilter {
    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Self { functions }
    }
}

#[async_trait]
impl InboundFilter for UnitFilter {
    fn key(&self) -> FilterKey {
        FilterKey::Unit
    }

    async fn filter(&self, invocation: &mut Invocation, chain: FilterChain<'_>) -> Result<(), GovernanceError> {
        let action = decide_unit(&RouteState::from_invocation(invocation), &self.functions);
        let action_type = action.action_type;
        let message = action.message().to_string();
        invocation.set_unit_action(action);
        if action_type.is_reject() {
            return Err(invocation.reject(FaultType::Unit, message));
        }
        if action_type != UnitActionType::Forward {
            invocation.failover(FaultType::Unit, message);
        }
        chain.filter(invocation).await
    }
}

/// Cell routing only applies once the call stays in this unit.
pub struct CellFilter;

#[async_trait]
impl InboundFilter for CellFilter {
    fn key(&self) -> FilterKey {
        FilterKey::Cell
    }

    async fn filter(&self, invocation: &mut Invocation, chain: FilterChain<'_>) -> Result<(), GovernanceError> {
        let forwarded = invocation
            .unit_action()
            .map_or(true, |action| action.action_type == UnitActionType::Forward);
        if forwarded {
            let action = decide_cell(&RouteState::from_invocation(invocation));
            let failover = action.action_type == CellActionType::Failover;
            let message = action.message().to_string();
            invocation.set_cell_action(action);
            if failover {
                invocation.failover(FaultType::Cell, message);
            }
        }
        chain.filter(invocation).await
    }
}

/// Ends the chain for calls an earlier filter marked for failover.
pub struct FailoverFilter;

#[async_trait]
impl InboundFilter for FailoverFilter {
    fn key(&self) -> FilterKey {
        FilterKey::Failover
    }

    async fn filter(&self, invocation: &mut Invocation, chain: FilterChain<'_>) -> Result<(), GovernanceError> {
        if let Some(fault) = invocation.failover_fault() {
            return Err(GovernanceError::Failover(fault.clone()));
        }
        chain.filter(invocation).await
    }
}
