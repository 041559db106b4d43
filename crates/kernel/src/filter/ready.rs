use std::sync::Arc;

use async_trait::async_trait;

use super::{FilterChain, InboundFilter};
use crate::context::Readiness;
use crate::fault::{FaultType, GovernanceError};
use crate::invocation::Invocation;
use crate::pipeline::FilterKey;

pub struct ReadyFilter {
    readiness: Arc<Readiness>,
}

impl ReadyFilter {
    pub fn new(readiness: Arc<Readiness>) -> Self {
        Self { readiness }
    }
}

#[async_trait]
impl InboundFilter for ReadyFilter {
    fn key(&self) -> FilterKey {
        FilterKey::Ready
    }

    async fn filter(&self, invocation: &mut Invocation, chain: FilterChain<'_>) -> Result<(), GovernanceError> {
        if !self.readiness.is_ready() {
            return Err(invocation.reject(FaultType::Unready, "instance is not ready"));
        }
        chain.filter(invocation).await
    }
}
