use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use control_plane::{
    CellRoute, CircuitBreakerConfig, HealthStore, UnitPolicy, UnitRoute, VariableMissingAction,
};
use rand::Rng;
use tracing::debug;

use crate::fault::{FaultType, GovernanceError};
use crate::function::FunctionRegistry;
use crate::invocation::Invocation;
use crate::types::Endpoint;

pub const RANDOM_BALANCER: &str = "random";
pub const ROUND_ROBIN_BALANCER: &str = "round_robin";

/// Candidate endpoints of one outbound call plus the unit and cell elected
/// for it. Every operation keeps or drops endpoints; none adds one.
#[derive(Clone, Debug, Default)]
pub struct RouteTarget {
    endpoints: Vec<Endpoint>,
    pub unit: Option<String>,
    pub cell: Option<String>,
    pub unit_route: Option<UnitRoute>,
    pub cell_route: Option<CellRoute>,
}

impl RouteTarget {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// The first remaining endpoint; after `choose` the only one.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoints.first()
    }

    /// Keeps the endpoints matching `predicate`.
    pub fn filter<P: FnMut(&Endpoint) -> bool>(&mut self, predicate: P) -> usize {
        self.endpoints.retain(predicate);
        self.endpoints.len()
    }

    /// Keeps the endpoints matching `predicate` when at least one does;
    /// otherwise leaves the list alone. Returns whether it narrowed.
    pub fn prefer<P: Fn(&Endpoint) -> bool>(&mut self, predicate: P) -> bool {
        if !self.endpoints.iter().any(&predicate) {
            return false;
        }
        self.endpoints.retain(|endpoint| predicate(endpoint));
        true
    }

    /// Narrows the list to the single endpoint `chooser` picks, or empties it.
    pub fn choose<F: FnOnce(&[Endpoint]) -> Option<usize>>(&mut self, chooser: F) {
        match chooser(&self.endpoints) {
            Some(index) if index < self.endpoints.len() => {
                let chosen = self.endpoints.swap_remove(index);
                self.endpoints.clear();
                self.endpoints.push(chosen);
            }
            _ => self.endpoints.clear(),
        }
    }
}

pub(crate) fn weighted_pick<T, F: Fn(&T) -> u32>(items: &[T], weight_fn: F) -> Option<usize> {
    if items.is_empty() {
        return None;
    }
    let total: u64 = items.iter().map(|item| u64::from(weight_fn(item).max(1))).sum();
    let mut cursor = rand::thread_rng().gen_range(0..total.max(1));
    for (index, item) in items.iter().enumerate() {
        let weight = u64::from(weight_fn(item).max(1));
        if cursor < weight {
            return Some(index);
        }
        cursor -= weight;
    }
    Some(0)
}

pub trait RouteFilter: Send + Sync {
    fn name(&self) -> &str;
    fn filter(&self, invocation: &Invocation, target: &mut RouteTarget) -> Result<(), GovernanceError>;
}

/// Outbound route filters in the order they narrow a target.
pub struct RouteChain {
    filters: Vec<Arc<dyn RouteFilter>>,
}

impl RouteChain {
    pub fn new(filters: Vec<Arc<dyn RouteFilter>>) -> Self {
        Self { filters }
    }

    pub fn standard(
        functions: Arc<FunctionRegistry>,
        health: Arc<dyn HealthStore>,
        balancers: Vec<Arc<dyn LoadBalancer>>,
    ) -> Self {
        Self::new(vec![
            Arc::new(RetryExclusionFilter),
            Arc::new(LaneRouteFilter),
            Arc::new(UnitRouteFilter::new(functions)),
            Arc::new(CellRouteFilter),
            Arc::new(CircuitBreakFilter::new(health)),
            Arc::new(LoadBalanceFilter::new(balancers)),
        ])
    }

    pub fn filters(&self) -> &[Arc<dyn RouteFilter>] {
        &self.filters
    }

    pub fn route(&self, invocation: &Invocation, target: &mut RouteTarget) -> Result<(), GovernanceError> {
        for filter in &self.filters {
            if target.is_empty() {
                break;
            }
            filter.filter(invocation, target)?;
            debug!(
                request_id = %invocation.request().request_id(),
                filter = filter.name(),
                remaining = target.len(),
                "route filter applied"
            );
        }
        if target.is_empty() {
            return Err(GovernanceError::NoEndpoint {
                service: invocation.service().service_name.clone(),
            });
        }
        Ok(())
    }
}

/// Drops endpoints this call already tried, unless that would drop them all.
pub struct RetryExclusionFilter;

impl RouteFilter for RetryExclusionFilter {
    fn name(&self) -> &str {
        "retry_exclusion"
    }

    fn filter(&self, invocation: &Invocation, target: &mut RouteTarget) -> Result<(), GovernanceError> {
        let attempts = invocation.request().attempts();
        if !attempts.is_empty() {
            target.prefer(|endpoint| !attempts.contains(&endpoint.id));
        }
        Ok(())
    }
}

/// Keeps the target lane, falling back to the default lane.
pub struct LaneRouteFilter;

impl RouteFilter for LaneRouteFilter {
    fn name(&self) -> &str {
        "lane"
    }

    fn filter(&self, invocation: &Invocation, target: &mut RouteTarget) -> Result<(), GovernanceError> {
        if !invocation.config().lane_enabled {
            return Ok(());
        }
        let lane = invocation.lane();
        if let Some(code) = lane.target_lane.as_deref() {
            if target.prefer(|endpoint| endpoint.lane.as_deref() == Some(code)) {
                return Ok(());
            }
        }
        let default_lane = lane.default_lane();
        target.filter(|endpoint| endpoint.lane.is_none() || endpoint.lane.as_deref() == default_lane);
        Ok(())
    }
}

/// Elects the unit that owns the call and keeps its endpoints.
pub struct UnitRouteFilter {
    functions: Arc<FunctionRegistry>,
}

impl UnitRouteFilter {
    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Self { functions }
    }

    fn elect(&self, invocation: &Invocation) -> Result<Option<String>, GovernanceError> {
        let live = invocation.live();
        let center = || live.center().map(|unit| unit.code.clone());
        let unit_policy = invocation.service().unit_policy;
        match (unit_policy, live.rule()) {
            (UnitPolicy::Rule, Some(rule)) => match live.variable.as_deref() {
                Some(variable) => self
                    .functions
                    .unit_route_by_variable(rule, variable)
                    .map(|route| Some(route.code.clone()))
                    .ok_or_else(|| invocation.reject(FaultType::Unit, "no unit route for variable")),
                None => match rule.variable_missing_action {
                    VariableMissingAction::Center => Ok(center()),
                    VariableMissingAction::Reject => Err(invocation.reject(FaultType::Unit, "no variable")),
                },
            },
            (UnitPolicy::Center, _) => Ok(center()),
            _ => Ok(None),
        }
    }
}

impl RouteFilter for UnitRouteFilter {
    fn name(&self) -> &str {
        "unit"
    }

    fn filter(&self, invocation: &Invocation, target: &mut RouteTarget) -> Result<(), GovernanceError> {
        let live = invocation.live();
        if !invocation.config().live_enabled || live.live_space().is_none() {
            return Ok(());
        }
        let Some(code) = self.elect(invocation)? else {
            if let Some(local) = live.local_unit.as_deref() {
                target.prefer(|endpoint| endpoint.unit.as_deref() == Some(local));
            }
            return Ok(());
        };
        let unit = live.unit(Some(code.as_str()));
        if !invocation.is_accessible(unit) {
            return Err(invocation.reject(FaultType::Unit, format!("unit {code} is not accessible")));
        }
        target.filter(|endpoint| endpoint.unit.as_deref() == Some(code.as_str()));
        target.unit_route = live
            .rule()
            .and_then(|rule| rule.unit_route(&code))
            .cloned();
        target.unit = Some(code);
        Ok(())
    }
}

/// Elects a cell inside the elected unit: the cell a variable is pinned to,
/// else the local cell, else a weighted pick among accessible cells.
pub struct CellRouteFilter;

impl CellRouteFilter {
    fn elect<'a>(invocation: &Invocation, target: &'a RouteTarget, route: &'a UnitRoute) -> Option<&'a CellRoute> {
        let live = invocation.live();
        let write = invocation.is_write();
        if let Some(pinned) = live
            .variable
            .as_deref()
            .and_then(|variable| route.cell_route_by_variable(variable))
        {
            return Some(pinned);
        }
        let local_unit = target.unit.as_deref() == live.local_unit.as_deref();
        if let Some(local) = live.local_cell.as_deref().filter(|_| local_unit) {
            if let Some(cell_route) = route
                .cell_route(local)
                .filter(|cell_route| cell_route.access_mode.accessible(write))
            {
                return Some(cell_route);
            }
        }
        let candidates: Vec<&CellRoute> = route
            .cells
            .iter()
            .filter(|cell_route| cell_route.access_mode.accessible(write))
            .filter(|cell_route| {
                target
                    .endpoints()
                    .iter()
                    .any(|endpoint| endpoint.cell.as_deref() == Some(cell_route.code.as_str()))
            })
            .collect();
        weighted_pick(&candidates, |cell_route| cell_route.weight).map(|index| candidates[index])
    }
}

impl RouteFilter for CellRouteFilter {
    fn name(&self) -> &str {
        "cell"
    }

    fn filter(&self, invocation: &Invocation, target: &mut RouteTarget) -> Result<(), GovernanceError> {
        if !invocation.config().live_enabled {
            return Ok(());
        }
        let Some(route) = target.unit_route.clone() else {
            if let Some(local) = invocation.live().local_cell.as_deref() {
                target.prefer(|endpoint| endpoint.cell.as_deref() == Some(local));
            }
            return Ok(());
        };
        let Some(cell_route) = Self::elect(invocation, target, &route).cloned() else {
            return Ok(());
        };
        target.prefer(|endpoint| endpoint.cell.as_deref() == Some(cell_route.code.as_str()));
        target.cell = Some(cell_route.code.clone());
        target.cell_route = Some(cell_route);
        Ok(())
    }
}

/// Drops endpoints whose circuit is open under any of the service's
/// circuit break policies.
pub struct CircuitBreakFilter {
    health: Arc<dyn HealthStore>,
}

impl CircuitBreakFilter {
    pub fn new(health: Arc<dyn HealthStore>) -> Self {
        Self { health }
    }
}

impl RouteFilter for CircuitBreakFilter {
    fn name(&self) -> &str {
        "circuit_break"
    }

    fn filter(&self, invocation: &Invocation, target: &mut RouteTarget) -> Result<(), GovernanceError> {
        let policy = invocation.service().policy.clone();
        for breaker in policy.circuit_breaks() {
            let config = CircuitBreakerConfig::from(breaker);
            if target.filter(|endpoint| self.health.is_available(&endpoint.id, &config)) > 0 {
                continue;
            }
            let reason = format!("circuit break {} is open", breaker.id);
            return Err(match breaker.degrade.clone() {
                Some(degrade) => invocation.degrade(FaultType::CircuitBreak, reason, degrade),
                None => invocation.reject(FaultType::CircuitBreak, reason),
            });
        }
        Ok(())
    }
}

pub trait LoadBalancer: Send + Sync {
    fn name(&self) -> &str;
    fn choose(&self, endpoints: &[Endpoint]) -> Option<usize>;
}

pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn name(&self) -> &str {
        RANDOM_BALANCER
    }

    fn choose(&self, endpoints: &[Endpoint]) -> Option<usize> {
        weighted_pick(endpoints, |endpoint| endpoint.weight)
    }
}

#[derive(Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl LoadBalancer for RoundRobinBalancer {
    fn name(&self) -> &str {
        ROUND_ROBIN_BALANCER
    }

    fn choose(&self, endpoints: &[Endpoint]) -> Option<usize> {
        if endpoints.is_empty() {
            return None;
        }
        Some(self.counter.fetch_add(1, Ordering::Relaxed) % endpoints.len())
    }
}

/// Picks the final endpoint with the service's balancer, `random` unless the
/// policy names another.
pub struct LoadBalanceFilter {
    balancers: HashMap<String, Arc<dyn LoadBalancer>>,
}

impl LoadBalanceFilter {
    pub fn new(balancers: Vec<Arc<dyn LoadBalancer>>) -> Self {
        let mut map: HashMap<String, Arc<dyn LoadBalancer>> = HashMap::new();
        map.insert(RANDOM_BALANCER.to_string(), Arc::new(RandomBalancer));
        map.insert(ROUND_ROBIN_BALANCER.to_string(), Arc::new(RoundRobinBalancer::default()));
        for balancer in balancers {
            map.insert(balancer.name().to_string(), balancer);
        }
        Self { balancers: map }
    }
}

impl RouteFilter for LoadBalanceFilter {
    fn name(&self) -> &str {
        "load_balance"
    }

    fn filter(&self, invocation: &Invocation, target: &mut RouteTarget) -> Result<(), GovernanceError> {
        let policy = invocation.service().policy.clone();
        let name = policy.load_balance.as_deref().unwrap_or(RANDOM_BALANCER);
        let balancer = self
            .balancers
            .get(name)
            .or_else(|| self.balancers.get(RANDOM_BALANCER))
            .ok_or_else(|| GovernanceError::Internal(format!("no load balancer {name}")))?;
        target.choose(|endpoints| balancer.choose(endpoints));
        Ok(())
    }
}
