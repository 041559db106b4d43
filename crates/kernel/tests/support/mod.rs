#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use control_plane::{
    AccessMode, Cell, CellRoute, GovernanceConfig, GovernancePolicy, InMemoryEventSink, InMemoryPolicySupervisor,
    LiveSpace, LoadError, LoadMetric, LoadMetricSource, Location, Service, ServiceLivePolicy, ServicePolicy,
    ServiceType, Unit, UnitPolicy, UnitRoute, UnitRule, UnitType, VariableSource,
};
use kernel::{GovernanceEngine, GovernanceError, Invocation, Invoker, RequestEnvelope};

pub const SPACE: &str = "space-1";
pub const RULE: &str = "rule-1";
pub const TENANT_HEADER: &str = "x-tenant";

/// center (RW, cell c0), u1 (RW, cells c1/c2), u2 (RW, cell c1).
/// tenant-7 is pinned to u2, tenant-1 to u1, everything else hashes over u1's range.
pub fn live_space() -> LiveSpace {
    LiveSpace::new(
        SPACE,
        vec![
            Unit::new("center", UnitType::Center, AccessMode::ReadWrite)
                .with_cells(vec![Cell::new("c0", AccessMode::ReadWrite)]),
            Unit::new("u1", UnitType::Normal, AccessMode::ReadWrite).with_cells(vec![
                Cell::new("c1", AccessMode::ReadWrite),
                Cell::new("c2", AccessMode::ReadWrite),
            ]),
            Unit::new("u2", UnitType::Normal, AccessMode::ReadWrite)
                .with_cells(vec![Cell::new("c1", AccessMode::ReadWrite)]),
        ],
        vec![UnitRule::new(
            RULE,
            vec![
                UnitRoute::new("center").with_cells(vec![CellRoute::new("c0", AccessMode::ReadWrite)]),
                UnitRoute::new("u1").with_range(0, 9999).allow("tenant-1").with_cells(vec![
                    CellRoute::new("c1", AccessMode::ReadWrite),
                    CellRoute::new("c2", AccessMode::ReadWrite),
                ]),
                UnitRoute::new("u2")
                    .allow("tenant-7")
                    .with_cells(vec![CellRoute::new("c1", AccessMode::ReadWrite)]),
            ],
        )
        .with_variable_source(VariableSource::header(TENANT_HEADER))],
    )
}

pub fn live_policy(unit_policy: UnitPolicy, write: bool) -> ServicePolicy {
    ServicePolicy {
        live: Some(ServiceLivePolicy {
            unit_policy: Some(unit_policy),
            write_protect: Some(write),
            unit_rule_id: Some(RULE.to_string()),
        }),
        ..Default::default()
    }
}

pub fn policy_with(service: Service) -> GovernancePolicy {
    GovernancePolicy::new()
        .with_live_spaces(vec![live_space()])
        .with_service(service)
}

pub fn order_service(policy: ServicePolicy) -> Service {
    Service::new("order", ServiceType::Http, Some(policy))
}

pub fn location(unit: &str, cell: &str) -> Location {
    Location {
        live_space_id: Some(SPACE.to_string()),
        unit: Some(unit.to_string()),
        cell: Some(cell.to_string()),
        ..Default::default()
    }
}

pub fn config(location: Location) -> GovernanceConfig {
    GovernanceConfig::default().with_location(location)
}

pub struct FixedLoad(pub f64);

impl LoadMetricSource for FixedLoad {
    fn sample(&self) -> Result<LoadMetric, LoadError> {
        Ok(LoadMetric {
            cpu_usage: self.0,
            load_average: 0.0,
        })
    }
}

pub struct Harness {
    pub engine: GovernanceEngine,
    pub events: Arc<InMemoryEventSink>,
    pub supervisor: Arc<InMemoryPolicySupervisor>,
}

pub fn harness(config: GovernanceConfig, policy: GovernancePolicy) -> Harness {
    let events = InMemoryEventSink::shared();
    let supervisor = Arc::new(InMemoryPolicySupervisor::new(Vec::new()).with_policy(policy));
    let engine = GovernanceEngine::builder(config, supervisor.clone())
        .with_events(events.clone())
        .with_load_source(Arc::new(FixedLoad(10.0)))
        .build();
    engine.set_ready(true);
    Harness {
        engine,
        events,
        supervisor,
    }
}

pub fn request(tenant: Option<&str>) -> Box<RequestEnvelope> {
    let request = RequestEnvelope::new("order", "/orders", "POST");
    Box::new(match tenant {
        Some(tenant) => request.with_header(TENANT_HEADER, tenant),
        None => request,
    })
}

/// Terminal invoker counting how often the business call ran.
#[derive(Default)]
pub struct CountingInvoker {
    calls: AtomicUsize,
}

impl CountingInvoker {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Invoker for CountingInvoker {
    async fn invoke(&self, _invocation: &mut Invocation) -> Result<(), GovernanceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
