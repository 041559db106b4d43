mod support;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use control_plane::{
    AuthPolicy, CircuitBreakPolicy, CircuitBreakerConfig, DegradeConfig, FailoverPolicy, GovernanceConfig,
    GovernancePolicy, Lane, LaneSpace, Location, ServicePolicy, UnitPolicy,
};
use kernel::{
    Endpoint, EndpointCaller, FaultType, GovernanceError, GovernedRequest, Invocation, RequestEnvelope, RouteTarget,
    HEADER_LANE, HEADER_SERVICE_TOKEN,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use support::{config, harness, live_policy, location, order_service, policy_with, Harness};

fn endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new("e-center", "10.0.0.1", 8080).in_unit("center", "c0"),
        Endpoint::new("e-u1c1", "10.0.1.1", 8080).in_unit("u1", "c1"),
        Endpoint::new("e-u1c2", "10.0.1.2", 8080).in_unit("u1", "c2"),
        Endpoint::new("e-u2c1", "10.0.2.1", 8080).in_unit("u2", "c1"),
    ]
}

fn live_harness(unit: &str, cell: &str, unit_policy: UnitPolicy) -> Harness {
    harness(
        config(location(unit, cell)),
        policy_with(order_service(live_policy(unit_policy, false))),
    )
}

fn outbound(h: &Harness, tenant: Option<&str>) -> Invocation {
    let inbound = h.engine.inbound_invocation(support::request(tenant));
    h.engine
        .outbound_invocation(Box::new(RequestEnvelope::new("order", "/orders", "GET")), Some(&inbound))
}

#[test]
fn rule_elects_owning_unit_and_its_cell() {
    let h = live_harness("u1", "c1", UnitPolicy::Rule);
    let invocation = outbound(&h, Some("tenant-7"));
    let target = h.engine.route(&invocation, endpoints()).expect("routed");
    assert_eq!(target.unit.as_deref(), Some("u2"));
    assert_eq!(target.cell.as_deref(), Some("c1"));
    assert_eq!(target.endpoint().map(|endpoint| endpoint.id.as_str()), Some("e-u2c1"));
    assert_eq!(target.len(), 1);
}

#[test]
fn local_cell_is_preferred_inside_local_unit() {
    let h = live_harness("u1", "c2", UnitPolicy::Rule);
    let target = h
        .engine
        .route(&outbound(&h, Some("tenant-1")), endpoints())
        .expect("routed");
    assert_eq!(target.unit.as_deref(), Some("u1"));
    assert_eq!(target.cell.as_deref(), Some("c2"));
    assert_eq!(target.endpoint().map(|endpoint| endpoint.id.as_str()), Some("e-u1c2"));
}

#[test]
fn remote_unit_cell_is_picked_among_cells_with_endpoints() {
    let h = live_harness("u2", "c1", UnitPolicy::Rule);
    let only_c2 = endpoints()
        .into_iter()
        .filter(|endpoint| endpoint.id != "e-u1c1")
        .collect();
    let target = h.engine.route(&outbound(&h, Some("tenant-1")), only_c2).expect("routed");
    assert_eq!(target.unit.as_deref(), Some("u1"));
    assert_eq!(target.cell.as_deref(), Some("c2"));
}

#[test]
fn center_policy_targets_center() {
    let h = live_harness("u1", "c1", UnitPolicy::Center);
    let target = h.engine.route(&outbound(&h, Some("tenant-1")), endpoints()).expect("routed");
    assert_eq!(target.unit.as_deref(), Some("center"));
    assert_eq!(target.endpoint().map(|endpoint| endpoint.id.as_str()), Some("e-center"));
}

#[test]
fn missing_variable_goes_to_center() {
    let h = live_harness("u1", "c1", UnitPolicy::Rule);
    let target = h.engine.route(&outbound(&h, None), endpoints()).expect("routed");
    assert_eq!(target.unit.as_deref(), Some("center"));
}

#[test]
fn unit_policy_none_prefers_local_placement() {
    let h = live_harness("u1", "c2", UnitPolicy::None);
    let target = h.engine.route(&outbound(&h, Some("tenant-7")), endpoints()).expect("routed");
    assert_eq!(target.unit, None);
    assert_eq!(target.endpoint().map(|endpoint| endpoint.id.as_str()), Some("e-u1c2"));
}

#[test]
fn elected_unit_without_endpoints_is_no_endpoint() {
    let h = live_harness("u1", "c1", UnitPolicy::Rule);
    let without_u2 = endpoints()
        .into_iter()
        .filter(|endpoint| endpoint.unit.as_deref() != Some("u2"))
        .collect();
    let err = h
        .engine
        .route(&outbound(&h, Some("tenant-7")), without_u2)
        .expect_err("no u2 endpoint");
    assert!(matches!(err, GovernanceError::NoEndpoint { ref service } if service == "order"));
    assert_eq!(err.status(), 503);
}

fn plain_harness(policy: ServicePolicy) -> Harness {
    let mut config = GovernanceConfig::default();
    config.live_enabled = false;
    harness(config, GovernancePolicy::new().with_service(order_service(policy)))
}

fn flat_endpoints(count: usize) -> Vec<Endpoint> {
    (1..=count)
        .map(|index| Endpoint::new(format!("e{index}"), "10.0.0.1", 8000 + index as u16))
        .collect()
}

fn plain_request() -> Box<RequestEnvelope> {
    Box::new(RequestEnvelope::new("order", "/orders", "GET"))
}

#[test]
fn round_robin_cycles_endpoints() {
    let h = plain_harness(ServicePolicy {
        load_balance: Some("round_robin".to_string()),
        ..Default::default()
    });
    let picks: Vec<String> = (0..4)
        .map(|_| {
            let invocation = h.engine.outbound_invocation(plain_request(), None);
            let target = h.engine.route(&invocation, flat_endpoints(3)).expect("routed");
            target.endpoint().map(|endpoint| endpoint.id.clone()).unwrap_or_default()
        })
        .collect();
    assert_eq!(picks, vec!["e1", "e2", "e3", "e1"]);
}

#[test]
fn retries_avoid_tried_endpoints_until_all_were_tried() {
    let h = plain_harness(ServicePolicy::default());
    let mut request = RequestEnvelope::new("order", "/orders", "GET");
    request.attempts = vec!["e1".to_string(), "e2".to_string()];
    let invocation = h.engine.outbound_invocation(Box::new(request), None);
    let target = h.engine.route(&invocation, flat_endpoints(3)).expect("routed");
    assert_eq!(target.endpoint().map(|endpoint| endpoint.id.as_str()), Some("e3"));

    let mut request = RequestEnvelope::new("order", "/orders", "GET");
    request.attempts = vec!["e1".to_string()];
    let invocation = h.engine.outbound_invocation(Box::new(request), None);
    let target = h.engine.route(&invocation, flat_endpoints(1)).expect("single endpoint is retried");
    assert_eq!(target.endpoint().map(|endpoint| endpoint.id.as_str()), Some("e1"));
}

fn lane_harness() -> Harness {
    let mut config = GovernanceConfig::default().with_location(Location {
        lane_space_id: Some("lanes".to_string()),
        ..Default::default()
    });
    config.live_enabled = false;
    config.lane_enabled = true;
    harness(
        config,
        GovernancePolicy::new()
            .with_service(order_service(ServicePolicy::default()))
            .with_lane_spaces(vec![LaneSpace::new(
                "lanes",
                vec![Lane::new("base", true), Lane::new("beta", false)],
                Vec::new(),
            )]),
    )
}

fn lane_endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new("beta-1", "10.0.0.1", 80).in_lane("beta"),
        Endpoint::new("plain-1", "10.0.0.2", 80),
        Endpoint::new("gray-1", "10.0.0.3", 80).in_lane("gray"),
    ]
}

#[test]
fn lane_filter_keeps_target_lane_then_default() {
    let h = lane_harness();
    let lane_route = |lane: Option<&str>, endpoints: Vec<Endpoint>| {
        let mut request = RequestEnvelope::new("order", "/orders", "GET");
        if let Some(lane) = lane {
            request = request.with_header(HEADER_LANE, lane);
        }
        let invocation = h.engine.outbound_invocation(Box::new(request), None);
        h.engine
            .route(&invocation, endpoints)
            .map(|target| target.endpoint().map(|endpoint| endpoint.id.clone()))
    };

    assert_eq!(lane_route(Some("beta"), lane_endpoints()).expect("beta").as_deref(), Some("beta-1"));
    assert_eq!(lane_route(None, lane_endpoints()).expect("default").as_deref(), Some("plain-1"));

    let beta_missing = lane_endpoints()
        .into_iter()
        .filter(|endpoint| endpoint.id != "beta-1")
        .collect();
    assert_eq!(lane_route(Some("beta"), beta_missing).expect("fallback").as_deref(), Some("plain-1"));

    let only_gray = vec![Endpoint::new("gray-1", "10.0.0.3", 80).in_lane("gray")];
    assert!(matches!(lane_route(None, only_gray), Err(GovernanceError::NoEndpoint { .. })));
}

fn breaker(degrade: Option<DegradeConfig>) -> CircuitBreakPolicy {
    let mut policy = CircuitBreakPolicy::new("cb-1");
    policy.failure_threshold = 2;
    policy.degrade = degrade;
    policy
}

fn trip(h: &Harness, policy: &CircuitBreakPolicy, endpoint: &str) {
    let config = CircuitBreakerConfig::from(policy);
    for _ in 0..policy.failure_threshold {
        h.engine.health().record_failure(endpoint, &config);
    }
}

#[test]
fn open_circuits_are_skipped() {
    let policy = breaker(None);
    let h = plain_harness(ServicePolicy {
        circuit_breaks: Some(vec![policy.clone()]),
        ..Default::default()
    });
    trip(&h, &policy, "e1");
    let invocation = h.engine.outbound_invocation(plain_request(), None);
    for _ in 0..10 {
        let target = h.engine.route(&invocation, flat_endpoints(2)).expect("routed");
        assert_eq!(target.endpoint().map(|endpoint| endpoint.id.as_str()), Some("e2"));
    }
}

#[test]
fn all_open_rejects_or_degrades() {
    let policy = breaker(None);
    let h = plain_harness(ServicePolicy {
        circuit_breaks: Some(vec![policy.clone()]),
        ..Default::default()
    });
    trip(&h, &policy, "e1");
    let invocation = h.engine.outbound_invocation(plain_request(), None);
    let err = h.engine.route(&invocation, flat_endpoints(1)).expect_err("open");
    assert_eq!(err.fault_type(), Some(FaultType::CircuitBreak));
    assert_eq!(err.fault().map(|fault| fault.reason.as_str()), Some("circuit break cb-1 is open"));
    assert_eq!(err.status(), 503);

    let degrading = breaker(Some(DegradeConfig {
        status: 200,
        content_type: Some("application/json".to_string()),
        body: "{\"items\":[]}".to_string(),
    }));
    let h = plain_harness(ServicePolicy {
        circuit_breaks: Some(vec![degrading.clone()]),
        ..Default::default()
    });
    trip(&h, &degrading, "e1");
    let invocation = h.engine.outbound_invocation(plain_request(), None);
    match h.engine.route(&invocation, flat_endpoints(1)) {
        Err(GovernanceError::Degraded { fault, config }) => {
            assert_eq!(fault.fault_type, FaultType::CircuitBreak);
            assert_eq!(config.body, "{\"items\":[]}");
        }
        other => panic!("expected degrade, got {other:?}"),
    }
}

/// Fails the first `failures` calls, then answers with the endpoint id.
struct FlakyCaller {
    failures: usize,
    retryable: bool,
    calls: AtomicUsize,
    tokens: Mutex<Vec<Option<String>>>,
}

impl FlakyCaller {
    fn new(failures: usize, retryable: bool) -> Self {
        Self {
            failures,
            retryable,
            calls: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EndpointCaller<String> for FlakyCaller {
    async fn call(&self, request: &dyn GovernedRequest, endpoint: &Endpoint) -> Result<String, GovernanceError> {
        self.tokens
            .lock()
            .push(request.header(HEADER_SERVICE_TOKEN).map(str::to_string));
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(GovernanceError::Upstream {
                endpoint: endpoint.id.clone(),
                message: "connection reset".to_string(),
                retryable: self.retryable,
            });
        }
        Ok(endpoint.id.clone())
    }
}

fn retrying(retries: u32) -> ServicePolicy {
    ServicePolicy {
        failover: Some(FailoverPolicy { retries }),
        ..Default::default()
    }
}

#[tokio::test]
async fn outbound_fails_over_to_another_endpoint() {
    let h = plain_harness(retrying(2));
    let caller = FlakyCaller::new(1, true);
    let mut invocation = h.engine.outbound_invocation(plain_request(), None);
    let routed = h
        .engine
        .outbound(&mut invocation, &flat_endpoints(3), &caller)
        .await
        .expect("second attempt succeeds");

    let attempts = invocation.request().attempts().to_vec();
    assert_eq!(attempts.len(), 2);
    assert_ne!(attempts[0], attempts[1]);
    assert_eq!(routed.endpoint.id, attempts[1]);
    assert_eq!(routed.response, attempts[1]);
}

#[tokio::test]
async fn exhausted_retries_return_last_error() {
    let h = plain_harness(retrying(1));
    let caller = FlakyCaller::new(usize::MAX, true);
    let mut invocation = h.engine.outbound_invocation(plain_request(), None);
    let err = h
        .engine
        .outbound(&mut invocation, &flat_endpoints(3), &caller)
        .await
        .expect_err("every attempt fails");
    assert!(matches!(err, GovernanceError::Upstream { retryable: true, .. }));
    assert_eq!(err.status(), 502);
    assert_eq!(caller.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn business_errors_are_not_retried() {
    let h = plain_harness(retrying(3));
    let caller = FlakyCaller::new(1, false);
    let mut invocation = h.engine.outbound_invocation(plain_request(), None);
    assert!(h
        .engine
        .outbound(&mut invocation, &flat_endpoints(3), &caller)
        .await
        .is_err());
    assert_eq!(caller.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn outbound_carries_target_credentials() {
    let h = plain_harness(ServicePolicy {
        auth: Some(AuthPolicy {
            auth_type: Some("token".to_string()),
            params: HashMap::from([("token".to_string(), "s3cret".to_string())]),
            ..Default::default()
        }),
        ..Default::default()
    });
    let caller = FlakyCaller::new(0, true);
    let mut invocation = h.engine.outbound_invocation(plain_request(), None);
    h.engine
        .outbound(&mut invocation, &flat_endpoints(1), &caller)
        .await
        .expect("called");
    assert_eq!(*caller.tokens.lock(), vec![Some("s3cret".to_string())]);
}

proptest! {
    #[test]
    fn route_target_never_grows(
        ids in proptest::collection::vec("[a-e]", 0..12),
        keep in "[a-e]",
        pick in 0usize..16,
    ) {
        let endpoints: Vec<Endpoint> = ids
            .iter()
            .enumerate()
            .map(|(index, id)| Endpoint::new(format!("{id}-{index}"), "10.0.0.1", 80).in_lane(id.clone()))
            .collect();
        let original: Vec<String> = endpoints.iter().map(|endpoint| endpoint.id.clone()).collect();
        let mut target = RouteTarget::new(endpoints);

        target.prefer(|endpoint| endpoint.lane.as_deref() == Some(keep.as_str()));
        prop_assert!(target.len() <= original.len());
        let before = target.len();
        target.filter(|endpoint| !endpoint.id.ends_with('0'));
        prop_assert!(target.len() <= before);
        let before = target.len();
        target.choose(|_| Some(pick));
        prop_assert!(target.len() <= before.min(1));
        for endpoint in target.endpoints() {
            prop_assert!(original.contains(&endpoint.id));
        }
    }
}

#[test]
fn wire_types_fill_defaults() {
    let endpoint: Endpoint =
        serde_json::from_str(r#"{"id":"e1","host":"10.0.0.1","unit":"u1"}"#).expect("endpoint json");
    assert_eq!(endpoint.weight, 100);
    assert_eq!(endpoint.port, 0);
    assert_eq!(endpoint.unit.as_deref(), Some("u1"));

    let request: RequestEnvelope =
        serde_json::from_str(r#"{"service":"order","headers":{"x-tenant":"tenant-7"}}"#).expect("request json");
    assert!(!request.request_id.is_empty());
    assert_eq!(request.header("X-Tenant"), Some("tenant-7"));
}
