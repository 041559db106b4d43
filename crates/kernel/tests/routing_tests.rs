mod support;

use control_plane::{
    AccessMode, Cell, CellRoute, GovernancePolicy, LiveSpace, Unit, UnitPolicy, UnitRoute, UnitRule, UnitType,
    VariableMissingAction,
};
use kernel::{
    decide_cell, decide_unit, CellActionType, FaultType, FunctionRegistry, GovernanceError, RequestEnvelope,
    RouteState, UnitActionType, HEADER_LIVE_FAILOVER, HEADER_LIVE_FAILOVER_HOPS, HEADER_LIVE_SPACE_ID,
};
use proptest::prelude::*;
use support::{config, harness, live_policy, location, order_service, policy_with, request, CountingInvoker};

#[tokio::test]
async fn owned_variable_on_local_unit_forwards() {
    let h = harness(
        config(location("u2", "c1")),
        policy_with(order_service(live_policy(UnitPolicy::Rule, true))),
    );
    let invoker = CountingInvoker::default();
    let mut invocation = h.engine.inbound_invocation(request(Some("tenant-7")));
    h.engine.inbound(&mut invocation, &invoker).await.expect("forwarded");

    assert_eq!(invocation.unit_action().map(|a| a.action_type), Some(UnitActionType::Forward));
    assert_eq!(invocation.cell_action().map(|a| a.action_type), Some(CellActionType::Forward));
    assert!(invocation.failover_fault().is_none());
    assert_eq!(invoker.calls(), 1);
}

#[tokio::test]
async fn variable_owned_elsewhere_escapes() {
    let h = harness(
        config(location("u1", "c1")),
        policy_with(order_service(live_policy(UnitPolicy::Rule, true))),
    );
    let invoker = CountingInvoker::default();
    let mut invocation = h.engine.inbound_invocation(request(Some("tenant-7")));
    let err = h.engine.inbound(&mut invocation, &invoker).await.expect_err("failover");

    let action = invocation.unit_action().expect("unit action");
    assert_eq!(action.action_type, UnitActionType::Failover);
    assert_eq!(action.message(), "unit escape");
    assert!(invocation.cell_action().is_none());
    assert!(matches!(err, GovernanceError::Failover(ref fault) if fault.fault_type == FaultType::Unit));
    assert_eq!(invocation.request().attribute(HEADER_LIVE_FAILOVER), Some("unit escape"));
    assert_eq!(invocation.request().attribute(HEADER_LIVE_FAILOVER_HOPS), Some("1"));
    assert_eq!(invoker.calls(), 0);
}

#[tokio::test]
async fn center_policy_on_normal_unit_fails_over_to_center() {
    let h = harness(
        config(location("u1", "c1")),
        policy_with(order_service(live_policy(UnitPolicy::Center, false))),
    );
    let mut invocation = h.engine.inbound_invocation(request(None));
    let err = h
        .engine
        .inbound(&mut invocation, &CountingInvoker::default())
        .await
        .expect_err("failover");
    assert_eq!(
        invocation.unit_action().map(|a| a.action_type),
        Some(UnitActionType::FailoverCenter)
    );
    assert_eq!(err.status(), 503);
}

#[tokio::test]
async fn missing_service_policy_rejects_without_rule() {
    let policy = GovernancePolicy::new().with_live_spaces(vec![support::live_space()]);
    let h = harness(config(location("u1", "c1")), policy);
    let invoker = CountingInvoker::default();
    let mut invocation = h.engine.inbound_invocation(request(Some("tenant-7")));
    let err = h.engine.inbound(&mut invocation, &invoker).await.expect_err("reject");

    let action = invocation.unit_action().expect("unit action");
    assert_eq!(action.action_type, UnitActionType::Reject);
    assert_eq!(action.message(), "no unit route");
    let fault = err.fault().expect("fault");
    assert_eq!(fault.fault_type, FaultType::Unit);
    assert_eq!(fault.reason, "no unit route");
    assert_eq!(fault.context.service.as_deref(), Some("order"));
    assert_eq!(fault.context.live_space_id.as_deref(), Some(support::SPACE));
    assert_eq!(invoker.calls(), 0);
}

#[tokio::test]
async fn exhausted_failover_hops_reject_as_escaped() {
    let h = harness(
        config(location("u1", "c1")),
        policy_with(order_service(live_policy(UnitPolicy::Rule, true))),
    );
    let request = RequestEnvelope::new("order", "/orders", "POST")
        .with_header(support::TENANT_HEADER, "tenant-7")
        .with_header(HEADER_LIVE_FAILOVER_HOPS, "1");
    let mut invocation = h.engine.inbound_invocation(Box::new(request));
    let err = h
        .engine
        .inbound(&mut invocation, &CountingInvoker::default())
        .await
        .expect_err("reject");
    assert_eq!(
        invocation.unit_action().map(|a| a.action_type),
        Some(UnitActionType::RejectEscaped)
    );
    assert!(matches!(err, GovernanceError::Rejected(_)));
}

#[tokio::test]
async fn foreign_live_space_is_rejected() {
    let h = harness(
        config(location("u2", "c1")),
        policy_with(order_service(live_policy(UnitPolicy::Rule, false))),
    );
    let request = RequestEnvelope::new("order", "/orders", "GET").with_header(HEADER_LIVE_SPACE_ID, "space-2");
    let mut invocation = h.engine.inbound_invocation(Box::new(request));
    let err = h
        .engine
        .inbound(&mut invocation, &CountingInvoker::default())
        .await
        .expect_err("reject");
    assert_eq!(err.fault().map(|fault| fault.reason.as_str()), Some("namespace not matched"));
}

#[tokio::test]
async fn missing_variable_goes_to_center() {
    let h = harness(
        config(location("u1", "c1")),
        policy_with(order_service(live_policy(UnitPolicy::Rule, false))),
    );
    let mut invocation = h.engine.inbound_invocation(request(None));
    h.engine
        .inbound(&mut invocation, &CountingInvoker::default())
        .await
        .expect_err("failover");
    assert_eq!(
        invocation.unit_action().map(|a| a.action_type),
        Some(UnitActionType::FailoverCenter)
    );

    let at_center = harness(
        config(location("center", "c0")),
        policy_with(order_service(live_policy(UnitPolicy::Rule, false))),
    );
    let mut invocation = at_center.engine.inbound_invocation(request(None));
    at_center
        .engine
        .inbound(&mut invocation, &CountingInvoker::default())
        .await
        .expect("forwarded at center");
}

#[tokio::test]
async fn live_disabled_always_forwards() {
    let mut config = config(location("u1", "c1"));
    config.live_enabled = false;
    let h = harness(config, policy_with(order_service(live_policy(UnitPolicy::Rule, true))));
    let invoker = CountingInvoker::default();
    let mut invocation = h.engine.inbound_invocation(request(Some("tenant-7")));
    h.engine.inbound(&mut invocation, &invoker).await.expect("forwarded");
    assert_eq!(invocation.unit_action().map(|a| a.action_type), Some(UnitActionType::Forward));
    assert_eq!(invoker.calls(), 1);
}

fn cell_space(cell_mode: AccessMode, route_mode: AccessMode) -> LiveSpace {
    LiveSpace::new(
        "space-1",
        vec![Unit::new("u1", UnitType::Normal, AccessMode::ReadWrite).with_cells(vec![
            Cell::new("c1", cell_mode),
            Cell::new("c2", AccessMode::ReadWrite),
        ])],
        vec![UnitRule::new(
            "rule-1",
            vec![UnitRoute::new("u1").with_range(0, 9999).with_cells(vec![
                CellRoute::new("c1", route_mode),
                CellRoute::new("c2", AccessMode::ReadWrite).allow("vip"),
            ])],
        )],
    )
}

fn cell_state<'a>(space: &'a LiveSpace, write: bool, variable: Option<&'a str>) -> RouteState<'a> {
    let unit = space.unit("u1");
    RouteState {
        gateway: false,
        live_enabled: true,
        write,
        unit_policy: UnitPolicy::Rule,
        local_space_id: Some("space-1"),
        target_space_id: Some("space-1"),
        space: Some(space),
        rule: space.unit_rule("rule-1"),
        variable,
        unit,
        cell: unit.and_then(|unit| unit.cell("c1")),
        failover_hops: 0,
        max_failover_hops: 1,
    }
}

#[test]
fn cell_decisions_follow_access_modes() {
    let open = cell_space(AccessMode::ReadWrite, AccessMode::ReadWrite);
    assert_eq!(decide_cell(&cell_state(&open, true, Some("42"))).action_type, CellActionType::Forward);

    let read_only = cell_space(AccessMode::Read, AccessMode::ReadWrite);
    assert_eq!(decide_cell(&cell_state(&read_only, false, Some("42"))).action_type, CellActionType::Forward);
    let action = decide_cell(&cell_state(&read_only, true, Some("42")));
    assert_eq!(action.action_type, CellActionType::Failover);
    assert_eq!(action.message(), "cell not accessible");

    let closed_route = cell_space(AccessMode::ReadWrite, AccessMode::None);
    assert_eq!(
        decide_cell(&cell_state(&closed_route, false, Some("42"))).action_type,
        CellActionType::Failover
    );
}

#[test]
fn pinned_variable_in_other_cell_escapes() {
    let space = cell_space(AccessMode::ReadWrite, AccessMode::ReadWrite);
    let action = decide_cell(&cell_state(&space, false, Some("vip")));
    assert_eq!(action.action_type, CellActionType::Failover);
    assert_eq!(action.message(), "cell escape");
}

#[test]
fn reject_variable_missing_action() {
    let mut space = cell_space(AccessMode::ReadWrite, AccessMode::ReadWrite);
    space.unit_rules = vec![UnitRule::new("rule-1", vec![UnitRoute::new("u1").with_range(0, 9999)])
        .with_missing_action(VariableMissingAction::Reject)];
    let action = decide_unit(&cell_state(&space, false, None), &FunctionRegistry::new());
    assert_eq!(action.action_type, UnitActionType::Reject);
    assert_eq!(action.message(), "no variable");
}

#[test]
fn prefer_local_unit_falls_back_to_center() {
    let space_with = |local: AccessMode, center: AccessMode| {
        LiveSpace::new(
            "space-1",
            vec![
                Unit::new("local", UnitType::Normal, local),
                Unit::new("center", UnitType::Center, center),
            ],
            vec![UnitRule::new(
                "rule-1",
                vec![UnitRoute::new("local").with_range(0, 4999), UnitRoute::new("center").with_range(5000, 9999)],
            )],
        )
    };
    let decide = |local, center, write| {
        let space = space_with(local, center);
        decide_unit(&state(&space, UnitPolicy::PreferLocalUnit, write, None), &FunctionRegistry::new()).action_type
    };

    assert_eq!(decide(AccessMode::ReadWrite, AccessMode::ReadWrite, true), UnitActionType::Forward);
    assert_eq!(decide(AccessMode::None, AccessMode::ReadWrite, false), UnitActionType::FailoverCenter);
    assert_eq!(decide(AccessMode::None, AccessMode::None, false), UnitActionType::Failover);
    assert_eq!(decide(AccessMode::Read, AccessMode::ReadWrite, true), UnitActionType::FailoverCenter);
    assert_eq!(decide(AccessMode::Read, AccessMode::ReadWrite, false), UnitActionType::Forward);
}

fn access_mode() -> impl Strategy<Value = AccessMode> {
    prop_oneof![Just(AccessMode::ReadWrite), Just(AccessMode::Read), Just(AccessMode::None)]
}

fn unit_type() -> impl Strategy<Value = UnitType> {
    prop_oneof![Just(UnitType::Center), Just(UnitType::Normal)]
}

fn unit_policy() -> impl Strategy<Value = UnitPolicy> {
    prop_oneof![
        Just(UnitPolicy::None),
        Just(UnitPolicy::Center),
        Just(UnitPolicy::PreferLocalUnit),
        Just(UnitPolicy::Rule),
    ]
}

fn variable() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some("mine".to_string())),
        Just(Some("theirs".to_string())),
        "[0-9]{1,6}".prop_map(Some),
    ]
}

/// `local` is the unit under test; `other` owns everything pinned to "theirs".
fn state_space(mode: AccessMode, kind: UnitType) -> LiveSpace {
    LiveSpace::new(
        "space-1",
        vec![
            Unit::new("local", kind, mode).with_cells(vec![Cell::new("c1", mode)]),
            Unit::new("other", UnitType::Normal, AccessMode::ReadWrite),
        ],
        vec![UnitRule::new(
            "rule-1",
            vec![
                UnitRoute::new("local")
                    .with_range(0, 9999)
                    .allow("mine")
                    .with_cells(vec![CellRoute::new("c1", mode)]),
                UnitRoute::new("other").allow("theirs"),
            ],
        )],
    )
}

fn state<'a>(space: &'a LiveSpace, policy: UnitPolicy, write: bool, variable: Option<&'a str>) -> RouteState<'a> {
    let unit = space.unit("local");
    RouteState {
        gateway: false,
        live_enabled: true,
        write,
        unit_policy: policy,
        local_space_id: Some("space-1"),
        target_space_id: Some("space-1"),
        space: Some(space),
        rule: space.unit_rule("rule-1"),
        variable,
        unit,
        cell: unit.and_then(|unit| unit.cell("c1")),
        failover_hops: 0,
        max_failover_hops: 1,
    }
}

proptest! {
    #[test]
    fn none_policy_forwards_only_accessible_units(mode in access_mode(), kind in unit_type(), write in any::<bool>()) {
        let space = state_space(mode, kind);
        let action = decide_unit(&state(&space, UnitPolicy::None, write, None), &FunctionRegistry::new());
        let expected = if mode.accessible(write) { UnitActionType::Forward } else { UnitActionType::Failover };
        prop_assert_eq!(action.action_type, expected);
    }

    #[test]
    fn center_policy_forwards_only_on_center(mode in access_mode(), kind in unit_type(), write in any::<bool>()) {
        let space = state_space(mode, kind);
        let action = decide_unit(&state(&space, UnitPolicy::Center, write, None), &FunctionRegistry::new());
        if action.action_type == UnitActionType::Forward {
            prop_assert_eq!(kind, UnitType::Center);
        }
        if kind == UnitType::Normal {
            prop_assert_eq!(action.action_type, UnitActionType::FailoverCenter);
        }
    }

    #[test]
    fn foreign_variable_always_escapes(mode in access_mode(), kind in unit_type(), write in any::<bool>()) {
        let space = state_space(mode, kind);
        let action = decide_unit(&state(&space, UnitPolicy::Rule, write, Some("theirs")), &FunctionRegistry::new());
        prop_assert_eq!(action.action_type, UnitActionType::Failover);
        prop_assert_eq!(action.message(), "unit escape");
    }

    #[test]
    fn routing_decisions_are_idempotent(
        mode in access_mode(),
        kind in unit_type(),
        policy in unit_policy(),
        write in any::<bool>(),
        variable in variable(),
    ) {
        let space = state_space(mode, kind);
        let functions = FunctionRegistry::new();
        let state = state(&space, policy, write, variable.as_deref());
        prop_assert_eq!(decide_unit(&state, &functions), decide_unit(&state, &functions));
        prop_assert_eq!(decide_cell(&state), decide_cell(&state));
    }
}
