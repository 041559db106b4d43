use std::sync::Arc;

use control_plane::{
    AccessMode, CellRoute, DbCluster, GovernancePolicy, LiveDomain, LivePath, LiveSpace, Place,
    RateLimitPolicy, Service, ServiceGroup, ServiceLivePolicy, ServiceMethod, ServicePath,
    ServicePolicy, ServiceType, Unit, UnitPolicy, UnitRoute, UnitRule, UnitType,
};
use proptest::prelude::*;

fn live_space() -> LiveSpace {
    LiveSpace::new(
        "space-1",
        vec![
            Unit::new("center", UnitType::Center, AccessMode::ReadWrite),
            Unit::new("u1", UnitType::Normal, AccessMode::Read),
        ],
        vec![UnitRule::new(
            "rule-1",
            vec![UnitRoute::new("center").with_range(0, 4999), UnitRoute::new("u1").with_range(5000, 9999)],
        )],
    )
    .with_domains(vec![LiveDomain {
        host: "Shop.Example.com".to_string(),
        paths: vec![
            LivePath {
                path: "/".to_string(),
                rule_id: Some("rule-1".to_string()),
            },
            LivePath {
                path: "/orders".to_string(),
                rule_id: Some("rule-orders".to_string()),
            },
        ],
    }])
}

fn order_service() -> Service {
    let service_policy = ServicePolicy {
        live: Some(ServiceLivePolicy {
            unit_policy: Some(UnitPolicy::Center),
            write_protect: None,
            unit_rule_id: Some("rule-1".to_string()),
        }),
        rate_limits: Some(vec![RateLimitPolicy::new("rl-1", 10, 1000)]),
        ..Default::default()
    };
    let group_policy = ServicePolicy {
        live: Some(ServiceLivePolicy {
            write_protect: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };
    Service::new("order", ServiceType::Http, Some(service_policy)).with_groups(vec![ServiceGroup::new(
        "default",
        Some(group_policy),
    )
    .with_paths(vec![
        ServicePath::new("/orders", None),
        ServicePath::new("/orders/detail", Some(ServicePolicy::with_live(UnitPolicy::PreferLocalUnit, false)))
            .with_methods(vec![ServiceMethod::new("GET", None)]),
    ])])
}

#[test]
fn policy_lookups_use_index() {
    let policy = GovernancePolicy::new()
        .with_live_spaces(vec![live_space()])
        .with_service(order_service())
        .with_db_clusters(vec![DbCluster {
            name: "orders-db".to_string(),
            addresses: vec!["db1.local:3306".to_string()],
            live_space_id: Some("space-1".to_string()),
            unit: Some("u1".to_string()),
            access_mode: AccessMode::Read,
        }]);

    let space = policy.live_space("space-1").expect("space");
    assert_eq!(space.center().map(|unit| unit.code.as_str()), Some("center"));
    assert!(space.unit_rule("rule-1").is_some());
    assert!(policy.live_space("missing").is_none());
    assert!(policy.service("order").is_some());

    let (space, domain) = policy.domain("shop.example.com").expect("domain");
    assert_eq!(space.id, "space-1");
    assert_eq!(domain.path("/orders/7").and_then(|path| path.rule_id.as_deref()), Some("rule-orders"));
    assert_eq!(domain.path("/cart").and_then(|path| path.rule_id.as_deref()), Some("rule-1"));
    assert_eq!(domain.path("/ordersx").and_then(|path| path.rule_id.as_deref()), Some("rule-1"));

    let cluster = policy.db_cluster_by_address("DB1.local", 3306).expect("cluster");
    assert_eq!(cluster.name, "orders-db");
    assert!(cluster.accessible(false));
    assert!(!cluster.accessible(true));
    assert!(policy.db_cluster("orders-db").is_some());
}

#[test]
fn http_paths_fall_back_to_longest_prefix() {
    let service = order_service();
    let group = service.group(None).expect("group");
    assert_eq!(
        group.path("/orders/detail/7", ServiceType::Http).map(|path| path.path.as_str()),
        Some("/orders/detail")
    );
    assert_eq!(group.path("/orders", ServiceType::Http).map(|path| path.path.as_str()), Some("/orders"));
    assert!(group.path("/orders/detail/7", ServiceType::Rpc).is_none());
    assert!(group.path("/cart", ServiceType::Http).is_none());
}

#[test]
fn effective_policy_inherits_field_by_field() {
    let service = order_service();
    let root = service.effective_policy();
    let group = service.group(Some("default")).expect("group");
    let group_policy = group.effective_policy(&root);
    assert_eq!(group_policy.unit_policy(), UnitPolicy::Center);
    assert!(group_policy.write_protect());
    assert_eq!(group_policy.unit_rule_id(), Some("rule-1"));
    assert_eq!(group_policy.rate_limits().len(), 1);

    let detail = group.path("/orders/detail", ServiceType::Http).expect("path");
    let detail_policy = detail.effective_policy(&group_policy);
    assert_eq!(detail_policy.unit_policy(), UnitPolicy::PreferLocalUnit);
    assert!(!detail_policy.write_protect());
    assert_eq!(detail_policy.unit_rule_id(), Some("rule-1"));

    let method = detail.method("get").expect("method");
    let method_policy = method.effective_policy(&detail_policy);
    assert_eq!(method_policy.unit_policy(), UnitPolicy::PreferLocalUnit);
    assert_eq!(method_policy.rate_limits().len(), 1);
}

#[test]
fn effective_policy_is_built_once_per_node() {
    let service = order_service();
    let root = service.effective_policy();
    assert!(Arc::ptr_eq(&root, &service.effective_policy()));
    let group = service.group(None).expect("group");
    assert!(Arc::ptr_eq(&group.effective_policy(&root), &group.effective_policy(&root)));
}

#[test]
fn builders_copy_on_write_and_bump_version() {
    let base = GovernancePolicy::new().with_service(order_service());
    let next = base.without_service("order");
    assert_eq!(next.version, base.version + 1);
    assert!(base.service("order").is_some());
    assert!(next.service("order").is_none());

    let replaced = base.with_service(Service::new("order", ServiceType::Rpc, None));
    assert_eq!(replaced.services.len(), 1);
    assert_eq!(replaced.service("order").map(|service| service.service_type), Some(ServiceType::Rpc));
}

fn owned_service(path: &str) -> Service {
    Service::new("order", ServiceType::Http, None)
        .with_groups(vec![ServiceGroup::new("default", None).with_paths(vec![ServicePath::new(path, None)])])
}

fn paths(policy: &GovernancePolicy) -> Vec<String> {
    policy
        .service("order")
        .and_then(|service| service.group(None))
        .map(|group| group.paths.iter().map(|path| path.path.clone()).collect())
        .unwrap_or_default()
}

#[test]
fn owner_merge_keeps_other_owners_parts() {
    let policy = GovernancePolicy::new()
        .with_owned_service(owned_service("/a"), "app-a")
        .with_owned_service(owned_service("/b"), "app-b");
    assert_eq!(paths(&policy), vec!["/a".to_string(), "/b".to_string()]);
    let service = policy.service("order").expect("service");
    assert_eq!(service.owners.len(), 2);

    let republished = policy.with_owned_service(owned_service("/c"), "app-a");
    assert_eq!(paths(&republished), vec!["/b".to_string(), "/c".to_string()]);

    let without_b = republished.without_owner("app-b");
    assert_eq!(paths(&without_b), vec!["/c".to_string()]);

    let empty = without_b.without_owner("app-a");
    assert!(empty.service("order").is_none());
}

#[test]
fn policy_document_parses_from_json() {
    let input = r#"{
        "version": 3,
        "live_spaces": [{
            "id": "space-1",
            "units": [{ "code": "u1", "unit_type": "CENTER", "cells": [{ "code": "c1" }] }],
            "unit_rules": [{ "id": "rule-1", "units": [{ "code": "u1", "ranges": [{ "from": 0, "to": 9999 }] }] }]
        }],
        "services": [{
            "name": "order",
            "policy": { "live": { "unit_policy": "RULE", "unit_rule_id": "rule-1" } }
        }]
    }"#;
    let policy = GovernancePolicy::from_json(input).expect("policy");
    assert_eq!(policy.version, 3);
    let space = policy.live_space("space-1").expect("space");
    let unit = space.unit("u1").expect("unit");
    assert!(unit.is_center());
    assert_eq!(unit.access_mode, AccessMode::ReadWrite);
    let rule = space.unit_rule("rule-1").expect("rule");
    assert_eq!(rule.modulo, 10_000);
    assert_eq!(rule.variable_function, "hash_mod");
    assert!(rule.unit_route("u1").is_some());
    let service = policy.service("order").expect("service");
    assert_eq!(service.effective_policy().unit_policy(), UnitPolicy::Rule);
}

#[test]
fn routes_pin_by_allow_or_prefix() {
    let mut cell = CellRoute::new("c1", AccessMode::ReadWrite).allow("tenant-7");
    cell.prefixes = vec!["vip-".to_string(), String::new()];
    let mut unit = UnitRoute::new("u1").allow("tenant-7").with_cells(vec![cell.clone()]);
    unit.prefixes = cell.prefixes.clone();

    for variable in ["tenant-7", "vip-42"] {
        assert!(cell.pins(variable));
        assert!(unit.pins(variable));
    }
    assert!(!cell.pins("tenant-8"));
    assert!(!unit.pins("tenant-8"));
    assert_eq!(unit.cell_route_by_variable("vip-1").map(|route| route.code.as_str()), Some("c1"));
    assert!(unit.cell_route_by_variable("guest").is_none());
}

fn access_mode() -> impl Strategy<Value = AccessMode> {
    prop_oneof![Just(AccessMode::ReadWrite), Just(AccessMode::Read), Just(AccessMode::None)]
}

proptest! {
    #[test]
    fn writes_need_writeable_places(mode in access_mode(), write in any::<bool>()) {
        let unit = Unit::new("u1", UnitType::Normal, mode);
        let expected = if write { mode.writeable() } else { mode.readable() };
        prop_assert_eq!(unit.accessible(write), expected);
        if unit.accessible(true) {
            prop_assert!(unit.accessible(false));
        }
    }
}
