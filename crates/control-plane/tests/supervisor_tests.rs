use std::sync::Arc;
use std::time::Duration;

use control_plane::{
    ChannelEventSink, GovernanceEvent, GovernancePolicy, InMemoryEventSink, InMemoryPolicySupervisor,
    PolicySupervisor, ReadinessError, Service, ServiceType, SubscriptionStatus,
};

#[test]
fn stale_snapshot_update_is_refused() {
    let supervisor = InMemoryPolicySupervisor::new(Vec::new());
    let stale = supervisor.policy();
    assert!(supervisor.update(&stale, stale.with_service(Service::new("a", ServiceType::Http, None))));

    let current = supervisor.policy();
    assert!(!Arc::ptr_eq(&stale, &current));
    assert!(!supervisor.update(&stale, stale.with_service(Service::new("b", ServiceType::Http, None))));
    assert!(supervisor.policy().service("a").is_some());
    assert!(supervisor.policy().service("b").is_none());
}

#[test]
fn publish_applies_change_to_current_snapshot() {
    let supervisor = InMemoryPolicySupervisor::new(Vec::new())
        .with_policy(GovernancePolicy::new().with_service(Service::new("a", ServiceType::Http, None)));
    let before = supervisor.policy().version;
    let published = supervisor.publish(|policy| policy.with_service(Service::new("b", ServiceType::Rpc, None)));
    assert_eq!(published.version, before + 1);
    assert!(published.service("a").is_some());
    assert!(published.service("b").is_some());
}

#[test]
fn readers_keep_their_snapshot() {
    let supervisor = InMemoryPolicySupervisor::new(Vec::new());
    let held = supervisor.policy();
    supervisor.publish(|policy| policy.with_service(Service::new("a", ServiceType::Http, None)));
    assert!(held.service("a").is_none());
    assert!(supervisor.policy().service("a").is_some());
}

#[test]
fn concurrent_publishers_all_land() {
    let supervisor = InMemoryPolicySupervisor::shared(Vec::new());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let supervisor = supervisor.clone();
            std::thread::spawn(move || {
                supervisor.publish(|policy| policy.with_service(Service::new(format!("svc-{i}"), ServiceType::Http, None)));
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("publisher thread");
    }
    let policy = supervisor.policy();
    assert_eq!(policy.services.len(), 8);
    assert_eq!(policy.version, 8);
}

#[tokio::test]
async fn subscription_is_ready_after_every_source_completes() {
    let supervisor = InMemoryPolicySupervisor::shared(vec!["registry".to_string(), "live".to_string()]);
    let subscription = supervisor.subscribe("order");
    assert_eq!(subscription.status(), SubscriptionStatus::Pending);

    supervisor.complete("order", "registry");
    assert_eq!(supervisor.subscribe("order").status(), SubscriptionStatus::Pending);

    let waiter = tokio::spawn(subscription.ready());
    supervisor.complete("order", "live");
    waiter.await.expect("join").expect("ready");
}

#[tokio::test]
async fn failed_source_fails_subscription() {
    let supervisor = InMemoryPolicySupervisor::new(vec!["registry".to_string()]);
    supervisor.fail("order", "registry", "connection refused");
    let error = supervisor.subscribe("order").ready().await.expect_err("failed");
    assert!(error.to_string().contains("connection refused"));
}

#[tokio::test]
async fn wait_ready_without_sources_is_immediate() {
    let supervisor = InMemoryPolicySupervisor::new(Vec::new());
    supervisor
        .wait_ready(&["order".to_string()], Duration::from_millis(10))
        .await
        .expect("ready");
}

#[tokio::test]
async fn wait_ready_timeout_is_reported() {
    let events = InMemoryEventSink::shared();
    let supervisor = InMemoryPolicySupervisor::new(vec!["registry".to_string()]).with_events(events.clone());
    supervisor.complete("cart", "registry");

    let error = supervisor
        .wait_ready(&["cart".to_string(), "order".to_string()], Duration::from_millis(20))
        .await
        .expect_err("timeout");
    match &error {
        ReadinessError::Timeout { services, timeout_ms } => {
            assert_eq!(services, &vec!["order".to_string()]);
            assert_eq!(*timeout_ms, 20);
        }
        other => panic!("unexpected error: {other}"),
    }
    let reported: Vec<String> = events
        .list()
        .into_iter()
        .filter_map(|event| match event {
            GovernanceEvent::Readiness { service, .. } => Some(service),
            _ => None,
        })
        .collect();
    assert_eq!(reported, vec!["order".to_string()]);
}

#[tokio::test]
async fn wait_ready_failure_is_reported_on_channel() {
    let (sink, mut receiver) = ChannelEventSink::shared(4);
    let supervisor = InMemoryPolicySupervisor::new(vec!["registry".to_string()]).with_events(sink);
    supervisor.fail("order", "registry", "bad document");

    let error = supervisor
        .wait_ready(&["order".to_string()], Duration::from_millis(50))
        .await
        .expect_err("failed");
    assert!(matches!(error, ReadinessError::Failed { ref service, .. } if service == "order"));
    match receiver.try_recv().expect("event") {
        GovernanceEvent::Readiness { service, reason } => {
            assert_eq!(service, "order");
            assert!(reason.contains("bad document"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
