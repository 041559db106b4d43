use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::event::{EventSink, GovernanceEvent};
use crate::policy::GovernancePolicy;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubscriptionStatus {
    Pending,
    Ready,
    Failed(String),
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("policy subscription for {service} failed: {reason}")]
    Failed { service: String, reason: String },
    #[error("policy subscription for {0} was closed")]
    Closed(String),
}

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("timed out after {timeout_ms}ms waiting for policies of {services:?}")]
    Timeout { services: Vec<String>, timeout_ms: u64 },
    #[error("policy of {service} is not ready: {reason}")]
    Failed { service: String, reason: String },
}

pub struct Subscription {
    service: String,
    receiver: watch::Receiver<SubscriptionStatus>,
}

impl Subscription {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.receiver.borrow().clone()
    }

    /// Resolves once every required sync source delivered the service policy.
    pub async fn ready(mut self) -> Result<(), SubscriptionError> {
        loop {
            let status = self.receiver.borrow_and_update().clone();
            match status {
                SubscriptionStatus::Ready => return Ok(()),
                SubscriptionStatus::Failed(reason) => {
                    return Err(SubscriptionError::Failed {
                        service: self.service,
                        reason,
                    })
                }
                SubscriptionStatus::Pending => {}
            }
            if self.receiver.changed().await.is_err() {
                return Err(SubscriptionError::Closed(self.service));
            }
        }
    }
}

pub trait PolicySupervisor: Send + Sync {
    /// The current snapshot.
    fn policy(&self) -> Arc<GovernancePolicy>;

    /// Installs `update` only if `expect` is still the current snapshot.
    fn update(&self, expect: &Arc<GovernancePolicy>, update: GovernancePolicy) -> bool;

    fn subscribe(&self, service: &str) -> Subscription;

    /// Re-applies `change` against fresh snapshots until the swap wins.
    fn publish<F>(&self, change: F) -> Arc<GovernancePolicy>
    where
        Self: Sized,
        F: Fn(&GovernancePolicy) -> GovernancePolicy,
    {
        loop {
            let current = self.policy();
            if self.update(&current, change(&current)) {
                return self.policy();
            }
        }
    }
}

struct SubscriptionState {
    pending: HashSet<String>,
    sender: watch::Sender<SubscriptionStatus>,
}

pub struct InMemoryPolicySupervisor {
    policy: ArcSwap<GovernancePolicy>,
    sources: Vec<String>,
    subscriptions: Mutex<HashMap<String, SubscriptionState>>,
    events: Option<Arc<dyn EventSink>>,
}

impl InMemoryPolicySupervisor {
    pub fn new(sources: Vec<String>) -> Self {
        Self {
            policy: ArcSwap::from_pointee(GovernancePolicy::default()),
            sources,
            subscriptions: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    pub fn shared(sources: Vec<String>) -> Arc<Self> {
        Arc::new(Self::new(sources))
    }

    pub fn with_policy(self, policy: GovernancePolicy) -> Self {
        self.policy.store(Arc::new(policy));
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    fn state<'a>(
        &self,
        subscriptions: &'a mut HashMap<String, SubscriptionState>,
        service: &str,
    ) -> &'a mut SubscriptionState {
        subscriptions
            .entry(service.to_string())
            .or_insert_with(|| {
                let status = if self.sources.is_empty() {
                    SubscriptionStatus::Ready
                } else {
                    SubscriptionStatus::Pending
                };
                let (sender, _) = watch::channel(status);
                SubscriptionState {
                    pending: self.sources.iter().cloned().collect(),
                    sender,
                }
            })
    }

    /// Called by a sync source once it delivered the service policy.
    pub fn complete(&self, service: &str, source: &str) {
        let mut subscriptions = self.subscriptions.lock();
        let state = self.state(&mut subscriptions, service);
        state.pending.remove(source);
        if state.pending.is_empty() {
            state.sender.send_replace(SubscriptionStatus::Ready);
            info!(service = %service, "service policy ready");
        }
    }

    pub fn fail(&self, service: &str, source: &str, reason: &str) {
        let mut subscriptions = self.subscriptions.lock();
        let state = self.state(&mut subscriptions, service);
        warn!(service = %service, source = %source, reason = %reason, "service policy sync failed");
        state
            .sender
            .send_replace(SubscriptionStatus::Failed(format!("{source}: {reason}")));
    }

    /// Waits for every listed service. Failures are returned and reported on
    /// the event sink, never panicked on.
    pub async fn wait_ready(&self, services: &[String], timeout: Duration) -> Result<(), ReadinessError> {
        wait_ready(self, self.events.as_deref(), services, timeout).await
    }
}

/// Waits until `supervisor` holds the policies of `services`.
pub async fn wait_ready(
    supervisor: &dyn PolicySupervisor,
    events: Option<&dyn EventSink>,
    services: &[String],
    timeout: Duration,
) -> Result<(), ReadinessError> {
    let subscriptions: Vec<Subscription> = services
        .iter()
        .map(|service| supervisor.subscribe(service))
        .collect();
    let waiting = async {
        for subscription in subscriptions {
            subscription.ready().await?;
        }
        Ok::<(), SubscriptionError>(())
    };
    let error = match tokio::time::timeout(timeout, waiting).await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(SubscriptionError::Failed { service, reason })) => ReadinessError::Failed { service, reason },
        Ok(Err(SubscriptionError::Closed(service))) => ReadinessError::Failed {
            service,
            reason: "subscription closed".to_string(),
        },
        Err(_) => ReadinessError::Timeout {
            services: services
                .iter()
                .filter(|service| supervisor.subscribe(service).status() != SubscriptionStatus::Ready)
                .cloned()
                .collect(),
            timeout_ms: timeout.as_millis() as u64,
        },
    };
    report(events, &error);
    Err(error)
}

fn report(events: Option<&dyn EventSink>, error: &ReadinessError) {
    warn!(error = %error, "governance policy not ready");
    let Some(events) = events else {
        return;
    };
    match error {
        ReadinessError::Timeout { services, .. } => {
            for service in services {
                events.offer(GovernanceEvent::Readiness {
                    service: service.clone(),
                    reason: error.to_string(),
                });
            }
        }
        ReadinessError::Failed { service, reason } => {
            events.offer(GovernanceEvent::Readiness {
                service: service.clone(),
                reason: reason.clone(),
            });
        }
    }
}

impl PolicySupervisor for InMemoryPolicySupervisor {
    fn policy(&self) -> Arc<GovernancePolicy> {
        self.policy.load_full()
    }

    fn update(&self, expect: &Arc<GovernancePolicy>, update: GovernancePolicy) -> bool {
        let version = update.version;
        let previous = self.policy.compare_and_swap(expect, Arc::new(update));
        let swapped = Arc::ptr_eq(&*previous, expect);
        if swapped {
            info!(version, "governance policy published");
        }
        swapped
    }

    fn subscribe(&self, service: &str) -> Subscription {
        let mut subscriptions = self.subscriptions.lock();
        let state = self.state(&mut subscriptions, service);
        Subscription {
            service: service.to_string(),
            receiver: state.sender.subscribe(),
        }
    }
}
