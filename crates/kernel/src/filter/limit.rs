use std::sync::Arc;

use async_trait::async_trait;
use control_plane::{admit, rejection_ratio, ConcurrencyLimiter, ConcurrencyPermit, LimiterRegistry, LoadMonitor};
use tracing::debug;

use super::{FilterChain, InboundFilter};
use crate::fault::{FaultType, GovernanceError};
use crate::invocation::Invocation;
use crate::pipeline::FilterKey;

/// Takes one permit from every limiter, or none at all.
pub fn acquire_permits(limiters: &[Arc<dyn ConcurrencyLimiter>]) -> Option<Vec<ConcurrencyPermit>> {
    let mut permits = Vec::with_capacity(limiters.len());
    for limiter in limiters {
        // Permits already taken are released when `permits` drops.
        permits.push(limiter.try_acquire()?);
    }
    Some(permits)
}

pub struct ConcurrencyLimitFilter {
    registry: Arc<LimiterRegistry>,
}

impl ConcurrencyLimitFilter {
    pub fn new(registry: Arc<LimiterRegistry>) -> Self {
        Self { registry }
    }

    fn limiters(&self, invocation: &Invocation) -> Vec<Arc<dyn ConcurrencyLimiter>> {
        let scope = &invocation.service().service_name;
        invocation
            .service()
            .policy
            .concurrency_limits()
            .iter()
            .filter(|policy| policy.max_concurrency > 0 && invocation.match_all(&policy.conditions))
            .filter_map(|policy| self.registry.concurrency_limiter(scope, policy))
            .collect()
    }
}

#[async_trait]
impl InboundFilter for ConcurrencyLimitFilter {
    fn key(&self) -> FilterKey {
        FilterKey::ConcurrencyLimit
    }

    async fn filter(&self, invocation: &mut Invocation, chain: FilterChain<'_>) -> Result<(), GovernanceError> {
        let limiters = self.limiters(invocation);
        let Some(permits) = acquire_permits(&limiters) else {
            return Err(invocation.reject(FaultType::Limit, "concurrency limit exceeded"));
        };
        let result = chain.filter(invocation).await;
        drop(permits);
        result
    }
}

pub struct RateLimitFilter {
    registry: Arc<LimiterRegistry>,
}

impl RateLimitFilter {
    pub fn new(registry: Arc<LimiterRegistry>) -> Self {
        Self { registry }
    }

    fn check(&self, invocation: &Invocation) -> Result<(), GovernanceError> {
        let scope = &invocation.service().service_name;
        for policy in invocation.service().policy.rate_limits() {
            if policy.permits == 0 || !invocation.match_all(&policy.conditions) {
                continue;
            }
            let Some(limiter) = self.registry.rate_limiter(scope, policy) else {
                continue;
            };
            if !limiter.try_acquire() {
                return Err(invocation.reject(
                    FaultType::Limit,
                    format!("rate limit {} exceeded", policy.id),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl InboundFilter for RateLimitFilter {
    fn key(&self) -> FilterKey {
        FilterKey::RateLimit
    }

    async fn filter(&self, invocation: &mut Invocation, chain: FilterChain<'_>) -> Result<(), GovernanceError> {
        self.check(invocation)?;
        chain.filter(invocation).await
    }
}

/// Sheds a share of calls while the host is overloaded.
pub struct LoadLimitFilter {
    monitor: Arc<LoadMonitor>,
}

impl LoadLimitFilter {
    pub fn new(monitor: Arc<LoadMonitor>) -> Self {
        Self { monitor }
    }

    fn check(&self, invocation: &Invocation) -> Result<(), GovernanceError> {
        let metric = self.monitor.metric();
        let mut rng = rand::thread_rng();
        for policy in invocation.service().policy.load_limits() {
            if !invocation.match_all(&policy.conditions) {
                continue;
            }
            let ratio = rejection_ratio(policy, &metric);
            if !admit(ratio, &mut rng) {
                debug!(
                    request_id = %invocation.request().request_id(),
                    policy = %policy.id,
                    ratio,
                    cpu_usage = metric.cpu_usage,
                    "load limit shed call"
                );
                return Err(invocation.reject(
                    FaultType::Limit,
                    format!("load limit {} exceeded", policy.id),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl InboundFilter for LoadLimitFilter {
    fn key(&self) -> FilterKey {
        FilterKey::LoadLimit
    }

    async fn filter(&self, invocation: &mut Invocation, chain: FilterChain<'_>) -> Result<(), GovernanceError> {
        self.check(invocation)?;
        chain.filter(invocation).await
    }
}
