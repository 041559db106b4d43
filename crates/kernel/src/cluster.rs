use std::sync::Arc;

use async_trait::async_trait;
use control_plane::{CircuitBreakerConfig, HealthStore};
use tracing::{debug, warn};

use crate::fault::GovernanceError;
use crate::invocation::Invocation;
use crate::route::{RouteChain, RouteTarget};
use crate::types::{Endpoint, GovernedRequest};

/// Sends one outbound call to one endpoint. Transport adapters implement it.
#[async_trait]
pub trait EndpointCaller<T: Send>: Send + Sync {
    async fn call(&self, request: &dyn GovernedRequest, endpoint: &Endpoint) -> Result<T, GovernanceError>;
}

/// A successful outbound call and where it went.
#[derive(Debug)]
pub struct Routed<T> {
    pub response: T,
    pub endpoint: Endpoint,
    pub unit: Option<String>,
    pub cell: Option<String>,
}

/// Routes and calls, moving to another endpoint on retryable failures.
pub struct FailoverInvoker {
    route: Arc<RouteChain>,
    health: Arc<dyn HealthStore>,
}

impl FailoverInvoker {
    pub fn new(route: Arc<RouteChain>, health: Arc<dyn HealthStore>) -> Self {
        Self { route, health }
    }

    pub async fn invoke<T: Send>(
        &self,
        invocation: &mut Invocation,
        endpoints: &[Endpoint],
        caller: &dyn EndpointCaller<T>,
    ) -> Result<Routed<T>, GovernanceError> {
        let retries = invocation.service().policy.retries();
        let config = invocation
            .service()
            .policy
            .circuit_breaks()
            .first()
            .map(CircuitBreakerConfig::from)
            .unwrap_or_default();
        let mut last_error: Option<GovernanceError> = None;

        for attempt in 0..=retries {
            let mut target = RouteTarget::new(endpoints.to_vec());
            if let Err(err) = self.route.route(invocation, &mut target) {
                return Err(last_error.unwrap_or(err));
            }
            let Some(endpoint) = target.endpoint().cloned() else {
                break;
            };
            invocation.request_mut().add_attempt(&endpoint.id);
            debug!(
                request_id = %invocation.request().request_id(),
                endpoint = %endpoint.id,
                attempt,
                "calling endpoint"
            );
            match caller.call(invocation.request(), &endpoint).await {
                Ok(response) => {
                    self.health.record_success(&endpoint.id, &config);
                    return Ok(Routed {
                        response,
                        endpoint,
                        unit: target.unit,
                        cell: target.cell,
                    });
                }
                Err(err) => {
                    warn!(
                        request_id = %invocation.request().request_id(),
                        endpoint = %endpoint.id,
                        attempt,
                        error = %err,
                        "endpoint call failed"
                    );
                    self.health.record_failure(&endpoint.id, &config);
                    let retryable = err.is_retryable();
                    last_error = Some(err);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GovernanceError::NoEndpoint {
            service: invocation.service().service_name.clone(),
        }))
    }
}
