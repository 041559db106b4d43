use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::service::CircuitBreakPolicy;

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration_ms: u64,
    pub half_open_success_threshold: u32,
}

impl CircuitBreakerConfig {
    fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration_ms: 30_000,
            half_open_success_threshold: 2,
        }
    }
}

impl From<&CircuitBreakPolicy> for CircuitBreakerConfig {
    fn from(policy: &CircuitBreakPolicy) -> Self {
        Self {
            failure_threshold: policy.failure_threshold.max(1),
            open_duration_ms: policy.open_duration_ms,
            half_open_success_threshold: policy.half_open_success_threshold.max(1),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Copy, Debug)]
enum Circuit {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { successes: u32 },
}

impl Default for Circuit {
    fn default() -> Self {
        Circuit::Closed { failures: 0 }
    }
}

impl Circuit {
    /// Moves an expired open circuit to half-open.
    fn settle(&mut self, now: Instant) {
        if let Circuit::Open { until } = *self {
            if now >= until {
                *self = Circuit::HalfOpen { successes: 0 };
            }
        }
    }

    fn status(&self) -> CircuitStatus {
        match self {
            Circuit::Closed { .. } => CircuitStatus::Closed,
            Circuit::Open { .. } => CircuitStatus::Open,
            Circuit::HalfOpen { .. } => CircuitStatus::HalfOpen,
        }
    }
}

/// Per-endpoint circuit state. Thresholds come with each call so that
/// endpoints governed by different policies share one store.
pub trait HealthStore: Send + Sync {
    fn is_available(&self, endpoint: &str, config: &CircuitBreakerConfig) -> bool;
    fn record_success(&self, endpoint: &str, config: &CircuitBreakerConfig);
    fn record_failure(&self, endpoint: &str, config: &CircuitBreakerConfig);
}

#[derive(Clone, Default)]
pub struct InMemoryHealthStore {
    circuits: Arc<Mutex<HashMap<String, Circuit>>>,
}

impl InMemoryHealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn status(&self, endpoint: &str) -> CircuitStatus {
        let mut circuits = self.circuits.lock();
        match circuits.get_mut(endpoint) {
            Some(circuit) => {
                circuit.settle(Instant::now());
                circuit.status()
            }
            None => CircuitStatus::Closed,
        }
    }
}

impl HealthStore for InMemoryHealthStore {
    fn is_available(&self, endpoint: &str, _config: &CircuitBreakerConfig) -> bool {
        self.status(endpoint) != CircuitStatus::Open
    }

    fn record_success(&self, endpoint: &str, config: &CircuitBreakerConfig) {
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(endpoint.to_string()).or_default();
        circuit.settle(Instant::now());
        *circuit = match *circuit {
            Circuit::HalfOpen { successes } if successes + 1 >= config.half_open_success_threshold => {
                info!(endpoint, "circuit closed");
                Circuit::default()
            }
            Circuit::HalfOpen { successes } => Circuit::HalfOpen {
                successes: successes + 1,
            },
            Circuit::Closed { .. } => Circuit::default(),
            open @ Circuit::Open { .. } => open,
        };
    }

    fn record_failure(&self, endpoint: &str, config: &CircuitBreakerConfig) {
        let now = Instant::now();
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(endpoint.to_string()).or_default();
        circuit.settle(now);
        let open = Circuit::Open {
            until: now + config.open_duration(),
        };
        *circuit = match *circuit {
            Circuit::HalfOpen { .. } => {
                warn!(endpoint, "half-open probe failed, circuit reopened");
                open
            }
            Circuit::Closed { failures } if failures + 1 >= config.failure_threshold => {
                warn!(endpoint, failures = failures + 1, "circuit opened");
                open
            }
            Circuit::Closed { failures } => Circuit::Closed { failures: failures + 1 },
            still_open @ Circuit::Open { .. } => still_open,
        };
    }
}
