use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::service::LoadLimitPolicy;

const FAILURE_BACKOFF: u32 = 5;
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadMetric {
    /// Percent, 0-100.
    pub cpu_usage: f64,
    pub load_average: f64,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("load metric unavailable: {0}")]
    Unavailable(String),
}

pub trait LoadMetricSource: Send + Sync {
    fn sample(&self) -> Result<LoadMetric, LoadError>;
}

pub struct SystemLoadSource {
    system: Mutex<System>,
}

impl SystemLoadSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for SystemLoadSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadMetricSource for SystemLoadSource {
    fn sample(&self) -> Result<LoadMetric, LoadError> {
        let mut system = self.system.lock();
        system.refresh_cpu();
        let cpu_usage = system.global_cpu_info().cpu_usage() as f64;
        if !cpu_usage.is_finite() {
            return Err(LoadError::Unavailable("cpu usage is not a number".to_string()));
        }
        Ok(LoadMetric {
            cpu_usage,
            load_average: System::load_average().one,
        })
    }
}

/// Process-wide load metric, refreshed by one background loop.
pub struct LoadMonitor {
    metric: RwLock<LoadMetric>,
    source: Arc<dyn LoadMetricSource>,
    interval: Duration,
    running: AtomicBool,
    generation: AtomicU64,
    shutdown: Notify,
}

impl LoadMonitor {
    pub fn new(source: Arc<dyn LoadMetricSource>, interval: Duration) -> Self {
        Self {
            metric: RwLock::new(LoadMetric::default()),
            source,
            interval: interval.max(MIN_INTERVAL),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            shutdown: Notify::new(),
        }
    }

    pub fn shared(source: Arc<dyn LoadMetricSource>, interval: Duration) -> Arc<Self> {
        Arc::new(Self::new(source, interval))
    }

    pub fn metric(&self) -> LoadMetric {
        *self.metric.read()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn refresh(&self) -> Result<LoadMetric, LoadError> {
        let metric = self.source.sample()?;
        *self.metric.write() = metric;
        debug!(cpu_usage = metric.cpu_usage, load_average = metric.load_average, "load metric refreshed");
        Ok(metric)
    }

    /// Spawns the refresh loop on the current runtime. Returns false when a
    /// loop is already running or no runtime is available.
    pub fn start(self: &Arc<Self>) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            warn!("load monitor needs a tokio runtime, not started");
            return false;
        };
        if self.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let monitor = Arc::clone(self);
        info!(interval_ms = self.interval.as_millis() as u64, "load monitor started");
        runtime.spawn(async move {
            while monitor.generation.load(Ordering::Acquire) == generation {
                let delay = match monitor.refresh() {
                    Ok(_) => monitor.interval,
                    Err(err) => {
                        warn!(error = %err, "load metric refresh failed, backing off");
                        monitor.interval * FAILURE_BACKOFF
                    }
                };
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = monitor.shutdown.notified() => {}
                }
            }
        });
        true
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.shutdown.notify_waiters();
            info!("load monitor stopped");
        }
    }
}

/// Percent of calls to shed under `metric`, 0-100.
pub fn rejection_ratio(policy: &LoadLimitPolicy, metric: &LoadMetric) -> u32 {
    let mut ratio = 0;
    if let Some(threshold) = policy.cpu_usage {
        if metric.cpu_usage >= threshold {
            ratio = if policy.ratios.is_empty() {
                100
            } else {
                policy
                    .ratios
                    .iter()
                    .filter(|step| step.cpu_usage <= metric.cpu_usage)
                    .max_by(|a, b| a.cpu_usage.total_cmp(&b.cpu_usage))
                    .map(|step| step.ratio)
                    .unwrap_or(0)
            };
        }
    }
    if let Some(threshold) = policy.load_average {
        if metric.load_average >= threshold {
            ratio = 100;
        }
    }
    ratio.min(100)
}

pub fn admit<R: Rng + ?Sized>(ratio: u32, rng: &mut R) -> bool {
    if ratio == 0 {
        return true;
    }
    if ratio >= 100 {
        return false;
    }
    rng.gen_range(0..100) >= ratio
}
