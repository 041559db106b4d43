use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::service::{ConcurrencyLimitPolicy, RateLimitPolicy};

pub const SEMAPHORE_LIMITER: &str = "semaphore";
pub const FIXED_WINDOW_LIMITER: &str = "fixed_window";
pub const TOKEN_BUCKET_LIMITER: &str = "token_bucket";

pub trait PermitRelease: Send + Sync {
    fn release(&self);
}

/// A held concurrency slot. Released exactly once, either explicitly or when
/// dropped.
pub struct ConcurrencyPermit {
    limiter: Arc<dyn PermitRelease>,
    released: bool,
}

impl ConcurrencyPermit {
    pub fn new(limiter: Arc<dyn PermitRelease>) -> Self {
        Self {
            limiter,
            released: false,
        }
    }

    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.limiter.release();
        }
    }
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.release();
    }
}

pub trait ConcurrencyLimiter: Send + Sync {
    fn try_acquire(&self) -> Option<ConcurrencyPermit>;
    fn in_flight(&self) -> u32;
}

pub trait RateLimiter: Send + Sync {
    fn try_acquire(&self) -> bool;
}

pub trait ConcurrencyLimiterFactory: Send + Sync {
    fn limiter_type(&self) -> &str;
    fn create(&self, policy: &ConcurrencyLimitPolicy) -> Arc<dyn ConcurrencyLimiter>;
}

pub trait RateLimiterFactory: Send + Sync {
    fn limiter_type(&self) -> &str;
    fn create(&self, policy: &RateLimitPolicy) -> Arc<dyn RateLimiter>;
}

struct SemaphoreState {
    max: u32,
    in_flight: AtomicU32,
}

impl PermitRelease for SemaphoreState {
    fn release(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| current.checked_sub(1));
    }
}

pub struct SemaphoreLimiter {
    state: Arc<SemaphoreState>,
}

impl SemaphoreLimiter {
    pub fn new(max: u32) -> Self {
        Self {
            state: Arc::new(SemaphoreState {
                max,
                in_flight: AtomicU32::new(0),
            }),
        }
    }

    pub fn shared(max: u32) -> Arc<Self> {
        Arc::new(Self::new(max))
    }
}

impl ConcurrencyLimiter for SemaphoreLimiter {
    fn try_acquire(&self) -> Option<ConcurrencyPermit> {
        let max = self.state.max;
        self.state
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .ok()?;
        Some(ConcurrencyPermit::new(self.state.clone()))
    }

    fn in_flight(&self) -> u32 {
        self.state.in_flight.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug)]
struct WindowState {
    window_start: i64,
    count: u32,
}

pub struct FixedWindowRateLimiter {
    permits: u32,
    window_ms: i64,
    state: Mutex<WindowState>,
}

impl FixedWindowRateLimiter {
    pub fn new(permits: u32, window_ms: u64) -> Self {
        Self {
            permits,
            window_ms: window_ms.max(1) as i64,
            state: Mutex::new(WindowState {
                window_start: now_ms(),
                count: 0,
            }),
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl RateLimiter for FixedWindowRateLimiter {
    fn try_acquire(&self) -> bool {
        let now = now_ms();
        let mut state = self.state.lock();
        if now - state.window_start >= self.window_ms {
            state.window_start = now;
            state.count = 0;
        }
        if state.count >= self.permits {
            return false;
        }
        state.count += 1;
        true
    }
}

#[derive(Clone, Debug)]
struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

/// Holds up to `permits` tokens and refills `permits` per window.
pub struct TokenBucketRateLimiter {
    capacity: f64,
    per_ms: f64,
    state: Mutex<BucketState>,
}

impl TokenBucketRateLimiter {
    pub fn new(permits: u32, window_ms: u64) -> Self {
        let capacity = permits as f64;
        Self {
            capacity,
            per_ms: capacity / window_ms.max(1) as f64,
            state: Mutex::new(BucketState {
                tokens: capacity,
                refilled_at: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for TokenBucketRateLimiter {
    fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let elapsed = now.duration_since(state.refilled_at).as_secs_f64() * 1000.0;
        state.tokens = (state.tokens + elapsed * self.per_ms).min(self.capacity);
        state.refilled_at = now;
        if state.tokens < 1.0 {
            return false;
        }
        state.tokens -= 1.0;
        true
    }
}

pub struct SemaphoreLimiterFactory;

impl ConcurrencyLimiterFactory for SemaphoreLimiterFactory {
    fn limiter_type(&self) -> &str {
        SEMAPHORE_LIMITER
    }

    fn create(&self, policy: &ConcurrencyLimitPolicy) -> Arc<dyn ConcurrencyLimiter> {
        SemaphoreLimiter::shared(policy.max_concurrency)
    }
}

pub struct FixedWindowLimiterFactory;

impl RateLimiterFactory for FixedWindowLimiterFactory {
    fn limiter_type(&self) -> &str {
        FIXED_WINDOW_LIMITER
    }

    fn create(&self, policy: &RateLimitPolicy) -> Arc<dyn RateLimiter> {
        Arc::new(FixedWindowRateLimiter::new(policy.permits, policy.window_ms))
    }
}

pub struct TokenBucketLimiterFactory;

impl RateLimiterFactory for TokenBucketLimiterFactory {
    fn limiter_type(&self) -> &str {
        TOKEN_BUCKET_LIMITER
    }

    fn create(&self, policy: &RateLimitPolicy) -> Arc<dyn RateLimiter> {
        Arc::new(TokenBucketRateLimiter::new(policy.permits, policy.window_ms))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct LimiterKey {
    scope: String,
    id: String,
}

struct Cached<T: ?Sized> {
    version: u64,
    limiter: Arc<T>,
}

/// Limiter factories keyed by type, plus the live limiter instances keyed by
/// the policy they were built from. A new policy version replaces the
/// instance.
pub struct LimiterRegistry {
    concurrency_factories: RwLock<HashMap<String, Arc<dyn ConcurrencyLimiterFactory>>>,
    rate_factories: RwLock<HashMap<String, Arc<dyn RateLimiterFactory>>>,
    default_concurrency: String,
    default_rate: String,
    concurrency_cache: Mutex<HashMap<LimiterKey, Cached<dyn ConcurrencyLimiter>>>,
    rate_cache: Mutex<HashMap<LimiterKey, Cached<dyn RateLimiter>>>,
}

impl LimiterRegistry {
    pub fn new(default_concurrency: &str, default_rate: &str) -> Self {
        let registry = Self {
            concurrency_factories: RwLock::new(HashMap::new()),
            rate_factories: RwLock::new(HashMap::new()),
            default_concurrency: default_concurrency.to_string(),
            default_rate: default_rate.to_string(),
            concurrency_cache: Mutex::new(HashMap::new()),
            rate_cache: Mutex::new(HashMap::new()),
        };
        registry.register_concurrency(Arc::new(SemaphoreLimiterFactory));
        registry.register_rate(Arc::new(FixedWindowLimiterFactory));
        registry.register_rate(Arc::new(TokenBucketLimiterFactory));
        registry
    }

    pub fn shared(default_concurrency: &str, default_rate: &str) -> Arc<Self> {
        Arc::new(Self::new(default_concurrency, default_rate))
    }

    pub fn register_concurrency(&self, factory: Arc<dyn ConcurrencyLimiterFactory>) {
        self.concurrency_factories
            .write()
            .insert(factory.limiter_type().to_string(), factory);
    }

    pub fn register_rate(&self, factory: Arc<dyn RateLimiterFactory>) {
        self.rate_factories
            .write()
            .insert(factory.limiter_type().to_string(), factory);
    }

    fn concurrency_factory(&self, limiter_type: Option<&str>) -> Option<Arc<dyn ConcurrencyLimiterFactory>> {
        let factories = self.concurrency_factories.read();
        limiter_type
            .and_then(|name| factories.get(name))
            .or_else(|| factories.get(&self.default_concurrency))
            .cloned()
    }

    fn rate_factory(&self, limiter_type: Option<&str>) -> Option<Arc<dyn RateLimiterFactory>> {
        let factories = self.rate_factories.read();
        limiter_type
            .and_then(|name| factories.get(name))
            .or_else(|| factories.get(&self.default_rate))
            .cloned()
    }

    pub fn concurrency_limiter(
        &self,
        scope: &str,
        policy: &ConcurrencyLimitPolicy,
    ) -> Option<Arc<dyn ConcurrencyLimiter>> {
        let key = LimiterKey {
            scope: scope.to_string(),
            id: policy.id.clone(),
        };
        let mut cache = self.concurrency_cache.lock();
        if let Some(cached) = cache.get(&key) {
            if cached.version == policy.version {
                return Some(cached.limiter.clone());
            }
        }
        let Some(factory) = self.concurrency_factory(policy.limiter_type.as_deref()) else {
            warn!(limiter_type = ?policy.limiter_type, policy = %policy.id, "no concurrency limiter factory");
            return None;
        };
        let limiter = factory.create(policy);
        cache.insert(
            key,
            Cached {
                version: policy.version,
                limiter: limiter.clone(),
            },
        );
        Some(limiter)
    }

    pub fn rate_limiter(&self, scope: &str, policy: &RateLimitPolicy) -> Option<Arc<dyn RateLimiter>> {
        let key = LimiterKey {
            scope: scope.to_string(),
            id: policy.id.clone(),
        };
        let mut cache = self.rate_cache.lock();
        if let Some(cached) = cache.get(&key) {
            if cached.version == policy.version {
                return Some(cached.limiter.clone());
            }
        }
        let Some(factory) = self.rate_factory(policy.limiter_type.as_deref()) else {
            warn!(limiter_type = ?policy.limiter_type, policy = %policy.id, "no rate limiter factory");
            return None;
        };
        let limiter = factory.create(policy);
        cache.insert(
            key,
            Cached {
                version: policy.version,
                limiter: limiter.clone(),
            },
        );
        Some(limiter)
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::new(SEMAPHORE_LIMITER, FIXED_WINDOW_LIMITER)
    }
}
