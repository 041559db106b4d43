pub mod application;
pub mod config;
pub mod event;
pub mod health;
pub mod lane;
pub mod limit;
pub mod load;
pub mod memo;
pub mod policy;
pub mod service;
pub mod space;
pub mod static_config;
pub mod supervisor;
pub mod tag;

pub use application::{Application, Location};
pub use config::{ConfigError, GovernanceConfig, SystemConfig, SystemConfigLoader};
pub use event::{
    ActionType, ChannelEventSink, Direction, EventSink, GovernanceEvent, InMemoryEventSink,
    TrafficEvent,
};
pub use health::{CircuitBreakerConfig, CircuitStatus, HealthStore, InMemoryHealthStore};
pub use lane::{Lane, LaneRule, LaneSpace};
pub use limit::{
    ConcurrencyLimiter, ConcurrencyLimiterFactory, ConcurrencyPermit, FixedWindowRateLimiter,
    LimiterRegistry, PermitRelease, RateLimiter, RateLimiterFactory, SemaphoreLimiter,
    TokenBucketRateLimiter, FIXED_WINDOW_LIMITER, SEMAPHORE_LIMITER, TOKEN_BUCKET_LIMITER,
};
pub use load::{
    admit, rejection_ratio, LoadError, LoadMetric, LoadMetricSource, LoadMonitor,
    SystemLoadSource,
};
pub use policy::{DbCluster, GovernancePolicy};
pub use service::{
    AuthPolicy, CircuitBreakPolicy, ConcurrencyLimitPolicy, DegradeConfig, FailoverPolicy,
    LoadLimitPolicy, LoadRatio, PermissionKind, PermissionPolicy, RateLimitPolicy, Service,
    ServiceGroup, ServiceLivePolicy, ServiceMethod, ServicePath, ServicePolicy, ServiceType,
    UnitPolicy,
};
pub use space::{
    AccessMode, Cell, CellRoute, LiveDomain, LivePath, LiveSpace, Place, Unit, UnitRange,
    UnitRoute, UnitRule, UnitType, VariableMissingAction, VariableSource,
};
pub use supervisor::{
    wait_ready, InMemoryPolicySupervisor, PolicySupervisor, ReadinessError, Subscription,
    SubscriptionError, SubscriptionStatus,
};
pub use tag::{TagCondition, TagOpType, TagSource};
