use std::sync::Arc;

use control_plane::{
    wait_ready, ActionType, EventSink, GovernanceConfig, GovernanceEvent, GovernancePolicy,
    HealthStore, InMemoryHealthStore, LimiterRegistry, LoadMetricSource, LoadMonitor,
    PolicySupervisor, ReadinessError, SystemLoadSource, TagOpType, TrafficEvent,
};
use tracing::{info, warn};

use crate::cluster::{EndpointCaller, FailoverInvoker, Routed};
use crate::context::{GovernanceContext, Readiness};
use crate::fault::{Fault, GovernanceError};
use crate::filter::{
    AuthFilter, Authenticator, CellFilter, ConcurrencyLimitFilter, FailoverFilter, FilterChain,
    InboundFilter, Invoker, LoadLimitFilter, PermissionFilter, RateLimitFilter, ReadyFilter,
    TokenAuthenticator, UnitFilter,
};
use crate::function::{FunctionRegistry, UnitFunction, VariableParser};
use crate::invocation::{Invocation, InvocationProfile};
use crate::pipeline::{FilterKey, FilterPipeline};
use crate::route::{LoadBalancer, RouteChain, RouteTarget};
use crate::tag::{TagMatcher, TagMatcherRegistry};
use crate::types::{Endpoint, GovernedRequest};

pub struct EngineBuilder {
    config: GovernanceConfig,
    supervisor: Arc<dyn PolicySupervisor>,
    functions: FunctionRegistry,
    matchers: TagMatcherRegistry,
    authenticators: Vec<Arc<dyn Authenticator>>,
    balancers: Vec<Arc<dyn LoadBalancer>>,
    limiters: Option<Arc<LimiterRegistry>>,
    load_source: Option<Arc<dyn LoadMetricSource>>,
    health: Option<Arc<dyn HealthStore>>,
    events: Option<Arc<dyn EventSink>>,
}

impl EngineBuilder {
    pub fn new(config: GovernanceConfig, supervisor: Arc<dyn PolicySupervisor>) -> Self {
        Self {
            config,
            supervisor,
            functions: FunctionRegistry::new(),
            matchers: TagMatcherRegistry::new(),
            authenticators: vec![Arc::new(TokenAuthenticator)],
            balancers: Vec::new(),
            limiters: None,
            load_source: None,
            health: None,
            events: None,
        }
    }

    pub fn register_variable_parser(mut self, parser: Arc<dyn VariableParser>) -> Self {
        self.functions.register_variable_parser(parser);
        self
    }

    pub fn register_unit_function(mut self, function: Arc<dyn UnitFunction>) -> Self {
        self.functions.register_unit_function(function);
        self
    }

    pub fn register_tag_matcher(mut self, op: TagOpType, matcher: Arc<dyn TagMatcher>) -> Self {
        self.matchers.register(op, matcher);
        self
    }

    pub fn register_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    pub fn register_load_balancer(mut self, balancer: Arc<dyn LoadBalancer>) -> Self {
        self.balancers.push(balancer);
        self
    }

    pub fn with_limiters(mut self, limiters: Arc<LimiterRegistry>) -> Self {
        self.limiters = Some(limiters);
        self
    }

    pub fn with_load_source(mut self, source: Arc<dyn LoadMetricSource>) -> Self {
        self.load_source = Some(source);
        self
    }

    pub fn with_health(mut self, health: Arc<dyn HealthStore>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> GovernanceEngine {
        let config = Arc::new(self.config);
        let functions = Arc::new(self.functions);
        let context = GovernanceContext {
            config: config.clone(),
            supervisor: self.supervisor,
            functions: functions.clone(),
            matchers: Arc::new(self.matchers),
            readiness: Arc::new(Readiness::default()),
        };
        let limiters = self.limiters.unwrap_or_else(|| {
            LimiterRegistry::shared(&config.concurrency_limiter, &config.rate_limiter)
        });
        let load_source: Arc<dyn LoadMetricSource> = match self.load_source {
            Some(source) => source,
            None => SystemLoadSource::shared(),
        };
        let monitor = LoadMonitor::shared(load_source, config.load_interval);
        let health: Arc<dyn HealthStore> = match self.health {
            Some(health) => health,
            None => InMemoryHealthStore::shared(),
        };
        let auth = Arc::new(AuthFilter::new(self.authenticators));

        let pipeline = FilterPipeline::from_config(&config);
        let filters: Vec<Arc<dyn InboundFilter>> = pipeline
            .keys
            .iter()
            .map(|key| -> Arc<dyn InboundFilter> {
                match key {
                    FilterKey::Auth => auth.clone(),
                    FilterKey::Permission => Arc::new(PermissionFilter),
                    FilterKey::ConcurrencyLimit => Arc::new(ConcurrencyLimitFilter::new(limiters.clone())),
                    FilterKey::RateLimit => Arc::new(RateLimitFilter::new(limiters.clone())),
                    FilterKey::LoadLimit => Arc::new(LoadLimitFilter::new(monitor.clone())),
                    FilterKey::Ready => Arc::new(ReadyFilter::new(context.readiness.clone())),
                    FilterKey::Unit => Arc::new(UnitFilter::new(functions.clone())),
                    FilterKey::Cell => Arc::new(CellFilter),
                    FilterKey::Failover => Arc::new(FailoverFilter),
                }
            })
            .collect();

        let route = Arc::new(RouteChain::standard(functions, health.clone(), self.balancers));
        GovernanceEngine {
            invoker: FailoverInvoker::new(route.clone(), health.clone()),
            context,
            pipeline,
            filters,
            auth,
            route,
            monitor,
            health,
            events: self.events,
        }
    }
}

/// Entry point adapters call: builds invocations, runs the inbound chain,
/// routes and invokes outbound calls, and reports every decision.
pub struct GovernanceEngine {
    context: GovernanceContext,
    pipeline: FilterPipeline,
    filters: Vec<Arc<dyn InboundFilter>>,
    auth: Arc<AuthFilter>,
    route: Arc<RouteChain>,
    invoker: FailoverInvoker,
    monitor: Arc<LoadMonitor>,
    health: Arc<dyn HealthStore>,
    events: Option<Arc<dyn EventSink>>,
}

impl GovernanceEngine {
    pub fn builder(config: GovernanceConfig, supervisor: Arc<dyn PolicySupervisor>) -> EngineBuilder {
        EngineBuilder::new(config, supervisor)
    }

    pub fn context(&self) -> &GovernanceContext {
        &self.context
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.context.config
    }

    pub fn policy(&self) -> Arc<GovernancePolicy> {
        self.context.supervisor.policy()
    }

    pub fn pipeline(&self) -> &FilterPipeline {
        &self.pipeline
    }

    pub fn health(&self) -> &Arc<dyn HealthStore> {
        &self.health
    }

    pub fn monitor(&self) -> &Arc<LoadMonitor> {
        &self.monitor
    }

    pub fn is_ready(&self) -> bool {
        self.context.readiness.is_ready()
    }

    pub fn set_ready(&self, ready: bool) {
        self.context.readiness.set(ready);
    }

    /// Samples load once, then keeps sampling in the background, when a load
    /// limit filter is installed.
    pub fn start(&self) {
        if self.pipeline.contains(FilterKey::LoadLimit) {
            if let Err(err) = self.monitor.refresh() {
                warn!(error = %err, "initial load sample failed");
            }
            self.monitor.start();
        }
        info!(
            application = %self.context.config.application.name,
            filters = ?self.pipeline.keys,
            "governance engine started"
        );
    }

    pub fn stop(&self) {
        self.monitor.stop();
        info!("governance engine stopped");
    }

    /// Marks the engine ready once the policies of `services` arrived.
    pub async fn wait_ready(&self, services: &[String]) -> Result<(), ReadinessError> {
        let result = wait_ready(
            self.context.supervisor.as_ref(),
            self.events.as_deref(),
            services,
            self.context.config.initialize_timeout,
        )
        .await;
        self.set_ready(result.is_ok());
        result
    }

    pub fn inbound_invocation(&self, request: Box<dyn GovernedRequest>) -> Invocation {
        let profile = if self.context.config.gateway {
            InvocationProfile::gateway()
        } else {
            InvocationProfile::inbound()
        };
        Invocation::new(request, profile, &self.context, None)
    }

    pub fn outbound_invocation(&self, request: Box<dyn GovernedRequest>, inbound: Option<&Invocation>) -> Invocation {
        Invocation::new(request, InvocationProfile::outbound(), &self.context, inbound)
    }

    /// Runs the inbound chain, then `invoker` if every filter passed.
    pub async fn inbound(&self, invocation: &mut Invocation, invoker: &dyn Invoker) -> Result<(), GovernanceError> {
        let result = FilterChain::new(&self.filters, invoker).filter(invocation).await;
        self.publish(invocation, &result);
        result
    }

    /// Narrows `endpoints` to the one this call should go to.
    pub fn route(&self, invocation: &Invocation, endpoints: Vec<Endpoint>) -> Result<RouteTarget, GovernanceError> {
        let mut target = RouteTarget::new(endpoints);
        self.route.route(invocation, &mut target)?;
        Ok(target)
    }

    /// Injects credentials, then routes and calls with failover.
    pub async fn outbound<T: Send>(
        &self,
        invocation: &mut Invocation,
        endpoints: &[Endpoint],
        caller: &dyn EndpointCaller<T>,
    ) -> Result<Routed<T>, GovernanceError> {
        if self.context.config.flow_control_enabled {
            self.auth.inject(invocation);
        }
        let result = self.invoker.invoke(invocation, endpoints, caller).await;
        self.publish(invocation, &result);
        result
    }

    fn publish<T>(&self, invocation: &Invocation, result: &Result<T, GovernanceError>) {
        let Some(events) = &self.events else {
            return;
        };
        let (action, fault) = match result {
            Err(GovernanceError::Rejected(fault)) => (ActionType::Reject, Some(fault)),
            Err(GovernanceError::Failover(fault)) => (ActionType::Failover, Some(fault)),
            Err(GovernanceError::Degraded { fault, .. }) => (ActionType::Degrade, Some(fault)),
            _ => (ActionType::Forward, None),
        };
        if !events.offer(GovernanceEvent::Traffic(traffic_event(invocation, action, fault))) {
            warn!(request_id = %invocation.request().request_id(), "traffic event dropped");
        }
    }
}

fn traffic_event(invocation: &Invocation, action: ActionType, fault: Option<&Fault>) -> TrafficEvent {
    let profile = invocation.profile();
    let service = invocation.service();
    let live = invocation.live();
    let lane = invocation.lane();
    let application = &invocation.config().application.name;
    let mut event = TrafficEvent::new(action, profile.direction, invocation.request().request_id());
    event.component = profile.component.clone();
    event.live_space_id = live.target_space_id.clone();
    event.unit_rule_id = live.rule_id.clone();
    event.unit = live.current_unit.clone();
    event.cell = live.current_cell.clone();
    event.lane_space_id = lane.lane_space_id.clone();
    event.lane = lane.target_lane.clone();
    event.application = Some(application.clone()).filter(|name| !name.is_empty());
    event.service = Some(service.service_name.clone());
    event.group = service.group.clone();
    event.path = service.path.clone();
    event.method = service.method.clone();
    event.fault_type = fault.map(|fault| fault.fault_type.code().to_string());
    event.reason = fault.map(|fault| fault.reason.clone());
    event
}
