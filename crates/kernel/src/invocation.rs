use std::sync::Arc;

use control_plane::{
    DegradeConfig, Direction, GovernanceConfig, GovernancePolicy, Place, TagCondition,
};
use tracing::debug;

use crate::action::{CellAction, UnitAction};
use crate::context::GovernanceContext;
use crate::fault::{Fault, FaultContext, FaultType, GovernanceError};
use crate::metadata::{LaneMetadata, LiveMetadata, PolicyId, ServiceMetadata};
use crate::parser::{ParseContext, ParserSet};
use crate::tag::TagMatcherRegistry;
use crate::types::{GovernedRequest, HEADER_LIVE_FAILOVER_HOPS};

/// How an invocation is parsed and reported. Gateway, inbound and outbound
/// calls differ only in these values.
#[derive(Clone)]
pub struct InvocationProfile {
    pub direction: Direction,
    pub gateway: bool,
    pub component: String,
    pub parsers: ParserSet,
}

impl InvocationProfile {
    pub fn inbound() -> Self {
        Self {
            direction: Direction::Inbound,
            gateway: false,
            component: "service".to_string(),
            parsers: ParserSet::inbound(),
        }
    }

    pub fn gateway() -> Self {
        Self {
            direction: Direction::Inbound,
            gateway: true,
            component: "gateway".to_string(),
            parsers: ParserSet::inbound(),
        }
    }

    pub fn outbound() -> Self {
        Self {
            direction: Direction::Outbound,
            gateway: false,
            component: "client".to_string(),
            parsers: ParserSet::outbound(),
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    pub fn with_parsers(mut self, parsers: ParserSet) -> Self {
        self.parsers = parsers;
        self
    }
}

/// One governed call. Metadata is resolved once, against the policy snapshot
/// taken at construction.
pub struct Invocation {
    request: Box<dyn GovernedRequest>,
    profile: InvocationProfile,
    config: Arc<GovernanceConfig>,
    policy: Arc<GovernancePolicy>,
    matchers: Arc<TagMatcherRegistry>,
    service: ServiceMetadata,
    live: LiveMetadata,
    lane: LaneMetadata,
    policy_id: PolicyId,
    unit_action: Option<UnitAction>,
    cell_action: Option<CellAction>,
    failover: Option<Fault>,
}

impl Invocation {
    pub fn new(
        request: Box<dyn GovernedRequest>,
        profile: InvocationProfile,
        context: &GovernanceContext,
        inbound: Option<&Invocation>,
    ) -> Self {
        let policy = context.supervisor.policy();
        let config = context.config.clone();
        let (service, live, lane) = {
            let parse = ParseContext {
                request: request.as_ref(),
                config: &config,
                policy: &policy,
                functions: &context.functions,
                matchers: &context.matchers,
                gateway: profile.gateway,
                inbound,
            };
            let service = profile.parsers.service.parse(&parse);
            let live = if config.live_enabled {
                profile.parsers.live.parse(&parse, &service)
            } else {
                LiveMetadata::default()
            };
            let lane = if config.lane_enabled {
                profile.parsers.lane.parse(&parse, &service)
            } else {
                LaneMetadata::default()
            };
            (service, live, lane)
        };
        let policy_id = service.policy_id();
        debug!(
            request_id = %request.request_id(),
            policy_id = %policy_id,
            unit_policy = service.unit_policy.as_str(),
            rule_id = ?live.rule_id,
            variable = ?live.variable,
            unit = ?live.current_unit,
            cell = ?live.current_cell,
            lane = ?lane.target_lane,
            "invocation parsed"
        );
        Self {
            request,
            profile,
            config,
            policy,
            matchers: context.matchers.clone(),
            service,
            live,
            lane,
            policy_id,
            unit_action: None,
            cell_action: None,
            failover: None,
        }
    }

    pub fn request(&self) -> &dyn GovernedRequest {
        self.request.as_ref()
    }

    pub fn request_mut(&mut self) -> &mut dyn GovernedRequest {
        self.request.as_mut()
    }

    pub fn into_request(self) -> Box<dyn GovernedRequest> {
        self.request
    }

    pub fn profile(&self) -> &InvocationProfile {
        &self.profile
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn policy(&self) -> &GovernancePolicy {
        &self.policy
    }

    pub fn service(&self) -> &ServiceMetadata {
        &self.service
    }

    pub fn live(&self) -> &LiveMetadata {
        &self.live
    }

    pub fn lane(&self) -> &LaneMetadata {
        &self.lane
    }

    pub fn policy_id(&self) -> &PolicyId {
        &self.policy_id
    }

    pub fn is_gateway(&self) -> bool {
        self.profile.gateway
    }

    pub fn is_write(&self) -> bool {
        self.service.write_protect
    }

    pub fn is_accessible<P: Place + ?Sized>(&self, place: Option<&P>) -> bool {
        place.map_or(false, |place| place.accessible(self.is_write()))
    }

    pub fn match_tag(&self, condition: &TagCondition) -> bool {
        self.matchers.matches(condition, self.request.as_ref())
    }

    pub fn match_all(&self, conditions: &[TagCondition]) -> bool {
        self.matchers.matches_all(conditions, self.request.as_ref())
    }

    pub fn fault(&self, fault_type: FaultType, reason: impl Into<String>) -> Fault {
        let application = &self.config.application;
        Fault::new(fault_type, reason).with_context(FaultContext {
            live_space_id: self.live.target_space_id.clone(),
            rule_id: self.live.rule_id.clone(),
            unit: self.live.current_unit.clone(),
            cell: self.live.current_cell.clone(),
            application: Some(application.name.clone()).filter(|name| !name.is_empty()),
            service: Some(self.service.service_name.clone()),
            group: self.service.group.clone(),
            path: self.service.path.clone(),
            variable: self.live.variable.clone(),
        })
    }

    /// Builds the terminal error for this call.
    pub fn reject(&self, fault_type: FaultType, reason: impl Into<String>) -> GovernanceError {
        let fault = self.fault(fault_type, reason);
        debug!(request_id = %self.request.request_id(), fault = %fault, "invocation rejected");
        self.request.reject(fault)
    }

    /// Marks the call for retry elsewhere; the chain keeps going.
    pub fn failover(&mut self, fault_type: FaultType, reason: impl Into<String>) {
        let fault = self.fault(fault_type, reason);
        debug!(request_id = %self.request.request_id(), fault = %fault, "invocation marked for failover");
        self.request.failover(&fault);
        self.request.set_attribute(
            HEADER_LIVE_FAILOVER_HOPS,
            (self.live.failover_hops + 1).to_string(),
        );
        self.failover = Some(fault);
    }

    pub fn degrade(
        &self,
        fault_type: FaultType,
        reason: impl Into<String>,
        config: DegradeConfig,
    ) -> GovernanceError {
        let fault = self.fault(fault_type, reason);
        self.request.degrade(fault, config)
    }

    pub fn failover_fault(&self) -> Option<&Fault> {
        self.failover.as_ref()
    }

    pub fn unit_action(&self) -> Option<&UnitAction> {
        self.unit_action.as_ref()
    }

    pub fn set_unit_action(&mut self, action: UnitAction) {
        self.unit_action = Some(action);
    }

    pub fn cell_action(&self) -> Option<&CellAction> {
        self.cell_action.as_ref()
    }

    pub fn set_cell_action(&mut self, action: CellAction) {
        self.cell_action = Some(action);
    }
}
