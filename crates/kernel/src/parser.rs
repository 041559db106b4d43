use std::sync::Arc;

use control_plane::{GovernanceConfig, GovernancePolicy, LiveSpace, ServicePolicy};

use crate::function::FunctionRegistry;
use crate::invocation::Invocation;
use crate::metadata::{LaneMetadata, LiveMetadata, ServiceMetadata};
use crate::tag::TagMatcherRegistry;
use crate::types::{
    GovernedRequest, HEADER_LANE, HEADER_LANE_SPACE_ID, HEADER_LIVE_CELL,
    HEADER_LIVE_FAILOVER_HOPS, HEADER_LIVE_RULE_ID, HEADER_LIVE_SPACE_ID, HEADER_LIVE_UNIT,
    HEADER_LIVE_VARIABLE,
};

/// Everything a parser may read. Parsers never modify any of it.
pub struct ParseContext<'a> {
    pub request: &'a dyn GovernedRequest,
    pub config: &'a GovernanceConfig,
    pub policy: &'a GovernancePolicy,
    pub functions: &'a FunctionRegistry,
    pub matchers: &'a TagMatcherRegistry,
    pub gateway: bool,
    /// The inbound call an outbound call is made on behalf of.
    pub inbound: Option<&'a Invocation>,
}

pub trait ServiceParser: Send + Sync {
    fn parse(&self, ctx: &ParseContext<'_>) -> ServiceMetadata;
}

pub trait LiveParser: Send + Sync {
    fn parse(&self, ctx: &ParseContext<'_>, service: &ServiceMetadata) -> LiveMetadata;
}

pub trait LaneParser: Send + Sync {
    fn parse(&self, ctx: &ParseContext<'_>, service: &ServiceMetadata) -> LaneMetadata;
}

#[derive(Clone)]
pub struct ParserSet {
    pub service: Arc<dyn ServiceParser>,
    pub live: Arc<dyn LiveParser>,
    pub lane: Arc<dyn LaneParser>,
}

impl ParserSet {
    pub fn inbound() -> Self {
        Self {
            service: Arc::new(TreeServiceParser),
            live: Arc::new(RequestLiveParser),
            lane: Arc::new(RequestLaneParser),
        }
    }

    pub fn outbound() -> Self {
        Self {
            service: Arc::new(TreeServiceParser),
            live: Arc::new(InheritedLiveParser),
            lane: Arc::new(InheritedLaneParser),
        }
    }
}

/// Walks service, group, path and method, keeping the most specific policy.
pub struct TreeServiceParser;

impl ServiceParser for TreeServiceParser {
    fn parse(&self, ctx: &ParseContext<'_>) -> ServiceMetadata {
        let request = ctx.request;
        let name = request.service().to_string();
        let Some(service) = ctx.policy.service(&name).cloned() else {
            return ServiceMetadata {
                service_name: name,
                group: request.group().map(str::to_string),
                path: Some(request.path().to_string()).filter(|path| !path.is_empty()),
                method: Some(request.method().to_string()).filter(|method| !method.is_empty()),
                ..Default::default()
            };
        };

        let mut policy: Arc<ServicePolicy> = service.effective_policy();
        let mut group_name = request.group().map(str::to_string);
        let mut path_name = None;
        let mut method_name = None;
        if let Some(group) = service.group(request.group()) {
            policy = group.effective_policy(&policy);
            group_name = Some(group.name.clone());
            if let Some(path) = group.path(request.path(), service.service_type) {
                policy = path.effective_policy(&policy);
                path_name = Some(path.path.clone());
                if let Some(method) = path.method(request.method()) {
                    policy = method.effective_policy(&policy);
                    method_name = Some(method.name.clone());
                }
            }
        }

        ServiceMetadata {
            service_name: name,
            group: group_name,
            path: path_name,
            method: method_name,
            service_type: service.service_type,
            unit_policy: policy.unit_policy(),
            write_protect: policy.write_protect(),
            policy,
            service: Some(service),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Resolves the live context of a request arriving at this instance.
pub struct RequestLiveParser;

impl RequestLiveParser {
    fn resolve(
        ctx: &ParseContext<'_>,
        service: &ServiceMetadata,
        inherited: Option<&LiveMetadata>,
    ) -> LiveMetadata {
        let request = ctx.request;
        let location = ctx.config.location();
        let local_space_id = location.live_space_id.clone();

        let domain = if ctx.gateway {
            request.host().and_then(|host| ctx.policy.domain(host))
        } else {
            None
        };

        let target_space_id = inherited
            .and_then(|live| live.target_space_id.clone())
            .or_else(|| non_empty(request.carrier(HEADER_LIVE_SPACE_ID)))
            .or_else(|| domain.map(|(space, _)| space.id.clone()))
            .or_else(|| local_space_id.clone());
        let live_space: Option<Arc<LiveSpace>> = target_space_id
            .as_deref()
            .and_then(|id| ctx.policy.live_space(id))
            .cloned();

        let rule_id = inherited
            .and_then(|live| live.rule_id.clone())
            .or_else(|| non_empty(request.carrier(HEADER_LIVE_RULE_ID)))
            .or_else(|| {
                domain
                    .and_then(|(_, domain)| domain.path(request.path()))
                    .and_then(|path| path.rule_id.clone())
            })
            .or_else(|| service.policy.unit_rule_id().map(str::to_string));

        let rule = live_space
            .as_deref()
            .zip(rule_id.as_deref())
            .and_then(|(space, id)| space.unit_rule(id));
        let variable = inherited
            .and_then(|live| live.variable.clone())
            .or_else(|| non_empty(request.carrier(HEADER_LIVE_VARIABLE)))
            .or_else(|| rule.and_then(|rule| ctx.functions.parse_variable(rule, request)));

        let local_unit = location.unit.clone().or_else(|| {
            live_space
                .as_deref()
                .and_then(LiveSpace::single_unit)
                .map(|unit| unit.code.clone())
        });
        let local_cell = location.cell.clone().or_else(|| {
            let space = live_space.as_deref()?;
            let unit = space.unit(local_unit.as_deref()?)?;
            match unit.cells.as_slice() {
                [cell] => Some(cell.code.clone()),
                _ => None,
            }
        });

        let (current_unit, current_cell) = if ctx.gateway && inherited.is_none() {
            (
                non_empty(request.carrier(HEADER_LIVE_UNIT)).or_else(|| local_unit.clone()),
                non_empty(request.carrier(HEADER_LIVE_CELL)).or_else(|| local_cell.clone()),
            )
        } else {
            (local_unit.clone(), local_cell.clone())
        };

        let failover_hops = request
            .carrier(HEADER_LIVE_FAILOVER_HOPS)
            .and_then(|value| value.trim().parse::<u32>().ok())
            .unwrap_or(0);

        LiveMetadata {
            local_space_id,
            target_space_id,
            center_unit: live_space
                .as_deref()
                .and_then(LiveSpace::center)
                .map(|unit| unit.code.clone()),
            live_space,
            rule_id,
            variable,
            local_unit,
            local_cell,
            current_unit,
            current_cell,
            failover_hops,
        }
    }
}

impl LiveParser for RequestLiveParser {
    fn parse(&self, ctx: &ParseContext<'_>, service: &ServiceMetadata) -> LiveMetadata {
        Self::resolve(ctx, service, None)
    }
}

/// Outbound calls reuse the space, rule and variable the inbound call
/// resolved instead of deriving them again.
pub struct InheritedLiveParser;

impl LiveParser for InheritedLiveParser {
    fn parse(&self, ctx: &ParseContext<'_>, service: &ServiceMetadata) -> LiveMetadata {
        let inherited = ctx.inbound.map(Invocation::live);
        RequestLiveParser::resolve(ctx, service, inherited)
    }
}

pub struct RequestLaneParser;

impl RequestLaneParser {
    fn resolve(ctx: &ParseContext<'_>, inherited: Option<&LaneMetadata>) -> LaneMetadata {
        let request = ctx.request;
        let location = ctx.config.location();
        let lane_space_id = inherited
            .and_then(|lane| lane.lane_space_id.clone())
            .or_else(|| non_empty(request.carrier(HEADER_LANE_SPACE_ID)))
            .or_else(|| location.lane_space_id.clone());
        let lane_space = lane_space_id
            .as_deref()
            .and_then(|id| ctx.policy.lane_space(id))
            .cloned();

        let requested = inherited
            .and_then(|lane| lane.target_lane.clone())
            .or_else(|| non_empty(request.carrier(HEADER_LANE)));
        let target_lane = match lane_space.as_deref() {
            Some(space) => requested
                .filter(|code| space.lane(code).is_some())
                .or_else(|| {
                    space
                        .ordered_rules()
                        .into_iter()
                        .find(|rule| ctx.matchers.matches_all(&rule.conditions, request))
                        .map(|rule| rule.lane.clone())
                })
                .or_else(|| space.default_lane().map(|lane| lane.code.clone())),
            None => requested,
        };

        LaneMetadata {
            lane_space_id,
            lane_space,
            local_lane: location.lane.clone(),
            target_lane,
        }
    }
}

impl LaneParser for RequestLaneParser {
    fn parse(&self, ctx: &ParseContext<'_>, _service: &ServiceMetadata) -> LaneMetadata {
        Self::resolve(ctx, None)
    }
}

pub struct InheritedLaneParser;

impl LaneParser for InheritedLaneParser {
    fn parse(&self, ctx: &ParseContext<'_>, _service: &ServiceMetadata) -> LaneMetadata {
        RequestLaneParser::resolve(ctx, ctx.inbound.map(Invocation::lane))
    }
}
