mod action;
mod cluster;
mod context;
mod engine;
mod fault;
mod function;
mod invocation;
mod metadata;
mod parser;
mod pipeline;
mod routing;
mod tag;
mod types;

pub mod filter;
pub mod route;

pub use action::{CellAction, CellActionType, UnitAction, UnitActionType};
pub use cluster::{EndpointCaller, FailoverInvoker, Routed};
pub use context::{GovernanceContext, Readiness};
pub use engine::{EngineBuilder, GovernanceEngine};
pub use fault::{Fault, FaultContext, FaultType, GovernanceError};
pub use filter::{FilterChain, InboundFilter, Invoker};
pub use function::{
    FunctionRegistry, HashModFunction, SourceVariableParser, UnitFunction, VariableParser,
    DEFAULT_VARIABLE_PARSER, HASH_MOD_FUNCTION,
};
pub use invocation::{Invocation, InvocationProfile};
pub use metadata::{LaneMetadata, LiveMetadata, PolicyId, ServiceMetadata};
pub use parser::{
    InheritedLaneParser, InheritedLiveParser, LaneParser, LiveParser, ParseContext, ParserSet,
    RequestLaneParser, RequestLiveParser, ServiceParser, TreeServiceParser,
};
pub use pipeline::{FilterKey, FilterPipeline};
pub use route::{LoadBalancer, RouteChain, RouteFilter, RouteTarget};
pub use routing::{decide_cell, decide_unit, RouteState};
pub use tag::{TagMatcher, TagMatcherRegistry};
pub use types::{
    Endpoint, GovernedRequest, RequestEnvelope, HEADER_LANE, HEADER_LANE_SPACE_ID,
    HEADER_LIVE_CELL, HEADER_LIVE_FAILOVER, HEADER_LIVE_FAILOVER_HOPS, HEADER_LIVE_RULE_ID,
    HEADER_LIVE_SPACE_ID, HEADER_LIVE_UNIT, HEADER_LIVE_VARIABLE, HEADER_SERVICE_APPLICATION,
    HEADER_SERVICE_TOKEN,
};
