use control_plane::{
    Cell, LiveSpace, Place, Unit, UnitPolicy, UnitRule, VariableMissingAction,
};

use crate::action::{CellAction, UnitAction};
use crate::function::FunctionRegistry;
use crate::invocation::Invocation;

/// The inputs of the unit and cell decisions, borrowed from one invocation.
#[derive(Clone, Copy, Debug)]
pub struct RouteState<'a> {
    pub gateway: bool,
    pub live_enabled: bool,
    pub write: bool,
    pub unit_policy: UnitPolicy,
    pub local_space_id: Option<&'a str>,
    pub target_space_id: Option<&'a str>,
    pub space: Option<&'a LiveSpace>,
    pub rule: Option<&'a UnitRule>,
    pub variable: Option<&'a str>,
    pub unit: Option<&'a Unit>,
    pub cell: Option<&'a Cell>,
    pub failover_hops: u32,
    pub max_failover_hops: u32,
}

impl<'a> RouteState<'a> {
    pub fn from_invocation(invocation: &'a Invocation) -> Self {
        let live = invocation.live();
        let config = invocation.config();
        Self {
            gateway: invocation.is_gateway(),
            live_enabled: config.live_enabled,
            write: invocation.is_write(),
            unit_policy: invocation.service().unit_policy,
            local_space_id: live.local_space_id.as_deref(),
            target_space_id: live.target_space_id.as_deref(),
            space: live.live_space(),
            rule: live.rule(),
            variable: live.variable.as_deref(),
            unit: live.current_unit(),
            cell: live.current_cell(),
            failover_hops: live.failover_hops,
            max_failover_hops: config.max_failover_hops,
        }
    }

    fn accessible(&self, place: Option<&dyn Place>) -> bool {
        place.map_or(false, |place| place.accessible(self.write))
    }

    fn center(&self) -> Option<&'a Unit> {
        self.space.and_then(LiveSpace::center)
    }
}

/// Classifies a call for the unit dimension. Branches are checked in order and
/// the first match wins.
pub fn decide_unit(state: &RouteState<'_>, functions: &FunctionRegistry) -> UnitAction {
    let action = classify_unit(state, functions);
    if action.action_type.is_failover() && state.failover_hops >= state.max_failover_hops {
        return UnitAction::reject_escaped(format!(
            "{}, failover hops exhausted ({})",
            action.message(),
            state.failover_hops
        ));
    }
    action
}

fn classify_unit(state: &RouteState<'_>, functions: &FunctionRegistry) -> UnitAction {
    if let (false, Some(local), Some(target)) = (state.gateway, state.local_space_id, state.target_space_id) {
        if local != target {
            return UnitAction::reject("namespace not matched");
        }
    }
    if !state.live_enabled {
        return UnitAction::forward();
    }
    let Some(rule) = state.rule else {
        if state.local_space_id.is_none() || state.gateway {
            return UnitAction::forward();
        }
        return UnitAction::reject("no unit route");
    };
    let Some(unit) = state.unit else {
        return UnitAction::reject("no unit");
    };
    let accessible = state.accessible(Some(unit));

    match state.unit_policy {
        UnitPolicy::None => {
            if accessible {
                UnitAction::forward()
            } else {
                UnitAction::failover("unit not accessible")
            }
        }
        UnitPolicy::Center => center_only(unit, accessible),
        UnitPolicy::PreferLocalUnit => {
            if accessible {
                return UnitAction::forward();
            }
            match state.center() {
                Some(center) if center.code != unit.code && state.accessible(Some(center)) => {
                    UnitAction::failover_center("local unit not accessible")
                }
                _ => UnitAction::failover("local unit not accessible"),
            }
        }
        UnitPolicy::Rule => match state.variable {
            None => match rule.variable_missing_action {
                VariableMissingAction::Center => center_only(unit, accessible),
                VariableMissingAction::Reject => UnitAction::reject("no variable"),
            },
            Some(variable) => {
                let owned = rule
                    .unit_route(&unit.code)
                    .map_or(false, |route| functions.contains(rule, route, variable));
                if !owned {
                    UnitAction::failover("unit escape")
                } else if accessible {
                    UnitAction::forward()
                } else {
                    UnitAction::reject("unit not accessible")
                }
            }
        },
    }
}

fn center_only(unit: &Unit, accessible: bool) -> UnitAction {
    if !unit.is_center() {
        UnitAction::failover_center("center unit required")
    } else if accessible {
        UnitAction::forward()
    } else {
        UnitAction::reject("center unit not accessible")
    }
}

/// Classifies a call for the cell dimension. Only meaningful after a FORWARD
/// unit decision.
pub fn decide_cell(state: &RouteState<'_>) -> CellAction {
    let (Some(rule), Some(unit)) = (state.rule, state.unit) else {
        return CellAction::forward();
    };
    let Some(route) = rule.unit_route(&unit.code) else {
        return CellAction::forward();
    };
    let cell_code = state.cell.map(|cell| cell.code.as_str());
    if let Some(pinned) = state
        .variable
        .and_then(|variable| route.cell_route_by_variable(variable))
    {
        if Some(pinned.code.as_str()) != cell_code {
            return CellAction::failover("cell escape");
        }
    }
    let Some(cell) = state.cell else {
        return CellAction::forward();
    };
    match route.cell_route(&cell.code) {
        None => CellAction::forward(),
        Some(cell_route) => {
            if state.accessible(Some(cell)) && cell_route.access_mode.accessible(state.write) {
                CellAction::forward()
            } else {
                CellAction::failover("cell not accessible")
            }
        }
    }
}
