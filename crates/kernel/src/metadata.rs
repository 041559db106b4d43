use std::fmt;
use std::sync::Arc;

use control_plane::{
    Cell, LaneSpace, LiveSpace, Service, ServicePolicy, ServiceType, Unit, UnitPolicy, UnitRule,
};
use serde::Serialize;

/// Identifies the service tree node an invocation resolved to.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub struct PolicyId {
    pub service: String,
    pub group: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service://{}", self.service)?;
        for (name, value) in [
            ("group", &self.group),
            ("path", &self.path),
            ("method", &self.method),
        ] {
            if let Some(value) = value {
                write!(f, ";{name}={value}")?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ServiceMetadata {
    pub service_name: String,
    pub group: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub service_type: ServiceType,
    pub service: Option<Arc<Service>>,
    /// The most specific policy found, with unset fields inherited.
    pub policy: Arc<ServicePolicy>,
    pub unit_policy: UnitPolicy,
    pub write_protect: bool,
}

impl ServiceMetadata {
    pub fn policy_id(&self) -> PolicyId {
        PolicyId {
            service: self.service_name.clone(),
            group: self.group.clone(),
            path: self.path.clone(),
            method: self.method.clone(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LiveMetadata {
    pub local_space_id: Option<String>,
    pub target_space_id: Option<String>,
    pub live_space: Option<Arc<LiveSpace>>,
    pub rule_id: Option<String>,
    pub variable: Option<String>,
    pub local_unit: Option<String>,
    pub local_cell: Option<String>,
    pub current_unit: Option<String>,
    pub current_cell: Option<String>,
    pub center_unit: Option<String>,
    pub failover_hops: u32,
}

impl LiveMetadata {
    pub fn live_space(&self) -> Option<&LiveSpace> {
        self.live_space.as_deref()
    }

    pub fn rule(&self) -> Option<&UnitRule> {
        let rule_id = self.rule_id.as_deref()?;
        self.live_space()?.unit_rule(rule_id)
    }

    pub fn unit(&self, code: Option<&str>) -> Option<&Unit> {
        self.live_space()?.unit(code?)
    }

    pub fn local_unit(&self) -> Option<&Unit> {
        self.unit(self.local_unit.as_deref())
    }

    pub fn current_unit(&self) -> Option<&Unit> {
        self.unit(self.current_unit.as_deref())
    }

    pub fn current_cell(&self) -> Option<&Cell> {
        self.current_unit()?.cell(self.current_cell.as_deref()?)
    }

    pub fn local_cell(&self) -> Option<&Cell> {
        self.local_unit()?.cell(self.local_cell.as_deref()?)
    }

    pub fn center(&self) -> Option<&Unit> {
        self.live_space()?.center()
    }
}

#[derive(Clone, Debug, Default)]
pub struct LaneMetadata {
    pub lane_space_id: Option<String>,
    pub lane_space: Option<Arc<LaneSpace>>,
    pub local_lane: Option<String>,
    pub target_lane: Option<String>,
}

impl LaneMetadata {
    pub fn default_lane(&self) -> Option<&str> {
        self.lane_space
            .as_deref()
            .and_then(LaneSpace::default_lane)
            .map(|lane| lane.code.as_str())
    }
}
