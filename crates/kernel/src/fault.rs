use std::fmt;

use control_plane::DegradeConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultType {
    Unauthorized,
    PermissionDenied,
    Limit,
    Unit,
    Cell,
    Unready,
    Authenticated,
    CircuitBreak,
}

impl FaultType {
    pub fn code(&self) -> &'static str {
        match self {
            FaultType::Unauthorized => "UNAUTHORIZED",
            FaultType::PermissionDenied => "PERMISSION_DENIED",
            FaultType::Limit => "LIMIT",
            FaultType::Unit => "UNIT",
            FaultType::Cell => "CELL",
            FaultType::Unready => "UNREADY",
            FaultType::Authenticated => "AUTHENTICATED",
            FaultType::CircuitBreak => "CIRCUIT_BREAK",
        }
    }

    /// Suggested protocol status for gateways mapping the fault.
    pub fn status(&self) -> u16 {
        match self {
            FaultType::Unauthorized => 401,
            FaultType::PermissionDenied | FaultType::Authenticated => 403,
            FaultType::Limit => 429,
            FaultType::Unit | FaultType::Cell | FaultType::Unready | FaultType::CircuitBreak => 503,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct FaultContext {
    pub live_space_id: Option<String>,
    pub rule_id: Option<String>,
    pub unit: Option<String>,
    pub cell: Option<String>,
    pub application: Option<String>,
    pub service: Option<String>,
    pub group: Option<String>,
    pub path: Option<String>,
    pub variable: Option<String>,
}

impl FaultContext {
    fn fields(&self) -> [(&'static str, Option<&str>); 9] {
        [
            ("live_space_id", self.live_space_id.as_deref()),
            ("rule_id", self.rule_id.as_deref()),
            ("unit", self.unit.as_deref()),
            ("cell", self.cell.as_deref()),
            ("application", self.application.as_deref()),
            ("service", self.service.as_deref()),
            ("group", self.group.as_deref()),
            ("path", self.path.as_deref()),
            ("variable", self.variable.as_deref()),
        ]
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub fault_type: FaultType,
    pub reason: String,
    #[serde(default)]
    pub context: FaultContext,
}

impl Fault {
    pub fn new(fault_type: FaultType, reason: impl Into<String>) -> Self {
        Self {
            fault_type,
            reason: reason.into(),
            context: FaultContext::default(),
        }
    }

    pub fn with_context(mut self, context: FaultContext) -> Self {
        self.context = context;
        self
    }

    pub fn status(&self) -> u16 {
        self.fault_type.status()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.fault_type.code(), self.reason)?;
        let mut first = true;
        for (name, value) in self.context.fields() {
            let Some(value) = value else {
                continue;
            };
            f.write_str(if first { " [" } else { ", " })?;
            write!(f, "{name}={value}")?;
            first = false;
        }
        if !first {
            f.write_str("]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("rejected: {0}")]
    Rejected(Fault),
    #[error("failover: {0}")]
    Failover(Fault),
    #[error("degraded: {fault}")]
    Degraded { fault: Fault, config: DegradeConfig },
    #[error("no available endpoint for {service}")]
    NoEndpoint { service: String },
    #[error("upstream {endpoint} failed: {message}")]
    Upstream {
        endpoint: String,
        message: String,
        retryable: bool,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl GovernanceError {
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            GovernanceError::Rejected(fault)
            | GovernanceError::Failover(fault)
            | GovernanceError::Degraded { fault, .. } => Some(fault),
            _ => None,
        }
    }

    pub fn fault_type(&self) -> Option<FaultType> {
        self.fault().map(|fault| fault.fault_type)
    }

    /// Whether another endpoint may be tried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GovernanceError::Upstream { retryable: true, .. })
    }

    pub fn status(&self) -> u16 {
        match self {
            GovernanceError::Degraded { config, .. } => config.status,
            GovernanceError::NoEndpoint { .. } => 503,
            GovernanceError::Upstream { .. } => 502,
            GovernanceError::Internal(_) => 500,
            other => other.fault().map(Fault::status).unwrap_or(500),
        }
    }
}
