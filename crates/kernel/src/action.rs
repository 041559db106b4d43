use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitActionType {
    Forward,
    Reject,
    RejectEscaped,
    Failover,
    FailoverCenter,
}

impl UnitActionType {
    pub fn is_failover(&self) -> bool {
        matches!(self, UnitActionType::Failover | UnitActionType::FailoverCenter)
    }

    pub fn is_reject(&self) -> bool {
        matches!(self, UnitActionType::Reject | UnitActionType::RejectEscaped)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UnitAction {
    #[serde(rename = "type")]
    pub action_type: UnitActionType,
    #[serde(default)]
    pub message: Option<String>,
}

impl UnitAction {
    pub fn new(action_type: UnitActionType, message: Option<String>) -> Self {
        Self {
            action_type,
            message,
        }
    }

    pub fn forward() -> Self {
        Self::new(UnitActionType::Forward, None)
    }

    pub fn reject(message: impl Into<String>) -> Self {
        Self::new(UnitActionType::Reject, Some(message.into()))
    }

    pub fn reject_escaped(message: impl Into<String>) -> Self {
        Self::new(UnitActionType::RejectEscaped, Some(message.into()))
    }

    pub fn failover(message: impl Into<String>) -> Self {
        Self::new(UnitActionType::Failover, Some(message.into()))
    }

    pub fn failover_center(message: impl Into<String>) -> Self {
        Self::new(UnitActionType::FailoverCenter, Some(message.into()))
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CellActionType {
    Forward,
    Failover,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CellAction {
    #[serde(rename = "type")]
    pub action_type: CellActionType,
    #[serde(default)]
    pub message: Option<String>,
}

impl CellAction {
    pub fn forward() -> Self {
        Self {
            action_type: CellActionType::Forward,
            message: None,
        }
    }

    pub fn failover(message: impl Into<String>) -> Self {
        Self {
            action_type: CellActionType::Failover,
            message: Some(message.into()),
        }
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}
