use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Forward,
    Reject,
    Failover,
    Degrade,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrafficEvent {
    pub action: ActionType,
    pub component: String,
    pub direction: Direction,
    pub request_id: String,
    pub live_space_id: Option<String>,
    pub unit_rule_id: Option<String>,
    pub unit: Option<String>,
    pub cell: Option<String>,
    pub lane_space_id: Option<String>,
    pub lane: Option<String>,
    pub application: Option<String>,
    pub service: Option<String>,
    pub group: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub fault_type: Option<String>,
    pub reason: Option<String>,
}

impl TrafficEvent {
    pub fn new(action: ActionType, direction: Direction, request_id: impl Into<String>) -> Self {
        Self {
            action,
            component: String::new(),
            direction,
            request_id: request_id.into(),
            live_space_id: None,
            unit_rule_id: None,
            unit: None,
            cell: None,
            lane_space_id: None,
            lane: None,
            application: None,
            service: None,
            group: None,
            path: None,
            method: None,
            fault_type: None,
            reason: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum GovernanceEvent {
    Traffic(TrafficEvent),
    /// A service's policy did not become ready in time.
    Readiness { service: String, reason: String },
}

/// Publish-only sink. `offer` never blocks and may drop.
pub trait EventSink: Send + Sync {
    fn offer(&self, event: GovernanceEvent) -> bool;
}

pub struct ChannelEventSink {
    sender: mpsc::Sender<GovernanceEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<GovernanceEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub fn shared(capacity: usize) -> (Arc<Self>, mpsc::Receiver<GovernanceEvent>) {
        let (sink, receiver) = Self::new(capacity);
        (Arc::new(sink), receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn offer(&self, event: GovernanceEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "governance event dropped");
                false
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<GovernanceEvent>>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn list(&self) -> Vec<GovernanceEvent> {
        self.events.lock().clone()
    }

    pub fn traffic(&self) -> Vec<TrafficEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                GovernanceEvent::Traffic(traffic) => Some(traffic.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn offer(&self, event: GovernanceEvent) -> bool {
        self.events.lock().push(event);
        true
    }
}
