use std::path::Path;
use std::sync::Arc;

use control_plane::{
    ChannelEventSink, GovernanceConfig, GovernanceEvent, GovernancePolicy, InMemoryPolicySupervisor, SystemConfig,
    SystemConfigLoader,
};
use kernel::{Endpoint, GovernanceEngine, RequestEnvelope};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::CliError;

pub fn load_config(path: &Path) -> Result<(String, SystemConfig), CliError> {
    let raw = std::fs::read_to_string(path)?;
    let config = SystemConfigLoader::from_str(&raw)?;
    Ok((raw, config))
}

pub fn create_default_config(path: &Path) -> Result<String, CliError> {
    let content = default_config_template();
    std::fs::write(path, content.as_bytes())?;
    Ok(content)
}

pub fn default_config_template() -> String {
    let lines = [
        "app = { name = \"governor\", service = \"\" }",
        "location = { live_space_id = \"\", unit = \"\", cell = \"\" }",
        "live = { enabled = true, gateway = false, max_failover_hops = 1 }",
        "lane = { enabled = false }",
        "flow_control = { enabled = true, concurrency_limiter = \"semaphore\", rate_limiter = \"fixed_window\" }",
        "governance = { initialize_timeout_ms = 10000, sync_sources = \"\" }",
        "event = { capacity = 1024 }",
        "filter = { inbound = \"\" }",
    ];
    format!("{}\n", lines.join("\n"))
}

pub fn load_policy(path: &Path) -> Result<GovernancePolicy, CliError> {
    let raw = std::fs::read_to_string(path)?;
    GovernancePolicy::from_json(&raw).map_err(CliError::document("policy"))
}

pub fn load_request(path: &Path) -> Result<RequestEnvelope, CliError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(CliError::document("request"))
}

pub fn load_endpoints(path: &Path) -> Result<Vec<Endpoint>, CliError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(CliError::document("endpoints"))
}

pub struct EngineHandle {
    pub engine: GovernanceEngine,
    pub events: mpsc::Receiver<GovernanceEvent>,
}

impl EngineHandle {
    /// Logs every queued event and returns how many there were.
    pub fn drain_events(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.events.try_recv() {
            debug!(event = ?event, "governance event");
            count += 1;
        }
        count
    }
}

pub fn build_engine(config: &SystemConfig, policy: GovernancePolicy) -> EngineHandle {
    let config = GovernanceConfig::from_system(config);
    let (events, receiver) = ChannelEventSink::shared(config.event_capacity);
    let supervisor = Arc::new(
        InMemoryPolicySupervisor::new(config.sync_sources.clone())
            .with_policy(policy)
            .with_events(events.clone()),
    );
    info!(
        application = %config.application.name,
        sync_sources = supervisor.sources().len(),
        "building governance engine"
    );
    let engine = GovernanceEngine::builder(config, supervisor)
        .with_events(events.clone())
        .build();
    EngineHandle {
        engine,
        events: receiver,
    }
}
