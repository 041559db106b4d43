mod error;
mod state;

use std::path::PathBuf;

use async_trait::async_trait;
use clap::Parser;
use control_plane::ActionType;
use kernel::{CellAction, Endpoint, Fault, GovernanceError, Invocation, Invoker, UnitAction};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::CliError;
use crate::state::{build_engine, create_default_config, load_config, load_endpoints, load_policy, load_request};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "governor.toml")]
    config: PathBuf,
    #[arg(long)]
    policy: PathBuf,
    #[arg(long)]
    request: PathBuf,
    /// Candidate endpoints; when given, an outbound call is routed as well.
    #[arg(long)]
    endpoints: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Decision {
    outcome: ActionType,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_action: Option<UnitAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cell_action: Option<CellAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fault: Option<Fault>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<Endpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Decision {
    fn new(invocation: &Invocation, result: &Result<(), GovernanceError>) -> Self {
        let (outcome, status, fault, error) = match result {
            Ok(()) => (ActionType::Forward, 200, None, None),
            Err(err) => {
                let outcome = match err {
                    GovernanceError::Failover(_) => ActionType::Failover,
                    GovernanceError::Degraded { .. } => ActionType::Degrade,
                    _ => ActionType::Reject,
                };
                (outcome, err.status(), err.fault().cloned(), Some(err.to_string()))
            }
        };
        Self {
            outcome,
            status,
            unit_action: invocation.unit_action().cloned(),
            cell_action: invocation.cell_action().cloned(),
            fault,
            endpoint: None,
            error,
        }
    }
}

/// Stands in for the business handler; evaluation stops at the decision.
struct Accept;

#[async_trait]
impl Invoker for Accept {
    async fn invoke(&self, invocation: &mut Invocation) -> Result<(), GovernanceError> {
        debug!(request_id = %invocation.request().request_id(), "request accepted");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if !args.config.exists() {
        warn!("config file missing, creating default config");
        create_default_config(&args.config)?;
    }

    let (_, config) = load_config(&args.config)?;
    let policy = load_policy(&args.policy)?;
    let request = load_request(&args.request)?;
    let mut handle = build_engine(&config, policy);
    let engine = &handle.engine;

    engine
        .wait_ready(&[request.service.clone()])
        .await
        .map_err(CliError::from)?;

    engine.start();

    let mut inbound = engine.inbound_invocation(Box::new(request.clone()));
    let result = engine.inbound(&mut inbound, &Accept).await;
    let mut decision = Decision::new(&inbound, &result);

    if let (Ok(()), Some(path)) = (&result, args.endpoints.as_ref()) {
        let endpoints = load_endpoints(path)?;
        let outbound = engine.outbound_invocation(Box::new(request), Some(&inbound));
        match engine.route(&outbound, endpoints) {
            Ok(target) => decision.endpoint = target.endpoint().cloned(),
            Err(err) => {
                decision.outcome = ActionType::Reject;
                decision.status = err.status();
                decision.fault = err.fault().cloned();
                decision.error = Some(err.to_string());
            }
        }
    }

    engine.stop();
    debug!(events = handle.drain_events(), "governance events recorded");
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}
