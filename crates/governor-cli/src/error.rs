use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] control_plane::ConfigError),
    #[error("invalid {what} document: {source}")]
    Document {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("policy not ready: {0}")]
    Readiness(#[from] control_plane::ReadinessError),
}

impl CliError {
    pub fn document(what: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| CliError::Document { what, source }
    }
}
