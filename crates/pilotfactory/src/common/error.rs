use thiserror::Error;

/// Errors surfaced by the batch-state engine.
///
/// None of them is fatal to the daemon: a failed query or parse skips the current cycle,
/// a failed control command is counted and the batch continues, and a failed submission
/// is handed back to the caller.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("Batch query `{command}` failed: {reason}")]
    QueryFailed { command: String, reason: String },
    #[error("Cannot parse batch query response: {0}")]
    ParseFailed(String),
    #[error("Control command for host {host} failed: {reason}")]
    ControlCommandFailed { host: String, reason: String },
    #[error("Submission failed with exit code {exit_code}: {stderr}")]
    SubmissionFailed { exit_code: i32, stderr: String },
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl FactoryError {
    /// Query and parse failures only invalidate the current cycle.
    pub fn is_cycle_local(&self) -> bool {
        matches!(
            self,
            FactoryError::QueryFailed { .. } | FactoryError::ParseFailed(_)
        )
    }
}

impl From<toml::de::Error> for FactoryError {
    fn from(error: toml::de::Error) -> Self {
        Self::ConfigError(error.to_string())
    }
}
