//! Error types for vigil

use thiserror::Error;

/// Result type alias using vigil Error
pub type Result<T> = std::result::Result<T, Error>;

/// Vigil error types
///
/// Correlation timeouts and ambiguous matches are verdicts, not errors;
/// they never appear here. Everything in this enum is a harness-level
/// failure that the flow driver records without letting it escape
/// `run_scenario`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Sidecar error: {0}")]
    Sidecar(String),

    #[error("App failed to start: {0}")]
    AppStartup(String),

    #[error("App health check failed after {attempts} attempts")]
    AppHealthCheck { attempts: usize },

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Correlation result already resolved for action {action}")]
    AlreadyResolved { action: String },

    #[error("Unknown action: {action}")]
    UnknownAction { action: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
