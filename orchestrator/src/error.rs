//! Orchestrator error types

use thiserror::Error;

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Orchestrator error types
///
/// These are infrastructure failures (config, persistence, task plumbing).
/// Per-call provider failures are `shared::EvalError` and never surface here;
/// they become triple-level outcomes instead.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Checkpoint store error: {message}")]
    CheckpointError { message: String },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl OrchestratorError {
    pub fn config(message: impl Into<String>) -> Self {
        OrchestratorError::ConfigError {
            message: message.into(),
        }
    }

    pub fn checkpoint(message: impl Into<String>) -> Self {
        OrchestratorError::CheckpointError {
            message: message.into(),
        }
    }
}
