//! Error types for the core module.

use thiserror::Error;

use crate::stage::WorkflowStage;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur during core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: WorkflowStage, to: WorkflowStage },

    #[error("Invalid workflow state: {0}")]
    InvalidState(String),

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service type mismatch for {name}: expected {expected}")]
    ServiceTypeMismatch { name: String, expected: &'static str },

    #[error("Circular dependency while resolving: {0}")]
    CircularDependency(String),

    #[error("Service construction failed: {name} - {message}")]
    ServiceConstruction { name: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Create a service construction error.
    pub fn construction(name: impl Into<String>, message: impl ToString) -> Self {
        Self::ServiceConstruction {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
