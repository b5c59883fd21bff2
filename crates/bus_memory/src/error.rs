//! Error types for memory stores.

use thiserror::Error;

use bus_core::CoreError;

/// Result type alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors that can occur in memory stores.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Backend error ({backend}): {message}")]
    Backend { backend: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl MemoryError {
    /// Create a backend error.
    pub fn backend(backend: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
