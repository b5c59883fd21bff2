//! Error types for the worker crate.

use thiserror::Error;
use uuid::Uuid;

use bus_agents::AgentError;
use bus_core::CoreError;
use bus_memory::MemoryError;

/// Result type alias for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors raised by queues, stores, the coordinator and workers.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl WorkerError {
    /// Whether the task that hit this error may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Agent(e) => e.is_transient(),
            Self::Queue(_) | Self::CircuitOpen(_) | Self::Redis(_) | Self::Database(_) => true,
            Self::Memory(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
