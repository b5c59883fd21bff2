//! Error types for agents module.

use thiserror::Error;

use bus_core::CoreError;
use bus_memory::MemoryError;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur during agent operations.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Agent execution failed: {agent} - {message}")]
    ExecutionFailed { agent: String, message: String },

    #[error("LLM not configured. Set ANTHROPIC_API_KEY or OPENAI_API_KEY")]
    LlmNotConfigured,

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("Artifact store error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AgentError {
    /// Create an execution failed error.
    pub fn execution_failed(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same task could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Llm(_)
                | Self::CircuitOpen(_)
                | Self::InvalidResponse(_)
                | Self::Validation(_)
                | Self::Database(_)
                | Self::Memory(_)
                | Self::Storage(_)
        )
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
