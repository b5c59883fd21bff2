//! # bus_core
//!
//! Core building blocks for agent_bus.
//!
//! This crate provides the workflow stage table and per-job state machine,
//! the circuit breakers that guard external dependencies, the lazy service
//! container and the settings shared by every other crate.
//!
//! # Architecture
//!
//! - **Stages**: The static transition table over the 14 workflow stages
//! - **State machine**: Per-job progress through the table, including the
//!   parallel phase after development and its join on delivery
//! - **Circuit breakers**: Named breakers for the LLM, Redis and vector store
//! - **Container**: Lazy singleton/transient service factories
//! - **Settings**: File + environment configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use bus_core::{WorkflowStage, WorkflowStateMachine};
//!
//! let mut workflow = WorkflowStateMachine::new(job_id);
//! let active = workflow.start()?;
//! assert_eq!(active, vec![WorkflowStage::PrdGeneration]);
//!
//! let next = workflow.complete_stage(WorkflowStage::PrdGeneration)?;
//! assert_eq!(next, vec![WorkflowStage::Planning]);
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod container;
pub mod error;
pub mod stage;
pub mod state_machine;

// Re-export main types for convenience
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitBreakerStats, CircuitState, LLM_BREAKER, REDIS_BREAKER, VECTOR_STORE_BREAKER,
};
pub use config::{
    BreakerSettings, EmbeddingProvider, FallbackPolicy, LlmProviderKind, LlmSettings,
    MemoryBackend, MemorySettings, PostgresSettings, RedisSettings, Settings, WorkerSettings,
};
pub use container::{services, Lifetime, ServiceContainer};
pub use error::{CoreError, CoreResult};
pub use stage::{AgentRole, ArtifactKind, WorkflowStage, PARALLEL_STAGES, WORK_STAGE_COUNT};
pub use state_machine::{StageTransition, WorkflowStateMachine, WorkflowStatus};
