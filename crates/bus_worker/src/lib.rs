//! # bus_worker
//!
//! Job coordination and task execution for agent_bus.
//!
//! A submitted job becomes a [`JobRecord`] whose workflow state machine
//! decides which stages run next. Each runnable stage is sent as a
//! [`TaskPayload`] through a [`TaskQueue`] (Redis in production, in-process
//! for local runs). [`Worker`]s pull tasks, run the stage agent and report
//! back to the [`JobCoordinator`], which advances the workflow and enqueues
//! the following stages.
//!
//! # Example
//!
//! ```rust,ignore
//! use bus_worker::{build_local_container, Runtime};
//!
//! let runtime = Runtime::from_container(&build_local_container(settings)).await?;
//! let job = runtime.coordinator.submit("A todo app", "todo", HashMap::new()).await?;
//! while runtime.worker.run_once(Duration::from_millis(100)).await?.is_some() {}
//! ```

pub mod coordinator;
pub mod error;
pub mod postgres_store;
pub mod queue;
pub mod redis_queue;
pub mod services;
pub mod store;
pub mod task;
pub mod worker;

// Re-export main types for convenience
pub use coordinator::JobCoordinator;
pub use error::{WorkerError, WorkerResult};
pub use postgres_store::PostgresJobStore;
pub use queue::{InMemoryTaskQueue, TaskQueue};
pub use redis_queue::{result_key, RedisTaskQueue};
pub use services::{build_container, build_local_container, Runtime};
pub use store::{InMemoryJobStore, JobStore};
pub use task::{parse_skip, JobRecord, TaskPayload, TaskRecord, TaskResult, TaskStatus, SKIP_OPTION};
pub use worker::{Worker, WorkerConfig};
