//! Worker pool.
//!
//! A worker pulls tasks off the queue and runs up to `concurrency` agents
//! at once. Each task ends with a published [`TaskResult`], a task record
//! and an ack. Transient failures are re-enqueued with exponential backoff;
//! the retry waits outside the concurrency limit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bus_agents::{AgentRegistry, AgentServices};
use bus_core::WorkerSettings;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::coordinator::JobCoordinator;
use crate::error::{WorkerError, WorkerResult};
use crate::queue::TaskQueue;
use crate::task::{TaskPayload, TaskRecord, TaskResult, TaskStatus};

/// Worker tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// Total attempts per task, including the first.
    pub max_attempts: u32,
    /// Base retry delay, doubled per attempt.
    pub retry_backoff: Duration,
    pub poll_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_settings(&WorkerSettings::default())
    }
}

impl WorkerConfig {
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            concurrency: settings.concurrency.max(1),
            max_attempts: settings.max_attempts.max(1),
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
            poll_timeout: Duration::from_secs(settings.poll_timeout_secs.max(1)),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Delay before re-enqueueing a task that failed on `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Pulls tasks and runs the matching agents.
#[derive(Clone)]
pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    coordinator: Arc<JobCoordinator>,
    registry: Arc<AgentRegistry>,
    services: AgentServices,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        coordinator: Arc<JobCoordinator>,
        registry: Arc<AgentRegistry>,
        services: AgentServices,
    ) -> Self {
        Self {
            queue: coordinator.queue().clone(),
            coordinator,
            registry,
            services,
            config: WorkerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Process tasks until `shutdown` turns true or its sender is dropped,
    /// then wait for in-flight tasks.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        let recovered = self.queue.recover_in_flight().await?;
        info!(
            "Worker started (concurrency={}, queue={}, recovered={})",
            self.config.concurrency,
            self.queue.backend(),
            recovered
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut join_set: JoinSet<()> = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }
            while let Some(joined) = join_set.try_join_next() {
                reap(joined);
            }

            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|e| WorkerError::Queue(format!("worker semaphore closed: {}", e)))?,
            };

            let dequeued = tokio::select! {
                _ = shutdown.changed() => break,
                dequeued = self.queue.dequeue(self.config.poll_timeout) => dequeued,
            };

            match dequeued {
                Ok(Some(task)) => {
                    let worker = self.clone();
                    join_set.spawn(async move {
                        let _permit = permit;
                        worker.process(task).await;
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Dequeue failed: {}", e);
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.config.poll_timeout) => {}
                    }
                }
            }
        }

        if !join_set.is_empty() {
            info!("Shutting down; waiting for {} in-flight tasks", join_set.len());
        }
        while let Some(joined) = join_set.join_next().await {
            reap(joined);
        }
        info!("Worker stopped");
        Ok(())
    }

    /// Dequeue and process a single task inline.
    pub async fn run_once(&self, timeout: Duration) -> WorkerResult<Option<TaskResult>> {
        match self.queue.dequeue(timeout).await? {
            Some(task) => self.handle(task).await.map(Some),
            None => Ok(None),
        }
    }

    async fn process(&self, task: TaskPayload) {
        let task_id = task.task_id;
        let stage = task.stage;
        if let Err(e) = self.handle(task).await {
            error!("Task {} ({}) could not be processed: {}", task_id, stage, e);
        }
    }

    async fn handle(&self, task: TaskPayload) -> WorkerResult<TaskResult> {
        if self.coordinator.should_skip(&task).await? {
            debug!("Skipping stale task {} ({})", task.task_id, task.stage);
            let result = TaskResult::new(&task, TaskStatus::Skipped);
            self.finish(&task, &result).await?;
            return Ok(result);
        }

        let Some(agent) = self.registry.for_stage(task.stage) else {
            let message = format!("no agent registered for stage {}", task.stage);
            self.coordinator.on_stage_failed(&task, &message).await?;
            let result = TaskResult::new(&task, TaskStatus::Failed).with_error(message);
            self.finish(&task, &result).await?;
            return Ok(result);
        };

        self.coordinator.on_task_started(&task).await?;
        info!(
            "Running {} for job {} (task {}, attempt {})",
            task.stage, task.job_id, task.task_id, task.attempt
        );

        let started = Instant::now();
        let outcome = agent.execute(&self.services, &task.agent_task()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut retry = None;
        let result = match outcome {
            Ok(output) => {
                self.coordinator.on_stage_succeeded(&task).await?;
                TaskResult::new(&task, TaskStatus::Succeeded).with_artifact(output.artifact.id)
            }
            Err(e) if e.is_transient() && task.attempt + 1 < self.config.max_attempts => {
                let delay = self.config.backoff_for(task.attempt);
                warn!(
                    "Task {} ({}) failed on attempt {}, retrying in {:?}: {}",
                    task.task_id, task.stage, task.attempt, delay, e
                );
                retry = Some(delay);
                TaskResult::new(&task, TaskStatus::Retrying).with_error(e.to_string())
            }
            Err(e) => {
                let message = e.to_string();
                self.coordinator.on_stage_failed(&task, &message).await?;
                TaskResult::new(&task, TaskStatus::Failed).with_error(message)
            }
        }
        .with_duration(duration_ms);

        self.finish(&task, &result).await?;
        if let Some(delay) = retry {
            self.schedule_retry(task.retry(), delay);
        }
        Ok(result)
    }

    /// Publish, record and ack.
    async fn finish(&self, task: &TaskPayload, result: &TaskResult) -> WorkerResult<()> {
        self.queue.publish_result(result).await?;
        self.coordinator
            .store()
            .record_task(&TaskRecord::from_result(result, task.enqueued_at))
            .await?;
        self.queue.ack(task).await
    }

    fn schedule_retry(&self, task: TaskPayload, delay: Duration) {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.enqueue(&task).await {
                error!("Failed to re-enqueue task {}: {}", task.task_id, e);
            }
        });
    }
}

fn reap(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!("Worker task panicked: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let config = WorkerConfig::default().with_retry_backoff(Duration::from_millis(100));
        assert_eq!(config.backoff_for(0), Duration::from_millis(100));
        assert_eq!(config.backoff_for(1), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_config_from_settings() {
        let settings = WorkerSettings {
            concurrency: 0,
            max_attempts: 5,
            retry_backoff_ms: 250,
            poll_timeout_secs: 2,
        };
        let config = WorkerConfig::from_settings(&settings);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_backoff, Duration::from_millis(250));
        assert_eq!(config.poll_timeout, Duration::from_secs(2));
    }
}
