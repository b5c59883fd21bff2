//! Job coordinator.
//!
//! Owns the job lifecycle: it starts workflows, advances them as stages
//! finish and enqueues the tasks for newly active stages. Updates to job
//! records are serialized through a single mutex so concurrent parallel
//! stages cannot lose each other's progress.

use std::collections::HashMap;
use std::sync::Arc;

use bus_core::{WorkflowStage, WorkflowStateMachine};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{WorkerError, WorkerResult};
use crate::queue::TaskQueue;
use crate::store::JobStore;
use crate::task::{JobRecord, TaskPayload, TaskRecord, TaskStatus};

pub struct JobCoordinator {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn TaskQueue>,
    lock: Mutex<()>,
}

impl JobCoordinator {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            store,
            queue,
            lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// Create a job, start its workflow and enqueue the first stage.
    pub async fn submit(
        &self,
        requirement: impl Into<String>,
        project_name: impl Into<String>,
        options: HashMap<String, String>,
    ) -> WorkerResult<JobRecord> {
        let requirement = requirement.into();
        if requirement.trim().is_empty() {
            return Err(WorkerError::InvalidTask("requirement must not be empty".to_string()));
        }

        let mut job = JobRecord::new(requirement, project_name, options);
        let skipped = job.skipped_stages()?;
        job.workflow = WorkflowStateMachine::new(job.id).with_skipped(skipped)?;
        let active = job.workflow.start()?;
        job.touch();

        let _guard = self.lock.lock().await;
        self.store.create_job(&job).await?;
        self.enqueue_stages(&job, &active).await?;

        info!(
            "Submitted job {} for '{}' ({} stages queued)",
            job.id,
            job.project_name,
            active.len()
        );
        Ok(job)
    }

    /// Record that a worker picked up `task`.
    pub async fn on_task_started(&self, task: &TaskPayload) -> WorkerResult<()> {
        let _guard = self.lock.lock().await;
        self.store
            .record_task(&TaskRecord::new(task, TaskStatus::Running))
            .await
    }

    /// Complete the task's stage and enqueue whatever it unblocked.
    pub async fn on_stage_succeeded(&self, task: &TaskPayload) -> WorkerResult<Vec<WorkflowStage>> {
        let _guard = self.lock.lock().await;
        let mut job = self.load(task.job_id).await?;
        if job.workflow.is_terminal() {
            debug!(
                "Job {} is {}; ignoring completion of {}",
                job.id, job.status, task.stage
            );
            return Ok(Vec::new());
        }

        let next = job.workflow.complete_stage(task.stage)?;
        job.touch();
        self.store.update_job(&job).await?;
        self.enqueue_stages(&job, &next).await?;

        if job.workflow.is_terminal() {
            info!("Job {} finished with status {}", job.id, job.status);
        } else if !next.is_empty() {
            let names: Vec<&str> = next.iter().map(|s| s.as_str()).collect();
            info!("Job {} advanced to {}", job.id, names.join(", "));
        }
        Ok(next)
    }

    /// Fail the job at the task's stage.
    pub async fn on_stage_failed(&self, task: &TaskPayload, error: &str) -> WorkerResult<()> {
        let _guard = self.lock.lock().await;
        let mut job = self.load(task.job_id).await?;
        if job.workflow.is_terminal() {
            return Ok(());
        }

        job.workflow.fail_stage(task.stage, error)?;
        job.error = Some(format!("{}: {}", task.stage, error));
        job.touch();
        self.store.update_job(&job).await?;
        warn!("Job {} failed at {}: {}", job.id, task.stage, error);
        Ok(())
    }

    /// Cancel a job. Tasks already queued are skipped when dequeued.
    pub async fn cancel(&self, job_id: Uuid) -> WorkerResult<JobRecord> {
        let _guard = self.lock.lock().await;
        let mut job = self.load(job_id).await?;
        job.workflow.cancel();
        job.touch();
        self.store.update_job(&job).await?;
        info!("Job {} cancelled", job_id);
        Ok(job)
    }

    pub async fn job(&self, job_id: Uuid) -> WorkerResult<JobRecord> {
        self.load(job_id).await
    }

    /// Whether `task` is stale: its job is finished or its stage is no
    /// longer active.
    pub async fn should_skip(&self, task: &TaskPayload) -> WorkerResult<bool> {
        match self.store.get_job(task.job_id).await? {
            Some(job) => Ok(job.workflow.is_terminal() || !job.workflow.is_active(task.stage)),
            None => {
                warn!("Task {} references unknown job {}", task.task_id, task.job_id);
                Ok(true)
            }
        }
    }

    async fn load(&self, job_id: Uuid) -> WorkerResult<JobRecord> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(WorkerError::JobNotFound(job_id))
    }

    async fn enqueue_stages(&self, job: &JobRecord, stages: &[WorkflowStage]) -> WorkerResult<()> {
        for stage in stages {
            let task = TaskPayload::for_stage(job, *stage)?;
            self.queue.enqueue(&task).await?;
            self.store
                .record_task(&TaskRecord::new(&task, TaskStatus::Queued))
                .await?;
        }
        Ok(())
    }
}
