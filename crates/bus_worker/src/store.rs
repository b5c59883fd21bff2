//! Job and task persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{WorkerError, WorkerResult};
use crate::task::{JobRecord, TaskRecord};

/// Persistence for jobs and their task history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &JobRecord) -> WorkerResult<()>;

    async fn get_job(&self, job_id: Uuid) -> WorkerResult<Option<JobRecord>>;

    /// Replace a stored job. Fails with `JobNotFound` for unknown ids.
    async fn update_job(&self, job: &JobRecord) -> WorkerResult<()>;

    /// Newest jobs first.
    async fn list_jobs(&self, limit: usize) -> WorkerResult<Vec<JobRecord>>;

    /// Insert or replace a task record by task id.
    async fn record_task(&self, task: &TaskRecord) -> WorkerResult<()>;

    /// Task records of a job in creation order.
    async fn list_tasks(&self, job_id: Uuid) -> WorkerResult<Vec<TaskRecord>>;
}

/// Job store held in process.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
    tasks: RwLock<Vec<TaskRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, job: &JobRecord) -> WorkerResult<()> {
        self.jobs.write().insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> WorkerResult<Option<JobRecord>> {
        Ok(self.jobs.read().get(&job_id).cloned())
    }

    async fn update_job(&self, job: &JobRecord) -> WorkerResult<()> {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(WorkerError::JobNotFound(job.id)),
        }
    }

    async fn list_jobs(&self, limit: usize) -> WorkerResult<Vec<JobRecord>> {
        let mut jobs: Vec<JobRecord> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn record_task(&self, task: &TaskRecord) -> WorkerResult<()> {
        let mut tasks = self.tasks.write();
        match tasks.iter_mut().find(|t| t.task_id == task.task_id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = task.clone();
                existing.created_at = created_at;
            }
            None => tasks.push(task.clone()),
        }
        Ok(())
    }

    async fn list_tasks(&self, job_id: Uuid) -> WorkerResult<Vec<TaskRecord>> {
        Ok(self
            .tasks
            .read()
            .iter()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_core::WorkflowStage;

    use crate::task::{TaskPayload, TaskStatus};

    #[tokio::test]
    async fn test_job_crud() {
        let store = InMemoryJobStore::new();
        let mut job = JobRecord::new("todo app", "todo", HashMap::new());
        assert!(matches!(
            store.update_job(&job).await,
            Err(WorkerError::JobNotFound(_))
        ));

        store.create_job(&job).await.unwrap();
        job.error = Some("boom".to_string());
        store.update_job(&job).await.unwrap();
        let loaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_list_jobs_newest_first() {
        let store = InMemoryJobStore::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut job = JobRecord::new(format!("req {}", i), "p", HashMap::new());
            job.created_at = job.created_at + chrono::Duration::seconds(i);
            ids.push(job.id);
            store.create_job(&job).await.unwrap();
        }
        let listed: Vec<Uuid> = store.list_jobs(2).await.unwrap().iter().map(|j| j.id).collect();
        assert_eq!(listed, vec![ids[2], ids[1]]);
    }

    #[tokio::test]
    async fn test_record_task_upserts() {
        let store = InMemoryJobStore::new();
        let job = JobRecord::new("todo app", "todo", HashMap::new());
        let task = TaskPayload::for_stage(&job, WorkflowStage::PrdGeneration).unwrap();

        let queued = TaskRecord::new(&task, TaskStatus::Queued);
        store.record_task(&queued).await.unwrap();
        store
            .record_task(&TaskRecord::new(&task.retry(), TaskStatus::Running))
            .await
            .unwrap();

        let tasks = store.list_tasks(job.id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Running);
        assert_eq!(tasks[0].attempt, 1);
        assert_eq!(tasks[0].created_at, queued.created_at);
    }
}
