//! Postgres-backed job store.
//!
//! Jobs keep their workflow state machine as JSONB so a job can be resumed
//! by any worker.

use async_trait::async_trait;
use bus_core::{WorkflowStage, WorkflowStateMachine, WorkflowStatus};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::error::WorkerResult;
use crate::store::JobStore;
use crate::task::{JobRecord, TaskRecord, TaskStatus};

const JOBS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id            UUID PRIMARY KEY,
    project_name  TEXT NOT NULL,
    requirement   TEXT NOT NULL,
    status        TEXT NOT NULL,
    workflow      JSONB NOT NULL,
    options       JSONB NOT NULL DEFAULT '{}'::jsonb,
    error         TEXT,
    created_at    TIMESTAMPTZ NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL
)
"#;

const TASKS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    task_id      UUID PRIMARY KEY,
    job_id       UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    stage        TEXT NOT NULL,
    status       TEXT NOT NULL,
    attempt      INTEGER NOT NULL DEFAULT 0,
    artifact_id  UUID,
    error        TEXT,
    created_at   TIMESTAMPTZ NOT NULL,
    updated_at   TIMESTAMPTZ NOT NULL
)
"#;

const TASKS_INDEX: &str = "CREATE INDEX IF NOT EXISTS tasks_job_id_idx ON tasks (job_id)";

const JOB_COLUMNS: &str =
    "id, project_name, requirement, status, workflow, options, error, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> WorkerResult<()> {
        sqlx::query(JOBS_SCHEMA).execute(&self.pool).await?;
        sqlx::query(TASKS_SCHEMA).execute(&self.pool).await?;
        sqlx::query(TASKS_INDEX).execute(&self.pool).await?;
        info!("Job schema ready");
        Ok(())
    }
}

fn row_to_job(row: &PgRow) -> WorkerResult<JobRecord> {
    let status: String = row.try_get("status")?;
    let workflow: WorkflowStateMachine = serde_json::from_value(row.try_get("workflow")?)?;
    Ok(JobRecord {
        id: row.try_get("id")?,
        project_name: row.try_get("project_name")?,
        requirement: row.try_get("requirement")?,
        status: serde_json::from_value::<WorkflowStatus>(serde_json::Value::String(status))?,
        workflow,
        options: serde_json::from_value(row.try_get("options")?)?,
        error: row.try_get("error")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn row_to_task(row: &PgRow) -> WorkerResult<TaskRecord> {
    let stage: WorkflowStage = row.try_get::<String, _>("stage")?.parse()?;
    let status: TaskStatus = row.try_get::<String, _>("status")?.parse()?;
    let attempt: i32 = row.try_get("attempt")?;
    Ok(TaskRecord {
        task_id: row.try_get("task_id")?,
        job_id: row.try_get("job_id")?,
        stage,
        status,
        attempt: attempt.max(0) as u32,
        artifact_id: row.try_get("artifact_id")?,
        error: row.try_get("error")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create_job(&self, job: &JobRecord) -> WorkerResult<()> {
        sqlx::query(
            "INSERT INTO jobs (id, project_name, requirement, status, workflow, options, error, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(job.id)
        .bind(&job.project_name)
        .bind(&job.requirement)
        .bind(job.status.as_str())
        .bind(serde_json::to_value(&job.workflow)?)
        .bind(serde_json::to_value(&job.options)?)
        .bind(job.error.as_deref())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> WorkerResult<Option<JobRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn update_job(&self, job: &JobRecord) -> WorkerResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, workflow = $3, options = $4, error = $5, updated_at = $6 \
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(serde_json::to_value(&job.workflow)?)
        .bind(serde_json::to_value(&job.options)?)
        .bind(job.error.as_deref())
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(crate::error::WorkerError::JobNotFound(job.id));
        }
        Ok(())
    }

    async fn list_jobs(&self, limit: usize) -> WorkerResult<Vec<JobRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs ORDER BY created_at DESC LIMIT $1",
            JOB_COLUMNS
        ))
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn record_task(&self, task: &TaskRecord) -> WorkerResult<()> {
        sqlx::query(
            "INSERT INTO tasks (task_id, job_id, stage, status, attempt, artifact_id, error, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (task_id) DO UPDATE SET status = EXCLUDED.status, attempt = EXCLUDED.attempt, \
             artifact_id = EXCLUDED.artifact_id, error = EXCLUDED.error, updated_at = EXCLUDED.updated_at",
        )
        .bind(task.task_id)
        .bind(task.job_id)
        .bind(task.stage.as_str())
        .bind(task.status.as_str())
        .bind(task.attempt.min(i32::MAX as u32) as i32)
        .bind(task.artifact_id)
        .bind(task.error.as_deref())
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_tasks(&self, job_id: Uuid) -> WorkerResult<Vec<TaskRecord>> {
        let rows = sqlx::query(
            "SELECT task_id, job_id, stage, status, attempt, artifact_id, error, created_at, updated_at \
             FROM tasks WHERE job_id = $1 ORDER BY created_at",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }
}
