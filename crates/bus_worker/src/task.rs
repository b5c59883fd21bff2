//! Jobs, tasks and their wire formats.

use std::collections::HashMap;

use bus_agents::AgentTask;
use bus_core::{AgentRole, WorkflowStage, WorkflowStateMachine, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{WorkerError, WorkerResult};

/// Option key listing optional stages to skip, comma separated.
pub const SKIP_OPTION: &str = "skip";

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Retrying,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            "retrying" => Ok(TaskStatus::Retrying),
            "skipped" => Ok(TaskStatus::Skipped),
            other => Err(WorkerError::Serialization(format!("unknown task status: {}", other))),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A queued unit of work: run one stage of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub stage: WorkflowStage,
    pub role: AgentRole,
    pub requirement: String,
    pub project_name: String,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub options: HashMap<String, String>,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskPayload {
    /// Task for `stage` of `job`. Fails for stages without an agent.
    pub fn for_stage(job: &JobRecord, stage: WorkflowStage) -> WorkerResult<Self> {
        let role = stage
            .agent_role()
            .ok_or_else(|| WorkerError::InvalidTask(format!("stage {} has no agent", stage)))?;
        Ok(Self {
            task_id: Uuid::new_v4(),
            job_id: job.id,
            stage,
            role,
            requirement: job.requirement.clone(),
            project_name: job.project_name.clone(),
            attempt: 0,
            options: job.options.clone(),
            enqueued_at: Utc::now(),
        })
    }

    /// The same task, one attempt later.
    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> WorkerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> WorkerResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn agent_task(&self) -> AgentTask {
        AgentTask::new(self.job_id, self.stage, &self.requirement, &self.project_name)
            .with_attempt(self.attempt)
    }
}

/// Outcome of processing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub stage: WorkflowStage,
    pub status: TaskStatus,
    #[serde(default)]
    pub artifact_id: Option<Uuid>,
    #[serde(default)]
    pub error: Option<String>,
    pub attempt: u32,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn new(task: &TaskPayload, status: TaskStatus) -> Self {
        Self {
            task_id: task.task_id,
            job_id: task.job_id,
            stage: task.stage,
            status,
            artifact_id: None,
            error: None,
            attempt: task.attempt,
            duration_ms: 0,
            finished_at: Utc::now(),
        }
    }

    pub fn with_artifact(mut self, artifact_id: Uuid) -> Self {
        self.artifact_id = Some(artifact_id);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// A submitted job and its workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub project_name: String,
    pub requirement: String,
    pub status: WorkflowStatus,
    pub workflow: WorkflowStateMachine,
    #[serde(default)]
    pub options: HashMap<String, String>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        requirement: impl Into<String>,
        project_name: impl Into<String>,
        options: HashMap<String, String>,
    ) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            project_name: project_name.into(),
            requirement: requirement.into(),
            status: WorkflowStatus::Pending,
            workflow: WorkflowStateMachine::new(id),
            options,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy the workflow status onto the record and bump `updated_at`.
    pub fn touch(&mut self) {
        self.status = self.workflow.status;
        if self.error.is_none() {
            self.error = self.workflow.failure_reason.clone();
        }
        self.updated_at = Utc::now();
    }

    /// Stages listed under the `skip` option.
    pub fn skipped_stages(&self) -> WorkerResult<Vec<WorkflowStage>> {
        parse_skip(self.options.get(SKIP_OPTION).map(String::as_str).unwrap_or(""))
    }
}

/// Parse a comma separated stage list.
pub fn parse_skip(raw: &str) -> WorkerResult<Vec<WorkflowStage>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<WorkflowStage>()
                .map_err(|e| WorkerError::InvalidOptions(e.to_string()))
        })
        .collect()
}

/// Persisted view of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub stage: WorkflowStage,
    pub status: TaskStatus,
    pub attempt: u32,
    #[serde(default)]
    pub artifact_id: Option<Uuid>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(task: &TaskPayload, status: TaskStatus) -> Self {
        let now = Utc::now();
        Self {
            task_id: task.task_id,
            job_id: task.job_id,
            stage: task.stage,
            status,
            attempt: task.attempt,
            artifact_id: None,
            error: None,
            created_at: task.enqueued_at,
            updated_at: now,
        }
    }

    pub fn from_result(result: &TaskResult, created_at: DateTime<Utc>) -> Self {
        Self {
            task_id: result.task_id,
            job_id: result.job_id,
            stage: result.stage,
            status: result.status,
            attempt: result.attempt,
            artifact_id: result.artifact_id,
            error: result.error.clone(),
            created_at,
            updated_at: result.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_format() {
        let mut options = HashMap::new();
        options.insert(SKIP_OPTION.to_string(), "support_docs".to_string());
        let job = JobRecord::new("todo app", "todo", options);
        let task = TaskPayload::for_stage(&job, WorkflowStage::Planning).unwrap();

        let raw = task.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["stage"], "planning");
        assert_eq!(value["role"], "planner");
        assert_eq!(value["options"]["skip"], "support_docs");
        assert_eq!(TaskPayload::from_json(&raw).unwrap(), task);
    }

    #[test]
    fn test_retry_keeps_identity() {
        let job = JobRecord::new("todo app", "todo", HashMap::new());
        let task = TaskPayload::for_stage(&job, WorkflowStage::PrdGeneration).unwrap();
        let retry = task.retry();
        assert_eq!(retry.task_id, task.task_id);
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.agent_task().attempt, 1);
    }

    #[test]
    fn test_stage_without_agent_rejected() {
        let job = JobRecord::new("todo app", "todo", HashMap::new());
        assert!(matches!(
            TaskPayload::for_stage(&job, WorkflowStage::Completed),
            Err(WorkerError::InvalidTask(_))
        ));
    }

    #[test]
    fn test_parse_skip() {
        assert_eq!(
            parse_skip("ui_ux_design, support_docs").unwrap(),
            vec![WorkflowStage::UiUxDesign, WorkflowStage::SupportDocs]
        );
        assert!(parse_skip("").unwrap().is_empty());
        assert!(matches!(parse_skip("nope"), Err(WorkerError::InvalidOptions(_))));
    }
}
