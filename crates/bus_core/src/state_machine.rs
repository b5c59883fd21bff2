//! Per-job workflow state.
//!
//! A [`WorkflowStateMachine`] walks the static transition table in
//! [`crate::stage`]. It tracks a set of active stages rather than a single
//! cursor so that the parallel phase after development can be represented
//! directly: each parallel stage completes on its own and delivery becomes
//! active only once all of them are done.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::stage::{WorkflowStage, WORK_STAGE_COUNT};

/// Overall workflow status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recorded stage transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageTransition {
    pub from: WorkflowStage,
    pub to: WorkflowStage,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Workflow state for a single job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStateMachine {
    pub job_id: Uuid,
    pub status: WorkflowStatus,
    active: BTreeSet<WorkflowStage>,
    completed: BTreeSet<WorkflowStage>,
    #[serde(default)]
    skipped: BTreeSet<WorkflowStage>,
    #[serde(default)]
    skip: BTreeSet<WorkflowStage>,
    pub history: Vec<StageTransition>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl WorkflowStateMachine {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: WorkflowStatus::Pending,
            active: BTreeSet::new(),
            completed: BTreeSet::new(),
            skipped: BTreeSet::new(),
            skip: BTreeSet::new(),
            history: Vec::new(),
            failure_reason: None,
        }
    }

    /// Configure stages to skip. Only optional stages may be skipped.
    pub fn with_skipped(
        mut self,
        stages: impl IntoIterator<Item = WorkflowStage>,
    ) -> CoreResult<Self> {
        for stage in stages {
            if !stage.is_optional() {
                return Err(CoreError::InvalidTransition {
                    from: WorkflowStage::Initialized,
                    to: stage,
                });
            }
            self.skip.insert(stage);
        }
        Ok(self)
    }

    /// Leave `initialized` and activate the first work stage.
    pub fn start(&mut self) -> CoreResult<Vec<WorkflowStage>> {
        if self.status != WorkflowStatus::Pending {
            return Err(CoreError::InvalidState(format!(
                "workflow {} already started (status={})",
                self.job_id, self.status
            )));
        }

        info!("Starting workflow {}", self.job_id);
        self.status = WorkflowStatus::Running;
        self.completed.insert(WorkflowStage::Initialized);
        Ok(self.advance_from(WorkflowStage::Initialized))
    }

    /// Mark an active stage as completed and return newly activated stages.
    pub fn complete_stage(&mut self, stage: WorkflowStage) -> CoreResult<Vec<WorkflowStage>> {
        if self.status != WorkflowStatus::Running || !self.active.contains(&stage) {
            return Err(CoreError::InvalidTransition {
                from: self.current_stage(),
                to: stage,
            });
        }

        self.active.remove(&stage);
        self.completed.insert(stage);
        debug!("Workflow {}: stage {} completed", self.job_id, stage);

        Ok(self.advance_from(stage))
    }

    /// Fail the workflow at `stage`.
    pub fn fail_stage(&mut self, stage: WorkflowStage, reason: impl Into<String>) -> CoreResult<()> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                from: self.current_stage(),
                to: WorkflowStage::Failed,
            });
        }

        let reason = reason.into();
        warn!("Workflow {} failed at {}: {}", self.job_id, stage, reason);
        self.record(stage, WorkflowStage::Failed, Some(reason.clone()));
        self.active.clear();
        self.status = WorkflowStatus::Failed;
        self.failure_reason = Some(reason);
        Ok(())
    }

    /// Cancel the workflow. No-op when already terminal.
    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        let from = self.current_stage();
        info!("Workflow {} cancelled at {}", self.job_id, from);
        self.record(from, WorkflowStage::Cancelled, None);
        self.active.clear();
        self.status = WorkflowStatus::Cancelled;
    }

    /// Terminal stage if finished, otherwise the earliest active stage.
    pub fn current_stage(&self) -> WorkflowStage {
        match self.status {
            WorkflowStatus::Completed => WorkflowStage::Completed,
            WorkflowStatus::Failed => WorkflowStage::Failed,
            WorkflowStatus::Cancelled => WorkflowStage::Cancelled,
            WorkflowStatus::Pending | WorkflowStatus::Running => self
                .active
                .iter()
                .next()
                .copied()
                .unwrap_or(WorkflowStage::Initialized),
        }
    }

    pub fn active_stages(&self) -> Vec<WorkflowStage> {
        self.active.iter().copied().collect()
    }

    pub fn completed_stages(&self) -> Vec<WorkflowStage> {
        self.completed.iter().copied().collect()
    }

    pub fn skipped_stages(&self) -> Vec<WorkflowStage> {
        self.skipped.iter().copied().collect()
    }

    pub fn is_active(&self, stage: WorkflowStage) -> bool {
        self.active.contains(&stage)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fraction of work stages that are done (completed or skipped).
    pub fn progress(&self) -> f32 {
        let done = WorkflowStage::work_stages()
            .into_iter()
            .filter(|s| self.is_done(*s))
            .count();
        done as f32 / WORK_STAGE_COUNT as f32
    }

    fn is_done(&self, stage: WorkflowStage) -> bool {
        self.completed.contains(&stage) || self.skipped.contains(&stage)
    }

    /// Activate every successor of `stage` whose predecessors are all done.
    fn advance_from(&mut self, stage: WorkflowStage) -> Vec<WorkflowStage> {
        let mut activated = Vec::new();
        let mut frontier = vec![stage];

        while let Some(from) = frontier.pop() {
            for &next in from.transitions() {
                if self.is_done(next) || self.active.contains(&next) {
                    continue;
                }
                if !next.predecessors().iter().all(|p| self.is_done(*p)) {
                    continue;
                }

                if next == WorkflowStage::Completed {
                    self.record(from, next, None);
                    self.completed.insert(next);
                    self.status = WorkflowStatus::Completed;
                    info!("Workflow {} completed", self.job_id);
                    continue;
                }

                if self.skip.contains(&next) {
                    self.record(from, next, Some("skipped".to_string()));
                    self.skipped.insert(next);
                    debug!("Workflow {}: stage {} skipped", self.job_id, next);
                    frontier.push(next);
                    continue;
                }

                self.record(from, next, None);
                self.active.insert(next);
                activated.push(next);
            }
        }

        activated.sort();
        activated
    }

    fn record(&mut self, from: WorkflowStage, to: WorkflowStage, note: Option<String>) {
        debug_assert!(from.can_transition_to(to), "{} -> {} not in table", from, to);
        self.history.push(StageTransition {
            from,
            to,
            at: Utc::now(),
            note,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::PARALLEL_STAGES;

    fn run_through_development(machine: &mut WorkflowStateMachine) {
        machine.start().unwrap();
        for stage in [
            WorkflowStage::PrdGeneration,
            WorkflowStage::Planning,
            WorkflowStage::ArchitectureDesign,
            WorkflowStage::UiUxDesign,
        ] {
            machine.complete_stage(stage).unwrap();
        }
    }

    #[test]
    fn test_start_activates_prd() {
        let mut machine = WorkflowStateMachine::new(Uuid::new_v4());
        assert_eq!(machine.current_stage(), WorkflowStage::Initialized);

        let active = machine.start().unwrap();
        assert_eq!(active, vec![WorkflowStage::PrdGeneration]);
        assert_eq!(machine.status, WorkflowStatus::Running);
        assert_eq!(machine.current_stage(), WorkflowStage::PrdGeneration);

        assert!(machine.start().is_err());
    }

    #[test]
    fn test_complete_inactive_stage_rejected() {
        let mut machine = WorkflowStateMachine::new(Uuid::new_v4());
        machine.start().unwrap();

        let err = machine.complete_stage(WorkflowStage::Planning).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_development_fans_out() {
        let mut machine = WorkflowStateMachine::new(Uuid::new_v4());
        run_through_development(&mut machine);

        let next = machine.complete_stage(WorkflowStage::Development).unwrap();
        assert_eq!(next, PARALLEL_STAGES.to_vec());
        assert_eq!(machine.active_stages().len(), 4);
        assert_eq!(machine.current_stage(), WorkflowStage::QaTesting);
    }

    #[test]
    fn test_delivery_waits_for_all_parallel_stages() {
        let mut machine = WorkflowStateMachine::new(Uuid::new_v4());
        run_through_development(&mut machine);
        machine.complete_stage(WorkflowStage::Development).unwrap();

        assert!(machine.complete_stage(WorkflowStage::SupportDocs).unwrap().is_empty());
        assert!(machine.complete_stage(WorkflowStage::QaTesting).unwrap().is_empty());
        assert!(machine.complete_stage(WorkflowStage::Documentation).unwrap().is_empty());

        let next = machine.complete_stage(WorkflowStage::SecurityReview).unwrap();
        assert_eq!(next, vec![WorkflowStage::Delivery]);

        let next = machine.complete_stage(WorkflowStage::Delivery).unwrap();
        assert!(next.is_empty());
        assert_eq!(machine.status, WorkflowStatus::Completed);
        assert_eq!(machine.current_stage(), WorkflowStage::Completed);
        assert!((machine.progress() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_skip_optional_stages() {
        let mut machine = WorkflowStateMachine::new(Uuid::new_v4())
            .with_skipped([WorkflowStage::UiUxDesign, WorkflowStage::SupportDocs])
            .unwrap();
        machine.start().unwrap();
        machine.complete_stage(WorkflowStage::PrdGeneration).unwrap();
        machine.complete_stage(WorkflowStage::Planning).unwrap();

        let next = machine.complete_stage(WorkflowStage::ArchitectureDesign).unwrap();
        assert_eq!(next, vec![WorkflowStage::Development]);

        let next = machine.complete_stage(WorkflowStage::Development).unwrap();
        assert_eq!(
            next,
            vec![
                WorkflowStage::QaTesting,
                WorkflowStage::SecurityReview,
                WorkflowStage::Documentation
            ]
        );
        assert_eq!(
            machine.skipped_stages(),
            vec![WorkflowStage::UiUxDesign, WorkflowStage::SupportDocs]
        );
    }

    #[test]
    fn test_skip_required_stage_rejected() {
        let result = WorkflowStateMachine::new(Uuid::new_v4())
            .with_skipped([WorkflowStage::Development]);
        assert!(matches!(result, Err(CoreError::InvalidTransition { .. })));
    }

    #[test]
    fn test_fail_and_cancel() {
        let mut machine = WorkflowStateMachine::new(Uuid::new_v4());
        machine.start().unwrap();
        machine
            .fail_stage(WorkflowStage::PrdGeneration, "llm unavailable")
            .unwrap();

        assert_eq!(machine.status, WorkflowStatus::Failed);
        assert!(machine.active_stages().is_empty());
        assert_eq!(machine.failure_reason.as_deref(), Some("llm unavailable"));
        assert!(machine.fail_stage(WorkflowStage::PrdGeneration, "again").is_err());

        machine.cancel();
        assert_eq!(machine.status, WorkflowStatus::Failed);

        let mut other = WorkflowStateMachine::new(Uuid::new_v4());
        other.start().unwrap();
        other.cancel();
        assert_eq!(other.current_stage(), WorkflowStage::Cancelled);
    }

    #[test]
    fn test_history_follows_table() {
        let mut machine = WorkflowStateMachine::new(Uuid::new_v4());
        run_through_development(&mut machine);
        for entry in &machine.history {
            assert!(entry.from.can_transition_to(entry.to));
        }
        assert!(machine
            .active_stages()
            .iter()
            .all(|s| !machine.completed_stages().contains(s)));
    }

    #[test]
    fn test_state_serde_roundtrip_preserves_progress() {
        let mut machine = WorkflowStateMachine::new(Uuid::new_v4());
        run_through_development(&mut machine);

        let json = serde_json::to_string(&machine).unwrap();
        let mut restored: WorkflowStateMachine = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.active_stages(), vec![WorkflowStage::Development]);
        assert_eq!(restored.complete_stage(WorkflowStage::Development).unwrap().len(), 4);
    }
}
