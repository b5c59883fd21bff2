//! Workflow stage definitions and the static transition table.
//!
//! The pipeline is a linear sequence of stages with one fan-out: once
//! development completes, the four stages in [`PARALLEL_STAGES`] run
//! concurrently and delivery waits for all of them.
//!
//! ```text
//! initialized → prd_generation → planning → architecture_design
//!     → ui_ux_design → development ─┬─ qa_testing ──────┬─ delivery → completed
//!                                   ├─ security_review ─┤
//!                                   ├─ documentation ───┤
//!                                   └─ support_docs ────┘
//! ```
//!
//! Every non-terminal stage may additionally move to `failed` or `cancelled`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Stages that run concurrently after development.
pub const PARALLEL_STAGES: [WorkflowStage; 4] = [
    WorkflowStage::QaTesting,
    WorkflowStage::SecurityReview,
    WorkflowStage::Documentation,
    WorkflowStage::SupportDocs,
];

/// Number of stages that produce an artifact.
pub const WORK_STAGE_COUNT: usize = 10;

/// Pipeline stage identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Initialized,
    PrdGeneration,
    Planning,
    ArchitectureDesign,
    UiUxDesign,
    Development,
    QaTesting,
    SecurityReview,
    Documentation,
    SupportDocs,
    Delivery,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStage::Initialized => "initialized",
            WorkflowStage::PrdGeneration => "prd_generation",
            WorkflowStage::Planning => "planning",
            WorkflowStage::ArchitectureDesign => "architecture_design",
            WorkflowStage::UiUxDesign => "ui_ux_design",
            WorkflowStage::Development => "development",
            WorkflowStage::QaTesting => "qa_testing",
            WorkflowStage::SecurityReview => "security_review",
            WorkflowStage::Documentation => "documentation",
            WorkflowStage::SupportDocs => "support_docs",
            WorkflowStage::Delivery => "delivery",
            WorkflowStage::Completed => "completed",
            WorkflowStage::Failed => "failed",
            WorkflowStage::Cancelled => "cancelled",
        }
    }

    /// All stages in pipeline order.
    pub fn all() -> Vec<WorkflowStage> {
        vec![
            WorkflowStage::Initialized,
            WorkflowStage::PrdGeneration,
            WorkflowStage::Planning,
            WorkflowStage::ArchitectureDesign,
            WorkflowStage::UiUxDesign,
            WorkflowStage::Development,
            WorkflowStage::QaTesting,
            WorkflowStage::SecurityReview,
            WorkflowStage::Documentation,
            WorkflowStage::SupportDocs,
            WorkflowStage::Delivery,
            WorkflowStage::Completed,
            WorkflowStage::Failed,
            WorkflowStage::Cancelled,
        ]
    }

    /// Stages that are executed by an agent, in pipeline order.
    pub fn work_stages() -> Vec<WorkflowStage> {
        Self::all()
            .into_iter()
            .filter(|s| s.agent_role().is_some())
            .collect()
    }

    /// Success edges out of this stage.
    pub fn transitions(&self) -> &'static [WorkflowStage] {
        use WorkflowStage::*;
        match self {
            Initialized => &[PrdGeneration],
            PrdGeneration => &[Planning],
            Planning => &[ArchitectureDesign],
            ArchitectureDesign => &[UiUxDesign],
            UiUxDesign => &[Development],
            Development => &PARALLEL_STAGES,
            QaTesting | SecurityReview | Documentation | SupportDocs => &[Delivery],
            Delivery => &[Completed],
            Completed | Failed | Cancelled => &[],
        }
    }

    /// Stages whose success edges lead to this stage.
    pub fn predecessors(&self) -> Vec<WorkflowStage> {
        Self::all()
            .into_iter()
            .filter(|s| s.transitions().contains(self))
            .collect()
    }

    /// Check whether the table allows moving from this stage to `next`.
    pub fn can_transition_to(&self, next: WorkflowStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(next, WorkflowStage::Failed | WorkflowStage::Cancelled)
            || self.transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStage::Completed | WorkflowStage::Failed | WorkflowStage::Cancelled
        )
    }

    pub fn is_parallel(&self) -> bool {
        PARALLEL_STAGES.contains(self)
    }

    /// Optional stages may be skipped when a job is submitted.
    pub fn is_optional(&self) -> bool {
        matches!(self, WorkflowStage::UiUxDesign | WorkflowStage::SupportDocs)
    }

    /// The agent responsible for this stage, if any.
    pub fn agent_role(&self) -> Option<AgentRole> {
        match self {
            WorkflowStage::PrdGeneration => Some(AgentRole::Prd),
            WorkflowStage::Planning => Some(AgentRole::Planner),
            WorkflowStage::ArchitectureDesign => Some(AgentRole::Architect),
            WorkflowStage::UiUxDesign => Some(AgentRole::UiUxDesigner),
            WorkflowStage::Development => Some(AgentRole::Developer),
            WorkflowStage::QaTesting => Some(AgentRole::Qa),
            WorkflowStage::SecurityReview => Some(AgentRole::Security),
            WorkflowStage::Documentation => Some(AgentRole::TechWriter),
            WorkflowStage::SupportDocs => Some(AgentRole::Support),
            WorkflowStage::Delivery => Some(AgentRole::Delivery),
            WorkflowStage::Initialized
            | WorkflowStage::Completed
            | WorkflowStage::Failed
            | WorkflowStage::Cancelled => None,
        }
    }

    /// The artifact produced by this stage, if any.
    pub fn artifact_kind(&self) -> Option<ArtifactKind> {
        self.agent_role().map(|r| r.artifact_kind())
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WorkflowStage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::all()
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownStage(s.to_string()))
    }
}

/// Agent roles, one per work stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Prd,
    Planner,
    Architect,
    UiUxDesigner,
    Developer,
    Qa,
    Security,
    TechWriter,
    Support,
    Delivery,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Prd => "prd",
            AgentRole::Planner => "planner",
            AgentRole::Architect => "architect",
            AgentRole::UiUxDesigner => "ui_ux_designer",
            AgentRole::Developer => "developer",
            AgentRole::Qa => "qa",
            AgentRole::Security => "security",
            AgentRole::TechWriter => "tech_writer",
            AgentRole::Support => "support",
            AgentRole::Delivery => "delivery",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AgentRole::Prd => "Turns the raw requirement into a product requirements document",
            AgentRole::Planner => "Breaks the PRD into milestones and tasks",
            AgentRole::Architect => "Designs components, data model and integrations",
            AgentRole::UiUxDesigner => "Specifies screens, flows and design tokens",
            AgentRole::Developer => "Produces the implementation plan per module",
            AgentRole::Qa => "Writes the test strategy and test cases",
            AgentRole::Security => "Audits the design for threats and mitigations",
            AgentRole::TechWriter => "Writes user and developer documentation",
            AgentRole::Support => "Prepares runbooks and troubleshooting guides",
            AgentRole::Delivery => "Packages every artifact into a delivery bundle",
        }
    }

    pub fn stage(&self) -> WorkflowStage {
        match self {
            AgentRole::Prd => WorkflowStage::PrdGeneration,
            AgentRole::Planner => WorkflowStage::Planning,
            AgentRole::Architect => WorkflowStage::ArchitectureDesign,
            AgentRole::UiUxDesigner => WorkflowStage::UiUxDesign,
            AgentRole::Developer => WorkflowStage::Development,
            AgentRole::Qa => WorkflowStage::QaTesting,
            AgentRole::Security => WorkflowStage::SecurityReview,
            AgentRole::TechWriter => WorkflowStage::Documentation,
            AgentRole::Support => WorkflowStage::SupportDocs,
            AgentRole::Delivery => WorkflowStage::Delivery,
        }
    }

    pub fn artifact_kind(&self) -> ArtifactKind {
        match self {
            AgentRole::Prd => ArtifactKind::Prd,
            AgentRole::Planner => ArtifactKind::Plan,
            AgentRole::Architect => ArtifactKind::Architecture,
            AgentRole::UiUxDesigner => ArtifactKind::UiUxSpec,
            AgentRole::Developer => ArtifactKind::CodePlan,
            AgentRole::Qa => ArtifactKind::QaPlan,
            AgentRole::Security => ArtifactKind::SecurityAudit,
            AgentRole::TechWriter => ArtifactKind::Documentation,
            AgentRole::Support => ArtifactKind::SupportGuide,
            AgentRole::Delivery => ArtifactKind::DeliveryPackage,
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            AgentRole::Prd,
            AgentRole::Planner,
            AgentRole::Architect,
            AgentRole::UiUxDesigner,
            AgentRole::Developer,
            AgentRole::Qa,
            AgentRole::Security,
            AgentRole::TechWriter,
            AgentRole::Support,
            AgentRole::Delivery,
        ]
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Artifact kinds produced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Prd,
    Plan,
    Architecture,
    UiUxSpec,
    CodePlan,
    QaPlan,
    SecurityAudit,
    Documentation,
    SupportGuide,
    DeliveryPackage,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Prd => "prd",
            ArtifactKind::Plan => "plan",
            ArtifactKind::Architecture => "architecture",
            ArtifactKind::UiUxSpec => "ui_ux_spec",
            ArtifactKind::CodePlan => "code_plan",
            ArtifactKind::QaPlan => "qa_plan",
            ArtifactKind::SecurityAudit => "security_audit",
            ArtifactKind::Documentation => "documentation",
            ArtifactKind::SupportGuide => "support_guide",
            ArtifactKind::DeliveryPackage => "delivery_package",
        }
    }

    pub fn all() -> Vec<Self> {
        AgentRole::all().into_iter().map(|r| r.artifact_kind()).collect()
    }

    /// The agent that produces this artifact.
    pub fn role(&self) -> AgentRole {
        match self {
            ArtifactKind::Prd => AgentRole::Prd,
            ArtifactKind::Plan => AgentRole::Planner,
            ArtifactKind::Architecture => AgentRole::Architect,
            ArtifactKind::UiUxSpec => AgentRole::UiUxDesigner,
            ArtifactKind::CodePlan => AgentRole::Developer,
            ArtifactKind::QaPlan => AgentRole::Qa,
            ArtifactKind::SecurityAudit => AgentRole::Security,
            ArtifactKind::Documentation => AgentRole::TechWriter,
            ArtifactKind::SupportGuide => AgentRole::Support,
            ArtifactKind::DeliveryPackage => AgentRole::Delivery,
        }
    }

    /// The stage that produces this artifact.
    pub fn stage(&self) -> WorkflowStage {
        self.role().stage()
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::all()
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| CoreError::Serialization(format!("unknown artifact kind: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourteen_stages() {
        assert_eq!(WorkflowStage::all().len(), 14);
        assert_eq!(WorkflowStage::work_stages().len(), WORK_STAGE_COUNT);
    }

    #[test]
    fn test_linear_transitions() {
        assert_eq!(
            WorkflowStage::Initialized.transitions(),
            &[WorkflowStage::PrdGeneration]
        );
        assert!(WorkflowStage::Planning.can_transition_to(WorkflowStage::ArchitectureDesign));
        assert!(!WorkflowStage::Planning.can_transition_to(WorkflowStage::Development));
    }

    #[test]
    fn test_failure_edges_from_non_terminal() {
        for stage in WorkflowStage::all() {
            if stage.is_terminal() {
                assert!(!stage.can_transition_to(WorkflowStage::Failed));
                assert!(stage.transitions().is_empty());
            } else {
                assert!(stage.can_transition_to(WorkflowStage::Failed));
                assert!(stage.can_transition_to(WorkflowStage::Cancelled));
            }
        }
    }

    #[test]
    fn test_development_fans_out_to_parallel_set() {
        let next = WorkflowStage::Development.transitions();
        assert_eq!(next, &PARALLEL_STAGES);
        assert!(next.iter().all(|s| s.is_parallel()));
        for stage in PARALLEL_STAGES {
            assert_eq!(stage.transitions(), &[WorkflowStage::Delivery]);
        }
    }

    #[test]
    fn test_delivery_joins_parallel_set() {
        let mut preds = WorkflowStage::Delivery.predecessors();
        preds.sort();
        let mut expected = PARALLEL_STAGES.to_vec();
        expected.sort();
        assert_eq!(preds, expected);
    }

    #[test]
    fn test_stage_agent_mapping_roundtrip() {
        for role in AgentRole::all() {
            assert_eq!(role.stage().agent_role(), Some(role));
            assert_eq!(role.stage().artifact_kind(), Some(role.artifact_kind()));
            assert_eq!(role.artifact_kind().stage(), role.stage());
            assert_eq!(role.artifact_kind().role(), role);
        }
        assert_eq!(WorkflowStage::Initialized.agent_role(), None);
        assert_eq!(WorkflowStage::Completed.agent_role(), None);
    }

    #[test]
    fn test_stage_from_str() {
        assert_eq!(
            "ui-ux-design".parse::<WorkflowStage>().unwrap(),
            WorkflowStage::UiUxDesign
        );
        assert_eq!(
            "QA_TESTING".parse::<WorkflowStage>().unwrap(),
            WorkflowStage::QaTesting
        );
        assert!("deploy".parse::<WorkflowStage>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&WorkflowStage::SecurityReview).unwrap();
        assert_eq!(json, "\"security_review\"");
        let kind: ArtifactKind = serde_json::from_str("\"ui_ux_spec\"").unwrap();
        assert_eq!(kind, ArtifactKind::UiUxSpec);
    }
}
