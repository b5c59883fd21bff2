//! Planning agent.

use async_trait::async_trait;
use bus_core::{AgentRole, ArtifactKind};
use serde_json::{json, Value};

use crate::artifacts::Artifact;
use crate::traits::{dependency_items, key_points, object_schema, Agent, AgentTask};

const SYSTEM_PROMPT: &str = "You are a delivery lead. Break product requirements into milestones \
and concrete tasks with estimates. Respond with a single JSON object.";

const USER_TEMPLATE: &str = r#"Project: {{project_name}}
Requirement: {{requirement}}

Prior artifacts:
{{context}}

Related memory:
{{memory}}

Return JSON with keys: "summary" (string), "milestones" (array of {"name", "goal", "tasks"}),
"tasks" (array of {"id", "title", "estimate_days", "depends_on"}), "risks" (array of strings)."#;

const PHASES: [&str; 4] = ["Foundation", "Core features", "Hardening", "Release"];

/// Milestone planning agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanAgent;

impl PlanAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for PlanAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Planner
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn user_template(&self) -> &'static str {
        USER_TEMPLATE
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Prd]
    }

    fn output_schema(&self) -> Value {
        object_schema(&[("summary", "string"), ("milestones", "array"), ("tasks", "array")])
    }

    fn mock_payload(&self, task: &AgentTask, dependencies: &[Artifact]) -> Value {
        let mut features = dependency_items(dependencies, ArtifactKind::Prd, "features");
        if features.is_empty() {
            features = key_points(&task.requirement, 6);
        }

        let tasks: Vec<Value> = features
            .iter()
            .enumerate()
            .map(|(i, feature)| {
                json!({
                    "id": format!("T{}", i + 1),
                    "title": format!("Implement {}", feature),
                    "estimate_days": 2,
                    "depends_on": if i == 0 { Vec::<String>::new() } else { vec!["T1".to_string()] },
                })
            })
            .collect();
        let task_ids: Vec<String> = (1..=tasks.len()).map(|i| format!("T{}", i)).collect();

        let milestones: Vec<Value> = PHASES
            .iter()
            .map(|phase| {
                let tasks = if *phase == "Core features" { task_ids.clone() } else { Vec::new() };
                json!({ "name": phase, "goal": format!("{} for {}", phase, task.project_name), "tasks": tasks })
            })
            .collect();

        json!({
            "summary": format!("{} milestones, {} tasks", milestones.len(), tasks.len()),
            "milestones": milestones,
            "tasks": tasks,
            "risks": ["Scope creep on core features", "Third-party API limits"],
        })
    }

    fn summarize(&self, content: &Value) -> String {
        let milestones = content["milestones"].as_array().map_or(0, Vec::len);
        let tasks = content["tasks"].as_array().map_or(0, Vec::len);
        format!("plan: {} milestones, {} tasks", milestones, tasks)
    }
}
