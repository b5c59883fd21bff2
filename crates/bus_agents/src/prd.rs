//! Product requirements agent.
//!
//! Turns the raw requirement into a PRD: goals, features, user stories
//! and acceptance criteria. Every later stage reads this artifact.

use async_trait::async_trait;
use bus_core::{AgentRole, ArtifactKind};
use serde_json::{json, Value};

use crate::artifacts::Artifact;
use crate::traits::{key_points, object_schema, Agent, AgentTask};

const SYSTEM_PROMPT: &str = "You are a senior product manager. Write precise, testable product \
requirements. Respond with a single JSON object and nothing else.";

const USER_TEMPLATE: &str = r#"Project: {{project_name}}

Requirement:
{{requirement}}

Related work from earlier projects:
{{memory}}

Return JSON with keys: "title" (string), "summary" (string), "goals" (array of strings),
"features" (array of {"name", "description", "priority"}), "user_stories" (array of strings),
"acceptance_criteria" (array of strings), "non_functional" (array of strings)."#;

/// PRD generation agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrdAgent;

impl PrdAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for PrdAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Prd
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn user_template(&self) -> &'static str {
        USER_TEMPLATE
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[]
    }

    fn output_schema(&self) -> Value {
        object_schema(&[
            ("title", "string"),
            ("summary", "string"),
            ("features", "array"),
            ("user_stories", "array"),
            ("acceptance_criteria", "array"),
        ])
    }

    fn mock_payload(&self, task: &AgentTask, _dependencies: &[Artifact]) -> Value {
        let points = key_points(&task.requirement, 6);
        let features: Vec<Value> = points
            .iter()
            .enumerate()
            .map(|(i, point)| {
                json!({
                    "name": point,
                    "description": format!("Support: {}", point),
                    "priority": if i < 2 { "must" } else { "should" },
                })
            })
            .collect();
        let stories: Vec<String> = points
            .iter()
            .map(|p| format!("As a user, I want {} so that the product meets its goal", p.to_lowercase()))
            .collect();
        let criteria: Vec<String> = points
            .iter()
            .map(|p| format!("{} works end to end and is covered by tests", p))
            .collect();

        json!({
            "title": format!("{} PRD", task.project_name),
            "summary": task.requirement.trim(),
            "goals": [format!("Deliver a first usable version of {}", task.project_name)],
            "features": features,
            "user_stories": stories,
            "acceptance_criteria": criteria,
            "non_functional": ["Responses under 300ms at p95", "Structured logging", "Input validation on every endpoint"],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use bus_core::WorkflowStage;

    #[test]
    fn test_mock_payload_follows_requirement() {
        let task = AgentTask::new(
            Uuid::new_v4(),
            WorkflowStage::PrdGeneration,
            "Todo list with reminders, sharing",
            "todo",
        );
        let payload = PrdAgent::new().mock_payload(&task, &[]);
        assert_eq!(payload["title"], "todo PRD");
        assert_eq!(payload["features"].as_array().unwrap().len(), 2);
        assert_eq!(payload["features"][1]["name"], "sharing");
        assert_eq!(PrdAgent::new().summarize(&payload), "prd: todo PRD");
    }
}
