//! QA agent.

use async_trait::async_trait;
use bus_core::{AgentRole, ArtifactKind};
use serde_json::{json, Value};

use crate::artifacts::Artifact;
use crate::traits::{dependency_items, key_points, object_schema, Agent, AgentTask};

const SYSTEM_PROMPT: &str = "You are a QA lead. Derive a risk-based test strategy and concrete \
test cases from the requirements and the code plan. Respond with a single JSON object.";

const USER_TEMPLATE: &str = r#"Project: {{project_name}}
Requirement: {{requirement}}

Prior artifacts:
{{context}}

Related memory:
{{memory}}

Return JSON with keys: "test_strategy" (string), "test_cases" (array of {"id", "title", "type", "steps", "expected"}),
"coverage_targets" (object), "tools" (array of strings)."#;

/// Test planning agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct QaAgent;

impl QaAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for QaAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Qa
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn user_template(&self) -> &'static str {
        USER_TEMPLATE
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Prd, ArtifactKind::CodePlan]
    }

    fn output_schema(&self) -> Value {
        object_schema(&[
            ("test_strategy", "string"),
            ("test_cases", "array"),
            ("coverage_targets", "object"),
        ])
    }

    fn mock_payload(&self, task: &AgentTask, dependencies: &[Artifact]) -> Value {
        let mut criteria = dependency_items(dependencies, ArtifactKind::Prd, "acceptance_criteria");
        if criteria.is_empty() {
            criteria = key_points(&task.requirement, 5);
        }

        let cases: Vec<Value> = criteria
            .iter()
            .enumerate()
            .map(|(i, criterion)| {
                json!({
                    "id": format!("TC-{:03}", i + 1),
                    "title": criterion,
                    "type": if i % 2 == 0 { "integration" } else { "unit" },
                    "steps": ["Arrange fixtures", "Exercise the behavior", "Check the outcome"],
                    "expected": criterion,
                })
            })
            .collect();

        json!({
            "test_strategy": "Unit tests per module, integration tests per acceptance criterion, a smoke suite before release",
            "test_cases": cases,
            "coverage_targets": {"line": 80, "critical_paths": 100},
            "tools": ["cargo test", "testcontainers", "k6"],
        })
    }

    fn summarize(&self, content: &Value) -> String {
        let cases = content["test_cases"].as_array().map_or(0, Vec::len);
        format!("qa_plan: {} test cases", cases)
    }
}
