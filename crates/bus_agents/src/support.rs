//! Support documentation agent.

use async_trait::async_trait;
use bus_core::{AgentRole, ArtifactKind};
use serde_json::{json, Value};

use crate::artifacts::Artifact;
use crate::traits::{dependency_items, object_schema, Agent, AgentTask};

const SYSTEM_PROMPT: &str = "You are a support engineer. Write runbooks, FAQs and troubleshooting \
steps for operating this product. Respond with a single JSON object.";

const USER_TEMPLATE: &str = r#"Project: {{project_name}}
Requirement: {{requirement}}

Prior artifacts:
{{context}}

Related memory:
{{memory}}

Return JSON with keys: "summary" (string), "runbooks" (array of {"name", "steps"}),
"faq" (array of {"question", "answer"}), "troubleshooting" (array of {"symptom", "resolution"})."#;

/// Runbook and troubleshooting agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct SupportAgent;

impl SupportAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for SupportAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Support
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn user_template(&self) -> &'static str {
        USER_TEMPLATE
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Prd, ArtifactKind::Architecture]
    }

    fn output_schema(&self) -> Value {
        object_schema(&[
            ("summary", "string"),
            ("runbooks", "array"),
            ("faq", "array"),
            ("troubleshooting", "array"),
        ])
    }

    fn mock_payload(&self, task: &AgentTask, dependencies: &[Artifact]) -> Value {
        let components = dependency_items(dependencies, ArtifactKind::Architecture, "components");
        let troubleshooting: Vec<Value> = components
            .iter()
            .map(|c| {
                json!({
                    "symptom": format!("{} returns errors", c),
                    "resolution": format!("Check the {} logs, its health endpoint and recent deploys", c),
                })
            })
            .collect();

        json!({
            "summary": format!("Operating guide for {}", task.project_name),
            "runbooks": [
                {"name": "Deploy", "steps": ["Run migrations", "Roll out new version", "Watch error rate for 15 minutes"]},
                {"name": "Rollback", "steps": ["Redeploy previous version", "Verify health checks"]},
            ],
            "faq": [
                {"question": "How do I reset my password?", "answer": "Use the reset link on the sign-in screen."},
            ],
            "troubleshooting": troubleshooting,
        })
    }
}
