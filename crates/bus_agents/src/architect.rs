//! Architecture agent.
//!
//! Designs components, the data model and external integrations from the
//! PRD and the plan.

use async_trait::async_trait;
use bus_core::{AgentRole, ArtifactKind};
use serde_json::{json, Value};

use crate::artifacts::Artifact;
use crate::traits::{dependency_items, key_points, object_schema, Agent, AgentTask};

const SYSTEM_PROMPT: &str = "You are a pragmatic software architect. Prefer simple, proven \
designs and explain trade-offs briefly. Respond with a single JSON object.";

const USER_TEMPLATE: &str = r#"Project: {{project_name}}
Requirement: {{requirement}}

Prior artifacts:
{{context}}

Related memory:
{{memory}}

Return JSON with keys: "overview" (string), "components" (array of {"name", "responsibility"}),
"data_model" (array of {"entity", "fields"}), "integrations" (array of strings),
"tech_stack" (object), "decisions" (array of strings)."#;

/// System design agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchitectAgent;

impl ArchitectAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for ArchitectAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Architect
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn user_template(&self) -> &'static str {
        USER_TEMPLATE
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Prd, ArtifactKind::Plan]
    }

    fn output_schema(&self) -> Value {
        object_schema(&[
            ("overview", "string"),
            ("components", "array"),
            ("data_model", "array"),
            ("tech_stack", "object"),
        ])
    }

    fn mock_payload(&self, task: &AgentTask, dependencies: &[Artifact]) -> Value {
        let mut features = dependency_items(dependencies, ArtifactKind::Prd, "features");
        if features.is_empty() {
            features = key_points(&task.requirement, 4);
        }

        let mut components = vec![
            json!({"name": "api", "responsibility": "HTTP API and request validation"}),
            json!({"name": "storage", "responsibility": "Persistence and migrations"}),
        ];
        components.extend(features.iter().map(|f| {
            json!({"name": f.to_lowercase().replace(' ', "_"), "responsibility": format!("Domain logic for {}", f)})
        }));

        json!({
            "overview": format!("{} as a modular service: an API layer over domain modules backed by a relational store", task.project_name),
            "components": components,
            "data_model": [
                {"entity": "User", "fields": ["id", "email", "created_at"]},
                {"entity": "Item", "fields": ["id", "owner_id", "title", "updated_at"]},
            ],
            "integrations": ["Email delivery", "Object storage"],
            "tech_stack": {"backend": "Rust (axum)", "database": "PostgreSQL", "cache": "Redis"},
            "decisions": ["Single deployable until load requires splitting", "Schema migrations run at startup"],
        })
    }
}
