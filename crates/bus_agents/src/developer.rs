//! Development agent.
//!
//! Produces the code plan: modules, file layout and ordered implementation
//! steps. The parallel review stages all read this artifact.

use async_trait::async_trait;
use bus_core::{AgentRole, ArtifactKind};
use serde_json::{json, Value};

use crate::artifacts::Artifact;
use crate::traits::{dependency_items, object_schema, Agent, AgentTask};

const SYSTEM_PROMPT: &str = "You are a staff engineer. Turn the plan, architecture and UI spec \
into an implementation plan a team can execute module by module. Respond with a single JSON object.";

const USER_TEMPLATE: &str = r#"Project: {{project_name}}
Requirement: {{requirement}}

Prior artifacts:
{{context}}

Related memory:
{{memory}}

Return JSON with keys: "summary" (string), "modules" (array of {"name", "purpose", "files"}),
"file_structure" (array of strings), "implementation_steps" (array of strings),
"dependencies" (array of strings)."#;

/// Implementation planning agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeveloperAgent;

impl DeveloperAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for DeveloperAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Developer
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn user_template(&self) -> &'static str {
        USER_TEMPLATE
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Plan, ArtifactKind::Architecture, ArtifactKind::UiUxSpec]
    }

    fn output_schema(&self) -> Value {
        object_schema(&[
            ("summary", "string"),
            ("modules", "array"),
            ("file_structure", "array"),
            ("implementation_steps", "array"),
        ])
    }

    fn mock_payload(&self, task: &AgentTask, dependencies: &[Artifact]) -> Value {
        let mut components = dependency_items(dependencies, ArtifactKind::Architecture, "components");
        if components.is_empty() {
            components = vec!["api".to_string(), "storage".to_string()];
        }

        let modules: Vec<Value> = components
            .iter()
            .map(|c| json!({"name": c, "purpose": format!("{} module", c), "files": [format!("src/{}/mod.rs", c)]}))
            .collect();
        let mut files = vec!["Cargo.toml".to_string(), "src/main.rs".to_string()];
        files.extend(components.iter().map(|c| format!("src/{}/mod.rs", c)));

        let mut steps = vec!["Scaffold the project and CI".to_string()];
        steps.extend(components.iter().map(|c| format!("Implement and test {}", c)));
        steps.push("Wire modules into the API and run end-to-end tests".to_string());

        json!({
            "summary": format!("{} modules for {}", modules.len(), task.project_name),
            "modules": modules,
            "file_structure": files,
            "implementation_steps": steps,
            "dependencies": ["tokio", "axum", "sqlx", "serde"],
        })
    }
}
