//! Documentation agent.

use async_trait::async_trait;
use bus_core::{AgentRole, ArtifactKind};
use serde_json::{json, Value};

use crate::artifacts::Artifact;
use crate::traits::{dependency_items, object_schema, Agent, AgentTask};

const SYSTEM_PROMPT: &str = "You are a technical writer. Produce clear user and developer \
documentation from the design artifacts. Respond with a single JSON object.";

const USER_TEMPLATE: &str = r#"Project: {{project_name}}
Requirement: {{requirement}}

Prior artifacts:
{{context}}

Related memory:
{{memory}}

Return JSON with keys: "title" (string), "readme" (markdown string),
"sections" (array of {"heading", "body"}), "api_reference" (array of strings)."#;

/// User and developer documentation agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct TechWriterAgent;

impl TechWriterAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for TechWriterAgent {
    fn role(&self) -> AgentRole {
        AgentRole::TechWriter
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn user_template(&self) -> &'static str {
        USER_TEMPLATE
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Prd, ArtifactKind::Architecture, ArtifactKind::CodePlan]
    }

    fn output_schema(&self) -> Value {
        object_schema(&[("title", "string"), ("readme", "string"), ("sections", "array")])
    }

    fn mock_payload(&self, task: &AgentTask, dependencies: &[Artifact]) -> Value {
        let modules = dependency_items(dependencies, ArtifactKind::CodePlan, "modules");
        let module_list = modules
            .iter()
            .map(|m| format!("- `{}`", m))
            .collect::<Vec<_>>()
            .join("\n");

        json!({
            "title": format!("{} documentation", task.project_name),
            "readme": format!("# {}\n\n{}\n\n## Modules\n\n{}\n", task.project_name, task.requirement.trim(), module_list),
            "sections": [
                {"heading": "Getting started", "body": "Install the toolchain, copy the example config and run the service."},
                {"heading": "Configuration", "body": "Settings are read from a config file and overridden by environment variables."},
                {"heading": "Architecture", "body": format!("{} is organized into {} modules.", task.project_name, modules.len())},
            ],
            "api_reference": modules,
        })
    }
}
