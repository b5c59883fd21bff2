//! UI/UX design agent.

use async_trait::async_trait;
use bus_core::{AgentRole, ArtifactKind};
use serde_json::{json, Value};

use crate::artifacts::Artifact;
use crate::traits::{dependency_items, key_points, object_schema, Agent, AgentTask};

const SYSTEM_PROMPT: &str = "You are a product designer. Specify screens, flows and design \
tokens that a developer can build without guessing. Respond with a single JSON object.";

const USER_TEMPLATE: &str = r#"Project: {{project_name}}
Requirement: {{requirement}}

Prior artifacts:
{{context}}

Related memory:
{{memory}}

Return JSON with keys: "summary" (string), "screens" (array of {"name", "purpose", "components"}),
"user_flows" (array of {"name", "steps"}), "design_tokens" (object), "accessibility" (array of strings)."#;

/// Screen and flow design agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct UiUxAgent;

impl UiUxAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for UiUxAgent {
    fn role(&self) -> AgentRole {
        AgentRole::UiUxDesigner
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
            ("screens", "array"),
            ("user_flows", "array"),
            ("design_tokens", "object"),
        ])
    }

    fn mock_payload(&self, task: &AgentTask, dependencies: &[Artifact]) -> Value {
        let mut features = dependency_items(dependencies, ArtifactKind::Prd, "features");
        if features.is_empty() {
            features = key_points(&task.requirement, 4);
        }

        let mut screens = vec![json!({"name": "Sign in", "purpose": "Authenticate", "components": ["form", "button"]})];
        screens.extend(features.iter().map(|f| {
            json!({"name": f, "purpose": format!("Work with {}", f.to_lowercase()), "components": ["list", "detail", "toolbar"]})
        }));
        let flows: Vec<Value> = features
            .iter()
            .map(|f| json!({"name": format!("Use {}", f.to_lowercase()), "steps": ["Open", "Edit", "Save", "Confirm"]}))
            .collect();

        json!({
            "summary": format!("{} screens for {}", screens.len(), task.project_name),
            "screens": screens,
            "user_flows": flows,
            "design_tokens": {"color_primary": "#2f6feb", "radius": "6px", "font_family": "Inter, sans-serif", "spacing_unit": "4px"},
            "accessibility": ["WCAG 2.1 AA contrast", "Keyboard navigable forms"],
        })
    }
}
