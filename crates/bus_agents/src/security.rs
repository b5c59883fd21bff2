//! Security review agent.
//!
//! Audits the architecture and the code plan for threats and proposes
//! mitigations with an overall risk rating.

use async_trait::async_trait;
use bus_core::{AgentRole, ArtifactKind};
use serde_json::{json, Value};

use crate::artifacts::Artifact;
use crate::traits::{dependency_items, object_schema, Agent, AgentTask};

const SYSTEM_PROMPT: &str = "You are an application security engineer. Threat-model the design \
using STRIDE and recommend specific mitigations. Respond with a single JSON object.";

const USER_TEMPLATE: &str = r#"Project: {{project_name}}
Requirement: {{requirement}}

Prior artifacts:
{{context}}

Related memory:
{{memory}}

Return JSON with keys: "summary" (string), "risk_level" ("low" | "medium" | "high"),
"threats" (array of {"id", "category", "description", "severity"}),
"mitigations" (array of {"threat_id", "action"})."#;

/// Threat modelling agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecurityAgent;

impl SecurityAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for SecurityAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Security
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn user_template(&self) -> &'static str {
        USER_TEMPLATE
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Architecture, ArtifactKind::CodePlan]
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["summary", "risk_level", "threats", "mitigations"],
            "properties": {
                "summary": {"type": "string"},
                "risk_level": {"type": "string", "enum": ["low", "medium", "high"]},
                "threats": {"type": "array"},
                "mitigations": {"type": "array"},
            },
        })
    }

    fn mock_payload(&self, task: &AgentTask, dependencies: &[Artifact]) -> Value {
        let integrations = dependency_items(dependencies, ArtifactKind::Architecture, "integrations");

        let mut threats = vec![
            json!({"id": "S1", "category": "spoofing", "description": "Credential stuffing against login", "severity": "high"}),
            json!({"id": "T1", "category": "tampering", "description": "Unvalidated input reaching the database", "severity": "medium"}),
            json!({"id": "I1", "category": "information_disclosure", "description": "Secrets in logs or error messages", "severity": "medium"}),
        ];
        threats.extend(integrations.iter().enumerate().map(|(i, integration)| {
            json!({
                "id": format!("E{}", i + 1),
                "category": "elevation_of_privilege",
                "description": format!("Over-privileged credentials for {}", integration),
                "severity": "low",
            })
        }));
        let mitigations: Vec<Value> = threats
            .iter()
            .map(|t| {
                json!({
                    "threat_id": t["id"],
                    "action": format!("Mitigate: {}", t["description"].as_str().unwrap_or_default()),
                })
            })
            .collect();

        json!({
            "summary": format!("{} threats identified for {}", threats.len(), task.project_name),
            "risk_level": "medium",
            "threats": threats,
            "mitigations": mitigations,
        })
    }
}
