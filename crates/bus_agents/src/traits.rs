//! Core agent trait and task types.
//!
//! An agent is mostly declarative: it names its role, its prompts, the
//! artifacts it reads and the shape of what it writes. The shared
//! [`run_agent`] runtime does the rest.

use async_trait::async_trait;
use bus_core::{AgentRole, ArtifactKind, WorkflowStage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::artifacts::Artifact;
use crate::error::AgentResult;
use crate::runtime::{run_agent, AgentServices};

/// One unit of work for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub job_id: Uuid,
    pub stage: WorkflowStage,
    /// Raw product requirement
    pub requirement: String,
    pub project_name: String,
    /// Zero-based attempt number
    #[serde(default)]
    pub attempt: u32,
}

impl AgentTask {
    pub fn new(
        job_id: Uuid,
        stage: WorkflowStage,
        requirement: impl Into<String>,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            stage,
            requirement: requirement.into(),
            project_name: project_name.into(),
            attempt: 0,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// Result of a successful agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    pub artifact: Artifact,
    /// Processing duration in milliseconds
    pub duration_ms: u64,
}

/// A pipeline agent.
#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> AgentRole;

    fn system_prompt(&self) -> &'static str;

    /// User prompt with `{{requirement}}`, `{{project_name}}`, `{{context}}`
    /// and `{{memory}}` placeholders.
    fn user_template(&self) -> &'static str;

    /// Artifact kinds whose content is fed into the prompt.
    fn dependencies(&self) -> &'static [ArtifactKind];

    /// JSON schema the LLM output must satisfy.
    fn output_schema(&self) -> Value;

    /// Deterministic payload used when the LLM is unavailable.
    fn mock_payload(&self, task: &AgentTask, dependencies: &[Artifact]) -> Value;

    /// One-line summary of the content, indexed into memory.
    fn summarize(&self, content: &Value) -> String {
        let headline = ["title", "summary", "overview", "name"]
            .iter()
            .find_map(|key| content.get(*key).and_then(Value::as_str));
        match headline {
            Some(text) => format!("{}: {}", self.artifact_kind(), text),
            None => format!("{} ({})", self.artifact_kind(), self.role().description()),
        }
    }

    fn artifact_kind(&self) -> ArtifactKind {
        self.role().artifact_kind()
    }

    fn stage(&self) -> WorkflowStage {
        self.role().stage()
    }

    /// Run the agent for `task`.
    async fn execute(&self, services: &AgentServices, task: &AgentTask) -> AgentResult<AgentOutput> {
        run_agent(self, services, task).await
    }
}

/// Object schema requiring each `(field, type)` pair.
pub fn object_schema(fields: &[(&str, &str)]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|(name, ty)| (name.to_string(), json!({ "type": ty })))
        .collect();
    let required: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();
    json!({
        "type": "object",
        "required": required,
        "properties": properties,
    })
}

/// Look up a dependency artifact by kind.
pub fn find_dependency(dependencies: &[Artifact], kind: ArtifactKind) -> Option<&Artifact> {
    dependencies.iter().find(|a| a.kind == kind)
}

/// String items of an array field in a dependency's content.
pub(crate) fn dependency_items(dependencies: &[Artifact], kind: ArtifactKind, field: &str) -> Vec<String> {
    find_dependency(dependencies, kind)
        .and_then(|a| a.content.get(field))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(obj) => obj
                        .get("name")
                        .or_else(|| obj.get("title"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Split a requirement into short clauses for mock payloads.
pub(crate) fn key_points(text: &str, limit: usize) -> Vec<String> {
    let points: Vec<String> = text
        .split([',', ';', '.', '\n'])
        .flat_map(|clause| clause.split(" and "))
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .take(limit)
        .map(str::to_string)
        .collect();
    if points.is_empty() {
        vec![text.trim().to_string()]
    } else {
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_schema() {
        let schema = object_schema(&[("title", "string"), ("features", "array")]);
        assert_eq!(schema["required"], json!(["title", "features"]));
        assert_eq!(schema["properties"]["features"]["type"], "array");
    }

    #[test]
    fn test_key_points() {
        assert_eq!(
            key_points("A todo app with accounts, reminders and sharing.", 5),
            vec!["A todo app with accounts", "reminders", "sharing"]
        );
        assert_eq!(key_points("   ", 3), vec![""]);
        assert_eq!(key_points("a, b, c, d", 2), vec!["a", "b"]);
    }

    #[test]
    fn test_task_roundtrip_defaults_attempt() {
        let task: AgentTask = serde_json::from_value(json!({
            "job_id": Uuid::nil(),
            "stage": "planning",
            "requirement": "todo app",
            "project_name": "todo",
        }))
        .unwrap();
        assert_eq!(task.attempt, 0);
        assert_eq!(task.stage, WorkflowStage::Planning);
    }
}
