//! Shared agent runtime.
//!
//! [`run_agent`] gathers context, renders the prompt, obtains a payload
//! from the LLM or the agent's mock, validates and persists it, then
//! indexes a summary into memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bus_core::{CircuitBreakerError, CircuitBreakerRegistry, FallbackPolicy, Settings, LLM_BREAKER};
use bus_memory::{MemoryDocument, MemoryStore, ScoredDocument, SearchQuery};
use jsonschema::JSONSchema;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::artifacts::{Artifact, ArtifactSource, ArtifactStore};
use crate::error::{AgentError, AgentResult};
use crate::json_repair::parse_lenient;
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient};
use crate::prompt::PromptTemplate;
use crate::traits::{Agent, AgentOutput, AgentTask};

/// Runtime knobs shared by all agents.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub fallback: FallbackPolicy,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Memory snippets retrieved per prompt; 0 disables retrieval.
    pub memory_top_k: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            fallback: FallbackPolicy::OnError,
            max_tokens: 4096,
            temperature: 0.2,
            memory_top_k: 5,
        }
    }
}

impl AgentConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            fallback: settings.llm.fallback,
            max_tokens: settings.llm.max_tokens,
            temperature: settings.llm.temperature,
            memory_top_k: settings.memory.top_k,
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }
}

/// Dependencies handed to every agent.
#[derive(Clone)]
pub struct AgentServices {
    pub llm: Option<Arc<dyn LlmClient>>,
    pub memory: Arc<dyn MemoryStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub config: AgentConfig,
}

impl AgentServices {
    pub fn new(memory: Arc<dyn MemoryStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            llm: None,
            memory,
            artifacts,
            breakers: Arc::new(CircuitBreakerRegistry::default()),
            config: AgentConfig::default(),
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }
}

impl std::fmt::Debug for AgentServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentServices")
            .field("llm", &self.llm.as_ref().map(|l| format!("{}/{}", l.provider(), l.model())))
            .field("memory", &self.memory.backend())
            .field("config", &self.config)
            .finish()
    }
}

/// Execute `agent` for `task`.
pub async fn run_agent<A: Agent + ?Sized>(
    agent: &A,
    services: &AgentServices,
    task: &AgentTask,
) -> AgentResult<AgentOutput> {
    let started = Instant::now();
    let role = agent.role();
    let kind = agent.artifact_kind();
    info!(
        "Agent {} starting for job {} (attempt {})",
        role, task.job_id, task.attempt
    );

    let mut dependencies = Vec::with_capacity(agent.dependencies().len());
    for dep in agent.dependencies() {
        match services.artifacts.get(task.job_id, *dep).await? {
            Some(artifact) => dependencies.push(artifact),
            None => warn!(
                "Agent {} missing {} artifact for job {}",
                role, dep, task.job_id
            ),
        }
    }

    let snippets = recall(services, task).await;

    let mut variables = HashMap::new();
    variables.insert("requirement".to_string(), task.requirement.clone());
    variables.insert("project_name".to_string(), task.project_name.clone());
    variables.insert("context".to_string(), format_context(&dependencies));
    variables.insert("memory".to_string(), format_memory(&snippets));
    let prompt = PromptTemplate::new(agent.user_template()).render(&variables)?;

    let policy = services.config.fallback;
    let (content, source, usage) = match (&services.llm, policy) {
        (_, FallbackPolicy::Always) => (
            agent.mock_payload(task, &dependencies),
            ArtifactSource::Mock,
            None,
        ),
        (None, FallbackPolicy::Never) => return Err(AgentError::LlmNotConfigured),
        (None, _) => {
            debug!("No LLM configured, using mock payload for {}", role);
            (
                agent.mock_payload(task, &dependencies),
                ArtifactSource::Mock,
                None,
            )
        }
        (Some(llm), _) => match generate(agent, services, llm.as_ref(), prompt).await {
            Ok((value, response)) => (value, ArtifactSource::Llm, Some(response)),
            Err(e) if policy == FallbackPolicy::OnError => {
                warn!(
                    "Agent {} falling back to mock payload for job {}: {}",
                    role, task.job_id, e
                );
                (
                    agent.mock_payload(task, &dependencies),
                    ArtifactSource::Fallback,
                    None,
                )
            }
            Err(e) => return Err(e),
        },
    };

    let summary = agent.summarize(&content);
    let mut artifact = Artifact::new(task.job_id, kind, content, source).with_summary(summary);
    if let Some(response) = usage {
        artifact = artifact.with_usage(response.model, response.input_tokens, response.output_tokens);
    }
    services.artifacts.save(&artifact).await?;

    let document = MemoryDocument::new(format!("{}\n{}", artifact.summary, task.requirement))
        .with_id(format!("{}:{}", task.job_id, kind))
        .with_metadata("job_id", task.job_id.to_string())
        .with_metadata("kind", kind.as_str())
        .with_metadata("role", role.as_str());
    if let Err(e) = services.memory.add(document).await {
        warn!("Failed to index {} artifact into memory: {}", kind, e);
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    info!(
        "Agent {} produced {} ({}) for job {} in {}ms",
        role, kind, artifact.source, task.job_id, duration_ms
    );
    Ok(AgentOutput {
        artifact,
        duration_ms,
    })
}

async fn recall(services: &AgentServices, task: &AgentTask) -> Vec<ScoredDocument> {
    if services.config.memory_top_k == 0 {
        return Vec::new();
    }
    let query = SearchQuery::new(task.requirement.clone()).with_top_k(services.config.memory_top_k);
    match services.memory.search(&query).await {
        Ok(hits) => hits,
        Err(e) => {
            warn!("Memory search failed for job {}: {}", task.job_id, e);
            Vec::new()
        }
    }
}

async fn generate<A: Agent + ?Sized>(
    agent: &A,
    services: &AgentServices,
    llm: &dyn LlmClient,
    prompt: String,
) -> AgentResult<(Value, CompletionResponse)> {
    let request = CompletionRequest::new(prompt)
        .with_system(agent.system_prompt())
        .with_max_tokens(services.config.max_tokens)
        .with_temperature(services.config.temperature);

    let breaker = services.breakers.get_or_create(LLM_BREAKER).await;
    let response = breaker
        .call(|| llm.complete(request))
        .await
        .map_err(|e| match e {
            CircuitBreakerError::Open { name, retry_after } => AgentError::CircuitOpen(format!(
                "circuit '{}' open, retry after {:?}",
                name, retry_after
            )),
            CircuitBreakerError::Inner(inner) => inner,
        })?;

    let value = parse_lenient(&response.content)?;
    validate_output(&agent.output_schema(), &value)?;
    Ok((value, response))
}

/// Validate `value` against a JSON schema.
pub fn validate_output(schema: &Value, value: &Value) -> AgentResult<()> {
    let compiled = JSONSchema::compile(schema)
        .map_err(|e| AgentError::Validation(format!("invalid output schema: {}", e)))?;
    if let Err(errors) = compiled.validate(value) {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(AgentError::Validation(messages.join("; ")));
    }
    Ok(())
}

fn format_context(dependencies: &[Artifact]) -> String {
    if dependencies.is_empty() {
        return "(no prior artifacts)".to_string();
    }
    dependencies
        .iter()
        .map(|a| {
            let body = serde_json::to_string_pretty(&a.content).unwrap_or_else(|_| a.content.to_string());
            format!("## {}\n{}", a.kind, body)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_memory(snippets: &[ScoredDocument]) -> String {
    if snippets.is_empty() {
        return "(no related memory)".to_string();
    }
    snippets
        .iter()
        .map(|hit| {
            let kind = hit
                .document
                .metadata
                .get("kind")
                .and_then(Value::as_str)
                .unwrap_or("note");
            let first_line = hit.document.content.lines().next().unwrap_or_default();
            format!("- [{} {:.2}] {}", kind, hit.score, first_line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::traits::object_schema;

    #[test]
    fn test_validate_output() {
        let schema = object_schema(&[("title", "string"), ("features", "array")]);
        assert!(validate_output(&schema, &json!({"title": "x", "features": []})).is_ok());

        let err = validate_output(&schema, &json!({"title": 3})).unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = Settings::default();
        settings.llm.fallback = FallbackPolicy::Never;
        settings.memory.top_k = 2;
        let config = AgentConfig::from_settings(&settings);
        assert_eq!(config.fallback, FallbackPolicy::Never);
        assert_eq!(config.memory_top_k, 2);
    }

    #[test]
    fn test_format_helpers_handle_empty() {
        assert_eq!(format_context(&[]), "(no prior artifacts)");
        assert_eq!(format_memory(&[]), "(no related memory)");
    }
}
