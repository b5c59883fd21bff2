//! # bus_agents
//!
//! LLM clients, artifacts and the ten stage agents of agent_bus.
//!
//! ## Architecture
//!
//! Every agent implements the [`Agent`] trait, which is mostly declarative:
//! role, prompts, dependencies, output schema and a deterministic mock
//! payload. The shared [`run_agent`] runtime:
//!
//! 1. loads dependency artifacts and related memory snippets
//! 2. renders the prompt template
//! 3. calls the LLM through the `llm` circuit breaker, or uses the mock
//!    payload according to the fallback policy
//! 4. parses leniently and validates against the schema
//! 5. persists the artifact and indexes its summary into memory
//!
//! ## Available Agents
//!
//! | Agent | Role | Artifact |
//! |-------|------|----------|
//! | [`PrdAgent`] | prd | prd |
//! | [`PlanAgent`] | planner | plan |
//! | [`ArchitectAgent`] | architect | architecture |
//! | [`UiUxAgent`] | ui_ux_designer | ui_ux_spec |
//! | [`DeveloperAgent`] | developer | code_plan |
//! | [`QaAgent`] | qa | qa_plan |
//! | [`SecurityAgent`] | security | security_audit |
//! | [`TechWriterAgent`] | tech_writer | documentation |
//! | [`SupportAgent`] | support | support_guide |
//! | [`DeliveryAgent`] | delivery | delivery_package |
//!
//! ## Example
//!
//! ```rust,ignore
//! use bus_agents::{AgentRegistry, AgentServices, AgentTask, InMemoryArtifactStore};
//!
//! let services = AgentServices::new(memory, Arc::new(InMemoryArtifactStore::new()));
//! let agent = AgentRegistry::with_defaults().for_stage(WorkflowStage::PrdGeneration).unwrap();
//! let output = agent.execute(&services, &AgentTask::new(job_id, agent.stage(), "A todo app", "todo")).await?;
//! ```

pub mod architect;
pub mod artifacts;
pub mod delivery;
pub mod developer;
pub mod error;
pub mod json_repair;
pub mod llm;
pub mod mock_llm;
pub mod pg_artifacts;
pub mod plan;
pub mod prd;
pub mod prompt;
pub mod qa;
pub mod registry;
pub mod runtime;
pub mod security;
pub mod support;
pub mod tech_writer;
pub mod traits;
pub mod uiux;

// Re-export main types for convenience
pub use architect::ArchitectAgent;
pub use artifacts::{export_artifacts, Artifact, ArtifactSource, ArtifactStore, InMemoryArtifactStore};
pub use delivery::DeliveryAgent;
pub use developer::DeveloperAgent;
pub use error::{AgentError, AgentResult};
pub use json_repair::{extract_json, parse_lenient, repair_json};
pub use llm::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmAdapter, LlmClient, LlmProvider,
    MessageRole,
};
pub use mock_llm::MockLlmClient;
pub use pg_artifacts::PostgresArtifactStore;
pub use plan::PlanAgent;
pub use prd::PrdAgent;
pub use prompt::PromptTemplate;
pub use qa::QaAgent;
pub use registry::AgentRegistry;
pub use runtime::{run_agent, validate_output, AgentConfig, AgentServices};
pub use security::SecurityAgent;
pub use support::SupportAgent;
pub use tech_writer::TechWriterAgent;
pub use traits::{find_dependency, object_schema, Agent, AgentOutput, AgentTask};
pub use uiux::UiUxAgent;
