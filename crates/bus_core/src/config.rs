//! Settings for the pipeline services.
//!
//! Settings start from defaults, are merged with an optional TOML or YAML
//! file and are finally overridden by environment variables.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{CoreError, CoreResult};

/// LLM provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Mock,
}

impl LlmProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProviderKind::Anthropic => "anthropic",
            LlmProviderKind::OpenAi => "openai",
            LlmProviderKind::Mock => "mock",
        }
    }

    /// Environment variable holding the API key for this provider.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            LlmProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            LlmProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            LlmProviderKind::Mock => None,
        }
    }
}

impl FromStr for LlmProviderKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(LlmProviderKind::Anthropic),
            "openai" | "open_ai" | "gpt" => Ok(LlmProviderKind::OpenAi),
            "mock" => Ok(LlmProviderKind::Mock),
            other => Err(CoreError::Config(format!("unknown LLM provider: {}", other))),
        }
    }
}

impl std::fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// When agents use their built-in mock payload instead of the LLM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Never fall back; LLM errors fail the stage.
    Never,
    /// Fall back when the LLM call, parsing or validation fails.
    #[default]
    OnError,
    /// Always use the mock payload.
    Always,
}

impl FromStr for FallbackPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "never" => Ok(FallbackPolicy::Never),
            "on_error" => Ok(FallbackPolicy::OnError),
            "always" => Ok(FallbackPolicy::Always),
            other => Err(CoreError::Config(format!("unknown fallback policy: {}", other))),
        }
    }
}

/// Memory store backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackend {
    #[default]
    InMemory,
    Postgres,
    Chroma,
    Hybrid,
}

impl MemoryBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryBackend::InMemory => "in_memory",
            MemoryBackend::Postgres => "postgres",
            MemoryBackend::Chroma => "chroma",
            MemoryBackend::Hybrid => "hybrid",
        }
    }
}

impl FromStr for MemoryBackend {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "in_memory" | "memory" => Ok(MemoryBackend::InMemory),
            "postgres" | "postgresql" => Ok(MemoryBackend::Postgres),
            "chroma" | "chromadb" => Ok(MemoryBackend::Chroma),
            "hybrid" => Ok(MemoryBackend::Hybrid),
            other => Err(CoreError::Config(format!("unknown memory backend: {}", other))),
        }
    }
}

impl std::fmt::Display for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Embedding provider for vector stores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Local feature-hashing embeddings.
    #[default]
    Hashing,
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedisSettings {
    pub url: String,
    pub queue_key: String,
    pub result_ttl_secs: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            queue_key: "agent_bus:tasks".to_string(),
            result_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PostgresSettings {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: LlmProviderKind,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Override for the provider API base URL.
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub fallback: FallbackPolicy,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::Anthropic,
            model: "claude-sonnet-4-20250514".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 4096,
            temperature: 0.2,
            timeout_secs: 120,
            fallback: FallbackPolicy::OnError,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemorySettings {
    pub backend: MemoryBackend,
    pub chroma_url: Option<String>,
    pub collection: String,
    pub embedding_provider: EmbeddingProvider,
    pub embedding_model: String,
    pub dimensions: usize,
    pub top_k: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::InMemory,
            chroma_url: None,
            collection: "agent_bus_memory".to_string(),
            embedding_provider: EmbeddingProvider::Hashing,
            embedding_model: "text-embedding-3-small".to_string(),
            dimensions: 384,
            top_k: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub poll_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            retry_backoff_ms: 1000,
            poll_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
        }
    }
}

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Settings {
    pub redis: RedisSettings,
    pub postgres: PostgresSettings,
    pub llm: LlmSettings,
    pub memory: MemorySettings,
    pub worker: WorkerSettings,
    pub circuit_breaker: BreakerSettings,
}

impl Settings {
    /// Defaults, merged with `path` when given, then environment overrides.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env()?;
        Ok(settings)
    }

    /// Parse a TOML or YAML settings file, chosen by extension.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        debug!("Loading settings from {}", path.display());
        match extension.as_str() {
            "toml" => toml::from_str(&content)
                .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e))),
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e))),
            other => Err(CoreError::Config(format!(
                "unsupported settings format '{}' for {}",
                other,
                path.display()
            ))),
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> CoreResult<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("REDIS_URL") {
            self.redis.url = url;
        }
        if let Some(url) = get("DATABASE_URL") {
            self.postgres.url = Some(url);
        }
        if let Some(provider) = get("AGENT_BUS_LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(model) = get("AGENT_BUS_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(var) = self.llm.provider.api_key_env() {
            if let Some(key) = get(var) {
                self.llm.api_key = Some(key);
            }
        }
        if let Some(backend) = get("AGENT_BUS_MEMORY_BACKEND") {
            self.memory.backend = backend.parse()?;
        }
        if let Some(url) = get("CHROMA_URL") {
            self.memory.chroma_url = Some(url);
        }
        if let Some(value) = get("AGENT_BUS_WORKER_CONCURRENCY") {
            self.worker.concurrency = parse_number("AGENT_BUS_WORKER_CONCURRENCY", &value)?;
        }
        if let Some(value) = get("AGENT_BUS_MAX_ATTEMPTS") {
            self.worker.max_attempts = parse_number("AGENT_BUS_MAX_ATTEMPTS", &value)?;
        }
        Ok(())
    }

    /// Check the settings for combinations the services cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.worker.concurrency == 0 {
            return Err(CoreError::Config("worker.concurrency must be at least 1".into()));
        }
        if self.worker.max_attempts == 0 {
            return Err(CoreError::Config("worker.max_attempts must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(CoreError::Config(format!(
                "llm.temperature must be within 0..=2, got {}",
                self.llm.temperature
            )));
        }

        match self.memory.backend {
            MemoryBackend::Postgres if self.postgres.url.is_none() => {
                return Err(CoreError::Config(
                    "memory backend 'postgres' requires DATABASE_URL".into(),
                ));
            }
            MemoryBackend::Chroma | MemoryBackend::Hybrid if self.memory.chroma_url.is_none() => {
                return Err(CoreError::Config(format!(
                    "memory backend '{}' requires CHROMA_URL",
                    self.memory.backend
                )));
            }
            _ => {}
        }

        if self.llm.fallback == FallbackPolicy::Never {
            if self.llm.provider == LlmProviderKind::Mock {
                return Err(CoreError::Config(
                    "provider 'mock' produces no LLM client; fallback 'never' would fail every stage"
                        .into(),
                ));
            }
            if self.llm.api_key.is_none() {
                return Err(CoreError::Config(format!(
                    "no API key for provider '{}' and fallback is disabled",
                    self.llm.provider
                )));
            }
        }
        Ok(())
    }

    /// Default breaker configuration for the registry.
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_failure_threshold(self.circuit_breaker.failure_threshold)
            .with_recovery_timeout(Duration::from_secs(self.circuit_breaker.recovery_timeout_secs))
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> CoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::Config(format!("{} must be a number, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.worker.concurrency, 4);
        assert_eq!(settings.llm.fallback, FallbackPolicy::OnError);
        assert_eq!(settings.memory.backend, MemoryBackend::InMemory);
        settings.validate().unwrap();
    }

    #[test]
    fn test_load_toml_partial() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[worker]\nconcurrency = 8\n\n[llm]\nprovider = \"openai\"\nmodel = \"gpt-4o\""
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.worker.concurrency, 8);
        assert_eq!(settings.worker.max_attempts, 3);
        assert_eq!(settings.llm.provider, LlmProviderKind::OpenAi);
        assert_eq!(settings.llm.model, "gpt-4o");
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "memory:\n  backend: hybrid\n  chroma_url: http://localhost:8000\n  top_k: 3"
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.memory.backend, MemoryBackend::Hybrid);
        assert_eq!(settings.memory.top_k, 3);
        settings.validate().unwrap();
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            Settings::from_file(file.path()),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env_with(lookup(&[
                ("REDIS_URL", "redis://queue:6379"),
                ("DATABASE_URL", "postgres://db/agent_bus"),
                ("AGENT_BUS_LLM_PROVIDER", "openai"),
                ("OPENAI_API_KEY", "sk-test"),
                ("ANTHROPIC_API_KEY", "ant-test"),
                ("AGENT_BUS_MEMORY_BACKEND", "postgres"),
                ("AGENT_BUS_WORKER_CONCURRENCY", "2"),
                ("AGENT_BUS_MAX_ATTEMPTS", "5"),
            ]))
            .unwrap();

        assert_eq!(settings.redis.url, "redis://queue:6379");
        assert_eq!(settings.postgres.url.as_deref(), Some("postgres://db/agent_bus"));
        assert_eq!(settings.llm.provider, LlmProviderKind::OpenAi);
        assert_eq!(settings.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.memory.backend, MemoryBackend::Postgres);
        assert_eq!(settings.worker.concurrency, 2);
        assert_eq!(settings.worker.max_attempts, 5);
        settings.validate().unwrap();
    }

    #[test]
    fn test_invalid_env_value() {
        let mut settings = Settings::default();
        let result = settings.apply_env_with(lookup(&[("AGENT_BUS_WORKER_CONCURRENCY", "many")]));
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut settings = Settings::default();
        settings.worker.concurrency = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.llm.temperature = 2.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.memory.backend = MemoryBackend::Postgres;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.llm.fallback = FallbackPolicy::Never;
        assert!(settings.validate().is_err());
        settings.llm.api_key = Some("key".to_string());
        settings.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_mock_without_fallback() {
        let mut settings = Settings::default();
        settings.llm.provider = LlmProviderKind::Mock;
        settings.llm.fallback = FallbackPolicy::Never;
        assert!(matches!(settings.validate(), Err(CoreError::Config(_))));

        settings.llm.fallback = FallbackPolicy::OnError;
        settings.validate().unwrap();
    }

    #[test]
    fn test_breaker_config() {
        let mut settings = Settings::default();
        settings.circuit_breaker.failure_threshold = 2;
        settings.circuit_breaker.recovery_timeout_secs = 10;
        let config = settings.breaker_config();
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.recovery_timeout, Duration::from_secs(10));
    }
}
