//! LLM clients for agent completions.
//!
//! [`LlmAdapter`] speaks the Anthropic Messages API and the OpenAI Chat
//! Completions API. Provider and credentials come from [`LlmSettings`] or
//! from environment variables.

use std::time::Duration;

use async_trait::async_trait;
use bus_core::{LlmProviderKind, LlmSettings};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};

const MAX_RETRIES: u32 = 3;
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Message author in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// A single-turn request with a user prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: 4096,
            temperature: 0.2,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Response from an LLM including usage info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A chat completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> AgentResult<CompletionResponse>;

    fn provider(&self) -> &str;

    fn model(&self) -> &str;
}

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Anthropic,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "openai",
            LlmProvider::Anthropic => "anthropic",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "gpt-4o-mini",
            LlmProvider::Anthropic => "claude-sonnet-4-20250514",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => OPENAI_BASE_URL,
            LlmProvider::Anthropic => ANTHROPIC_BASE_URL,
        }
    }
}

/// LLM adapter that handles API calls
pub struct LlmAdapter {
    provider: LlmProvider,
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl LlmAdapter {
    /// Create a new LLM adapter with explicit configuration
    pub fn new(provider: LlmProvider, api_key: String, model: Option<String>) -> Self {
        Self {
            provider,
            api_key,
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            base_url: provider.default_base_url().to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the adapter at a different API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Apply a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> AgentResult<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(self)
    }

    /// Create an LLM adapter from environment variables
    ///
    /// Checks in order:
    /// 1. ANTHROPIC_API_KEY
    /// 2. OPENAI_API_KEY
    ///
    /// `AGENT_BUS_LLM_MODEL` overrides the default model.
    pub fn from_env() -> AgentResult<Self> {
        let custom_model = std::env::var("AGENT_BUS_LLM_MODEL")
            .ok()
            .filter(|m| !m.is_empty());

        if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
            if !api_key.is_empty() {
                return Ok(Self::new(LlmProvider::Anthropic, api_key, custom_model));
            }
        }

        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            if !api_key.is_empty() {
                return Ok(Self::new(LlmProvider::OpenAI, api_key, custom_model));
            }
        }

        Err(AgentError::LlmNotConfigured)
    }

    /// Create an LLM adapter from settings.
    ///
    /// The mock provider and a missing API key yield
    /// [`AgentError::LlmNotConfigured`].
    pub fn from_settings(settings: &LlmSettings) -> AgentResult<Self> {
        let provider = match settings.provider {
            LlmProviderKind::Anthropic => LlmProvider::Anthropic,
            LlmProviderKind::OpenAi => LlmProvider::OpenAI,
            LlmProviderKind::Mock => return Err(AgentError::LlmNotConfigured),
        };
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(AgentError::LlmNotConfigured)?;

        let model = Some(settings.model.clone()).filter(|m| !m.is_empty());
        let mut adapter = Self::new(provider, api_key, model)
            .with_timeout(Duration::from_secs(settings.timeout_secs))?;
        if let Some(base_url) = &settings.base_url {
            adapter = adapter.with_base_url(base_url.clone());
        }
        Ok(adapter)
    }

    /// POST `body` with retries on network errors, 5xx and 429.
    async fn post_with_retry<B, T>(&self, path: &str, body: &B) -> AgentResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let label = match self.provider {
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Anthropic => "Anthropic",
        };
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 2s, 4s
                let delay = Duration::from_secs(1 << attempt);
                debug!("Retrying {} request in {:?}", label, delay);
                tokio::time::sleep(delay).await;
            }

            let request = self.client.post(&url).header("Content-Type", "application/json");
            let request = match self.provider {
                LlmProvider::OpenAI => {
                    request.header("Authorization", format!("Bearer {}", self.api_key))
                }
                LlmProvider::Anthropic => request
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION),
            };

            let response = match request.json(body).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("{} network error (attempt {}/{}): {}", label, attempt + 1, MAX_RETRIES, e);
                    last_error = Some(AgentError::Llm(format!("Network error: {}", e)));
                    continue;
                }
            };

            let status = response.status();
            if status.is_server_error() || status.as_u16() == 429 {
                let body = response.text().await.unwrap_or_default();
                warn!("{} API error {} (attempt {}/{})", label, status, attempt + 1, MAX_RETRIES);
                last_error = Some(AgentError::Llm(format!(
                    "{} API error {} (attempt {}/{}): {}",
                    label,
                    status,
                    attempt + 1,
                    MAX_RETRIES,
                    body
                )));
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AgentError::Llm(format!("{} API error {}: {}", label, status, body)));
            }

            return response
                .json()
                .await
                .map_err(|e| AgentError::InvalidResponse(format!("Failed to parse response: {}", e)));
        }

        Err(last_error.unwrap_or_else(|| AgentError::Llm("Max retries exceeded".to_string())))
    }

    async fn complete_openai(&self, request: &CompletionRequest) -> AgentResult<CompletionResponse> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(OpenAIMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().map(|m| OpenAIMessage {
            role: match m.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            },
            content: m.content.clone(),
        }));

        let body = OpenAIRequest {
            model: self.model.clone(),
            messages,
            max_completion_tokens: Some(request.max_tokens),
            temperature: request.temperature,
        };

        let result: OpenAIResponse = self.post_with_retry("/v1/chat/completions", &body).await?;
        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AgentError::InvalidResponse("No response from OpenAI".to_string()))?;

        let (input_tokens, output_tokens) = result
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(CompletionResponse {
            content,
            model: result.model.unwrap_or_else(|| self.model.clone()),
            input_tokens,
            output_tokens,
        })
    }

    async fn complete_anthropic(&self, request: &CompletionRequest) -> AgentResult<CompletionResponse> {
        // Anthropic takes the system prompt separately
        let body = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| AnthropicMessage {
                    role: match m.role {
                        MessageRole::User => "user",
                        MessageRole::Assistant => "assistant",
                    },
                    content: m.content.clone(),
                })
                .collect(),
        };

        let result: AnthropicResponse = self.post_with_retry("/v1/messages", &body).await?;
        let content: String = result
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if content.is_empty() {
            return Err(AgentError::InvalidResponse(
                "No response from Anthropic".to_string(),
            ));
        }

        let (input_tokens, output_tokens) = result
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or((0, 0));

        Ok(CompletionResponse {
            content,
            model: result.model.unwrap_or_else(|| self.model.clone()),
            input_tokens,
            output_tokens,
        })
    }
}

#[async_trait]
impl LlmClient for LlmAdapter {
    async fn complete(&self, request: CompletionRequest) -> AgentResult<CompletionResponse> {
        debug!(
            "LLM completion via {} ({}), {} messages",
            self.provider.as_str(),
            self.model,
            request.messages.len()
        );
        match self.provider {
            LlmProvider::OpenAI => self.complete_openai(&request).await,
            LlmProvider::Anthropic => self.complete_anthropic(&request).await,
        }
    }

    fn provider(&self) -> &str {
        self.provider.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<AnthropicContent>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}
