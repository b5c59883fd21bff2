//! Scripted LLM client for testing.
//!
//! Returns queued responses in order, then a default response. It can be
//! told to fail and records every request for verification, so agents can
//! be exercised without network access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{AgentError, AgentResult};
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient};

type Responder = Arc<dyn Fn(&CompletionRequest) -> String + Send + Sync>;

/// Mock LLM client for testing.
#[derive(Clone)]
pub struct MockLlmClient {
    model: String,
    /// Queued responses, returned in order.
    responses: Arc<RwLock<Vec<String>>>,
    /// Index of next response to return.
    response_index: Arc<AtomicUsize>,
    /// Returned once the queue is exhausted.
    default_response: Arc<RwLock<Option<String>>>,
    /// Computes a response from the request when set.
    responder: Arc<RwLock<Option<Responder>>>,
    /// Failure returned for every call.
    failure: Arc<RwLock<Option<String>>>,
    /// Number of upcoming calls that fail before responses resume.
    fail_next: Arc<AtomicUsize>,
    /// Captured requests.
    requests: Arc<RwLock<Vec<CompletionRequest>>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Arc::new(RwLock::new(Vec::new())),
            response_index: Arc::new(AtomicUsize::new(0)),
            default_response: Arc::new(RwLock::new(None)),
            responder: Arc::new(RwLock::new(None)),
            failure: Arc::new(RwLock::new(None)),
            fail_next: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn set_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Queue a response.
    pub fn add_response(self, response: impl Into<String>) -> Self {
        self.responses.write().push(response.into());
        self
    }

    /// Replace the queued responses.
    pub fn with_responses(self, responses: Vec<String>) -> Self {
        *self.responses.write() = responses;
        self.response_index.store(0, Ordering::SeqCst);
        self
    }

    pub fn with_default_response(self, response: impl Into<String>) -> Self {
        *self.default_response.write() = Some(response.into());
        self
    }

    /// Compute responses from the request instead of the queue.
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> String + Send + Sync + 'static,
    {
        *self.responder.write() = Some(Arc::new(responder));
        self
    }

    /// Fail every call with `message`.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.failure.write() = Some(message.into());
        self
    }

    /// Fail the next `count` calls.
    pub fn fail_next(self, count: usize) -> Self {
        self.fail_next.store(count, Ordering::SeqCst);
        self
    }

    /// Stop failing.
    pub fn clear_failure(&self) {
        *self.failure.write() = None;
        self.fail_next.store(0, Ordering::SeqCst);
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.read().len()
    }

    fn next_response(&self, request: &CompletionRequest) -> AgentResult<String> {
        if let Some(message) = self.failure.read().clone() {
            return Err(AgentError::Llm(message));
        }
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(AgentError::Llm("simulated failure".to_string()));
        }

        if let Some(responder) = self.responder.read().clone() {
            return Ok(responder(request));
        }

        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        if let Some(response) = self.responses.read().get(index) {
            return Ok(response.clone());
        }

        self.default_response
            .read()
            .clone()
            .ok_or_else(|| AgentError::Llm("no scripted response left".to_string()))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: CompletionRequest) -> AgentResult<CompletionResponse> {
        self.requests.write().push(request.clone());
        let content = self.next_response(&request)?;

        Ok(CompletionResponse {
            input_tokens: (request.messages.iter().map(|m| m.content.len()).sum::<usize>() / 4) as u64,
            output_tokens: (content.len() / 4) as u64,
            content,
            model: self.model.clone(),
        })
    }

    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responses_in_order_then_default() {
        let client = MockLlmClient::new()
            .add_response("first")
            .add_response("second")
            .with_default_response("default");

        for expected in ["first", "second", "default", "default"] {
            let response = client.complete(CompletionRequest::new("q")).await.unwrap();
            assert_eq!(response.content, expected);
        }
        assert_eq!(client.call_count(), 4);
    }

    #[tokio::test]
    async fn test_exhausted_without_default_fails() {
        let client = MockLlmClient::new();
        assert!(client.complete(CompletionRequest::new("q")).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_next_then_recover() {
        let client = MockLlmClient::new()
            .with_default_response("ok")
            .fail_next(2);

        assert!(client.complete(CompletionRequest::new("a")).await.is_err());
        assert!(client.complete(CompletionRequest::new("b")).await.is_err());
        assert_eq!(
            client.complete(CompletionRequest::new("c")).await.unwrap().content,
            "ok"
        );
        assert_eq!(client.requests()[2].messages[0].content, "c");
    }

    #[tokio::test]
    async fn test_responder_sees_request() {
        let client = MockLlmClient::new().with_responder(|req| {
            req.system.clone().unwrap_or_default().to_uppercase()
        });
        let response = client
            .complete(CompletionRequest::new("q").with_system("plan"))
            .await
            .unwrap();
        assert_eq!(response.content, "PLAN");
    }
}
