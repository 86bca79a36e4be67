#![allow(dead_code)]
//! Mock LLM Provider for Testing
//!
//! A configurable provider that returns queued responses in order and
//! records every request it receives, so pipeline tests can run without a
//! real model.
//!
//! # Example
//!
//! ```rust,ignore
//! use rove_providers::mock::{MockProvider, MockResponse};
//!
//! let provider = MockProvider::new()
//!     .with_name("openai.a")
//!     .with_response(MockResponse::text("PLAN_START\nStep 1: ...\nPLAN_END"))
//!     .with_response(MockResponse::text("// Step 1\npage.click(\"#go\");"));
//! ```

use crate::{CompletionRequest, CompletionResponse, LLMProvider, Usage};
use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A mock response that can be configured for testing
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// Text returned to the caller
    pub content: String,
    /// Error message to fail with instead of returning content
    pub error: Option<String>,
    /// Time to wait before answering
    pub delay: Option<Duration>,
    /// Usage stats to report
    pub usage: Usage,
}

impl MockResponse {
    /// Create a simple text response
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            error: None,
            delay: None,
            usage: Usage {
                prompt_tokens: 100,
                completion_tokens: content.len() as u32 / 4,
                total_tokens: 100 + content.len() as u32 / 4,
            },
        }
    }

    /// Create a response that fails with the given message
    pub fn error(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::text("")
        }
    }

    /// Builder: answer only after `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A mock LLM provider for testing
///
/// The provider maintains a queue of responses that are returned in order.
/// It also tracks all requests made for verification in tests.
pub struct MockProvider {
    name: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    images: bool,
    /// Queue of responses to return (FIFO)
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// All requests received (for verification)
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    /// Default response when queue is empty
    default_response: Option<MockResponse>,
}

impl MockProvider {
    /// Create a new mock provider with default settings
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            model: "mock-model".to_string(),
            max_tokens: 4096,
            temperature: 0.1,
            images: false,
            responses: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            default_response: None,
        }
    }

    /// Set the provider name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the model name
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Accept image content (acts as a vision provider)
    pub fn with_images(mut self, enabled: bool) -> Self {
        self.images = enabled;
        self
    }

    /// Add a response to the queue
    pub fn with_response(self, response: MockResponse) -> Self {
        self.responses.lock().unwrap().push(response);
        self
    }

    /// Add multiple responses to the queue
    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        self.responses.lock().unwrap().extend(responses);
        self
    }

    /// Set a default response when queue is empty
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = Some(response);
        self
    }

    /// Get all requests that were made to this provider
    pub fn get_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Get the number of requests made
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Shared handle on the recorded requests, usable after the provider is moved
    pub fn request_log(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.requests)
    }

    /// Get the next response from the queue (or default)
    fn next_response(&self) -> MockResponse {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            self.default_response
                .clone()
                .unwrap_or_else(|| MockResponse::text("Mock response (no responses configured)"))
        } else {
            responses.remove(0)
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LLMProvider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.requests.lock().unwrap().push(request);

        let response = self.next_response();

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = response.error {
            anyhow::bail!(error);
        }

        Ok(CompletionResponse {
            content: response.content,
            usage: response.usage,
            model: self.model.clone(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_images(&self) -> bool {
        self.images
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    fn temperature(&self) -> f32 {
        self.temperature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, MessageRole};

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::new(MessageRole::User, text.to_string())],
            max_tokens: None,
            temperature: None,
        }
    }

    #[tokio::test]
    async fn test_responses_in_order_then_default() {
        let provider = MockProvider::new()
            .with_responses(vec![MockResponse::text("first"), MockResponse::text("second")])
            .with_default_response(MockResponse::text("fallback"));

        assert_eq!(provider.complete(request("a")).await.unwrap().content, "first");
        assert_eq!(provider.complete(request("b")).await.unwrap().content, "second");
        assert_eq!(provider.complete(request("c")).await.unwrap().content, "fallback");
        assert_eq!(provider.request_count(), 3);
        assert_eq!(provider.get_requests()[1].messages[0].content, "b");
    }

    #[tokio::test]
    async fn test_error_response() {
        let provider = MockProvider::new().with_response(MockResponse::error("429 rate limit"));
        let err = provider.complete(request("a")).await.unwrap_err();
        assert!(err.to_string().contains("rate limit"));
    }
}
