//! OpenAI-compatible chat completions provider
//!
//! Speaks the `/chat/completions` wire format, which both the hosted OpenAI API and a local
//! Ollama server's `/v1` endpoint accept.

use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, Message,
    MessageRole, TokenUsage,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, warn};

/// OpenAI provider configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// OpenAI provider implementation
pub struct OpenAiProvider {
    name: String,
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    /// Create a provider for the hosted OpenAI API; an API key is required
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::NotConfigured(
                "OpenAI API key is required".to_string(),
            ));
        }

        Self::build("openai", config)
    }

    /// Create a provider for a compatible server that does not authenticate
    pub fn compatible(name: &str, config: OpenAiConfig) -> Result<Self, LlmError> {
        Self::build(name, config)
    }

    fn build(name: &str, config: OpenAiConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            config,
            client,
        })
    }

    /// Estimate token count for messages (pure function)
    fn estimate_token_count(messages: &[OpenAiMessage]) -> usize {
        messages
            .iter()
            .map(|m| m.content.as_ref().map(|c| c.len()).unwrap_or(0) / 4)
            .sum()
    }

    /// Convert completion request to OpenAI format (pure function)
    fn convert_to_openai_request(request: &CompletionRequest) -> OpenAiCompletionRequest {
        OpenAiCompletionRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    /// Parse OpenAI completion response (pure function)
    fn parse_completion_response(
        openai_response: OpenAiCompletionResponse,
        request_metadata: HashMap<String, String>,
    ) -> Result<CompletionResponse, LlmError> {
        let choice = openai_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ApiError("No choices returned".to_string()))?;

        let usage = openai_response
            .usage
            .map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content,
            model: openai_response.model,
            usage,
            finish_reason: Self::convert_finish_reason_pure(choice.finish_reason),
            metadata: request_metadata,
        })
    }

    /// Convert OpenAI finish reason to internal format (pure function)
    fn convert_finish_reason_pure(reason: Option<String>) -> FinishReason {
        match reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Error,
        }
    }

    /// Convert internal message to OpenAI format (pure function)
    fn convert_message(message: &Message) -> OpenAiMessage {
        OpenAiMessage {
            role: match message.role {
                MessageRole::System => "system".to_string(),
                MessageRole::User => "user".to_string(),
                MessageRole::Assistant => "assistant".to_string(),
            },
            content: Some(message.content.clone()),
        }
    }

    /// Check if error should trigger retry (pure function)
    fn should_retry(error: &LlmError) -> bool {
        match error {
            LlmError::NetworkError(_) | LlmError::RateLimitExceeded(_) => true,
            LlmError::ApiError(msg) => msg.contains("server error"),
            _ => false,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.config.api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn available_models(&self) -> Vec<String> {
        vec![
            "gpt-4o".to_string(),
            "gpt-4o-mini".to_string(),
            "gpt-4-turbo".to_string(),
            "gpt-4".to_string(),
        ]
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let openai_request = Self::convert_to_openai_request(&request);

        let estimated_tokens = Self::estimate_token_count(&openai_request.messages);
        debug!(
            provider = %self.name,
            model = %openai_request.model,
            messages = openai_request.messages.len(),
            estimated_tokens,
            "Sending chat completion request"
        );

        self.complete_with_retry(openai_request, request.metadata)
            .await
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let response = self
            .authorize(self.client.get(format!("{}/models", self.config.base_url)))
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::AuthenticationFailed(format!(
                "{} API rejected model listing: {}",
                self.name,
                response.status()
            )))
        }
    }
}

impl OpenAiProvider {
    /// Retry orchestrator - handles only I/O and retry logic
    async fn complete_with_retry(
        &self,
        openai_request: OpenAiCompletionRequest,
        metadata: HashMap<String, String>,
    ) -> Result<CompletionResponse, LlmError> {
        let backoff_delays = [100u64, 200, 300];
        let mut last_error = None;

        for (attempt, &delay_ms) in std::iter::once(&0u64)
            .chain(backoff_delays.iter())
            .enumerate()
        {
            if attempt > 0 {
                debug!(attempt, delay_ms, "Retrying chat completion");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            match self.make_api_request(&openai_request).await {
                Ok(openai_response) => {
                    let response = Self::parse_completion_response(openai_response, metadata)?;
                    debug!(
                        provider = %self.name,
                        total_tokens = response.usage.total_tokens,
                        finish_reason = ?response.finish_reason,
                        retries = attempt,
                        "Chat completion received"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    warn!(provider = %self.name, attempt = attempt + 1, error = %e, "Chat completion attempt failed");
                    if !Self::should_retry(&e) {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        error!(provider = %self.name, "Chat completion failed after all retries");
        Err(last_error
            .unwrap_or_else(|| LlmError::NetworkError("All retry attempts failed".to_string())))
    }

    /// Make single API request
    async fn make_api_request(
        &self,
        openai_request: &OpenAiCompletionRequest,
    ) -> Result<OpenAiCompletionResponse, LlmError> {
        let response = self
            .authorize(
                self.client
                    .post(format!("{}/chat/completions", self.config.base_url)),
            )
            .header("Content-Type", "application/json")
            .json(openai_request)
            .send()
            .await
            .map_err(|e| {
                LlmError::NetworkError(format!(
                    "HTTP request failed: {} (is_connect: {}, is_timeout: {})",
                    e,
                    e.is_connect(),
                    e.is_timeout()
                ))
            })?;

        let status = response.status();

        if status.is_server_error() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(format!(
                "{} API server error: {status} - {error_text}",
                self.name
            )));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::RateLimitExceeded(error_text));
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LlmError::AuthenticationFailed(format!(
                "{} API rejected the API key",
                self.name
            )));
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelNotFound(openai_request.model.clone()));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(provider = %self.name, %status, "Chat completion client error");
            return Err(LlmError::ApiError(format!(
                "{} API error: {status} - {error_text}",
                self.name
            )));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct OpenAiCompletionRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompletionResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    // Some compatible servers omit usage
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
