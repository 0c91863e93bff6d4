//! Local Ollama server provider
//!
//! Completions go through Ollama's OpenAI-compatible `/v1` endpoint. The health check uses the
//! native `/api/tags` listing so a preflight can report which configured models are not pulled.

use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmError, LlmProvider};
use crate::llm::providers::openai::{OpenAiConfig, OpenAiProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Ollama provider configuration
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Server root, without the `/v1` suffix
    pub base_url: String,
    pub timeout: Duration,
    /// Models that must be present for the health check to pass
    pub required_models: Vec<String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            // Local models on CPU are slow; allow long generations
            timeout: Duration::from_secs(600),
            required_models: Vec::new(),
        }
    }
}

pub struct OllamaProvider {
    config: OllamaConfig,
    client: Client,
    completions: OpenAiProvider,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Result<Self, LlmError> {
        let root = config.base_url.trim_end_matches('/').to_string();
        let completions = OpenAiProvider::compatible(
            "ollama",
            OpenAiConfig {
                api_key: String::new(),
                base_url: format!("{root}/v1"),
                timeout: config.timeout,
            },
        )?;

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self {
            config: OllamaConfig {
                base_url: root,
                ..config
            },
            client,
            completions,
        })
    }

    /// Models from `required` that are absent in `available` (pure function)
    ///
    /// Ollama reports tagged names such as `llama3.2:latest`; an untagged requirement matches any
    /// tag of that model.
    pub fn missing_models(required: &[String], available: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|model| {
                !available.iter().any(|name| {
                    name == *model
                        || name
                            .strip_prefix(model.as_str())
                            .is_some_and(|rest| rest.starts_with(':'))
                })
            })
            .cloned()
            .collect()
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.config.base_url))
            .send()
            .await
            .map_err(|e| {
                LlmError::NetworkError(format!(
                    "Cannot reach Ollama at {}: {e}",
                    self.config.base_url
                ))
            })?;

        if !response.status().is_success() {
            return Err(LlmError::ApiError(format!(
                "Ollama model listing failed: {}",
                response.status()
            )));
        }

        let tags: OllamaTags = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn available_models(&self) -> Vec<String> {
        self.config.required_models.clone()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.completions.complete(request).await
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let available = self.list_models().await?;
        debug!(models = ?available, "Ollama models available");

        let missing = Self::missing_models(&self.config.required_models, &available);
        if missing.is_empty() {
            Ok(())
        } else {
            warn!(missing = ?missing, "Required Ollama models are not pulled");
            Err(LlmError::ModelNotFound(format!(
                "missing models: {} (run `ollama pull <model>`)",
                missing.join(", ")
            )))
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_untagged_requirement_matches_any_tag() {
        let missing = OllamaProvider::missing_models(
            &names(&["llama3.2", "deepseek-r1:8b"]),
            &names(&["llama3.2:latest", "deepseek-r1:8b"]),
        );
        assert!(missing.is_empty());
    }

    #[test]
    fn test_missing_models_reported() {
        let missing = OllamaProvider::missing_models(
            &names(&["llama3.2", "qwen2.5vl:7b"]),
            &names(&["llama3.2:latest", "llama3.2-vision:latest"]),
        );
        assert_eq!(missing, names(&["qwen2.5vl:7b"]));
    }

    #[test]
    fn test_prefix_without_tag_separator_does_not_match() {
        let missing =
            OllamaProvider::missing_models(&names(&["llama3"]), &names(&["llama3.2:latest"]));
        assert_eq!(missing, names(&["llama3"]));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let provider = OllamaProvider::new(OllamaConfig {
            base_url: "http://localhost:11434/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(provider.config.base_url, "http://localhost:11434");
        assert_eq!(provider.name(), "ollama");
    }
}
