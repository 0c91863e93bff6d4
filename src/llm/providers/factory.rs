//! Builds the configured LLM provider

use crate::config::CrewConfig;
use crate::error::{CrewError, CrewResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::{
    AnthropicConfig, AnthropicProvider, OllamaConfig, OllamaProvider, OpenAiConfig,
    OpenAiProvider,
};
use std::sync::Arc;

/// Create the provider named by `[llm] provider`
pub fn create_provider(config: &CrewConfig) -> CrewResult<Arc<dyn LlmProvider>> {
    let llm = &config.llm;
    let unavailable = |e: crate::llm::LlmError| CrewError::collaborator_unavailable("llm", e.to_string());

    match llm.provider.as_str() {
        "ollama" => {
            let mut ollama_config = OllamaConfig {
                required_models: llm.required_models(),
                ..Default::default()
            };
            if let Some(base_url) = &llm.base_url {
                ollama_config.base_url = base_url.clone();
            }
            let provider = OllamaProvider::new(ollama_config).map_err(unavailable)?;
            Ok(Arc::new(provider))
        }
        "openai" => {
            let api_key = config.get_llm_api_key()?.ok_or_else(|| {
                CrewError::invalid_input("llm.api_key_env is required for the openai provider")
            })?;
            let mut openai_config = OpenAiConfig {
                api_key,
                ..Default::default()
            };
            if let Some(base_url) = &llm.base_url {
                openai_config.base_url = base_url.clone();
            }
            let provider = OpenAiProvider::new(openai_config).map_err(unavailable)?;
            Ok(Arc::new(provider))
        }
        "anthropic" => {
            let api_key = config.get_llm_api_key()?.ok_or_else(|| {
                CrewError::invalid_input("llm.api_key_env is required for the anthropic provider")
            })?;
            let mut anthropic_config = AnthropicConfig {
                api_key,
                ..Default::default()
            };
            if let Some(base_url) = &llm.base_url {
                anthropic_config.base_url = base_url.clone();
            }
            let provider = AnthropicProvider::new(anthropic_config).map_err(unavailable)?;
            Ok(Arc::new(provider))
        }
        other => Err(CrewError::invalid_input(format!(
            "Unsupported LLM provider: {other}"
        ))),
    }
}
