//! Agent executor backed by an inference provider

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::AgentExecutor;
use crate::config::LlmSection;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider, Message};
use crate::pipeline::stage::{Persona, StageCatalog};

/// Sends each stage to the configured provider, speaking as the stage's persona
pub struct LlmAgentExecutor {
    provider: Arc<dyn LlmProvider>,
    catalog: Arc<StageCatalog>,
    llm: LlmSection,
}

impl LlmAgentExecutor {
    pub fn new(provider: Arc<dyn LlmProvider>, catalog: Arc<StageCatalog>, llm: LlmSection) -> Self {
        Self {
            provider,
            catalog,
            llm,
        }
    }

    /// Build the system prompt (pure function)
    fn build_system_prompt(persona: Option<&Persona>, expected_output: &str) -> String {
        let now = chrono::Utc::now();
        let identity = match persona {
            Some(persona) => format!(
                "You are the {}.\nGoal: {}\n{}",
                persona.title, persona.goal, persona.backstory
            ),
            None => "You are a member of a research crew.".to_string(),
        };

        format!(
            "{identity}\n\nExpected output: {expected_output}\n\nCurrent date and time: {} UTC",
            now.format("%Y-%m-%d %H:%M:%S")
        )
    }

    /// Create completion request (pure function)
    fn create_completion_request(&self, role: &str, messages: Vec<Message>) -> CompletionRequest {
        let mut request = CompletionRequest::new(self.llm.model_for(role), messages);
        request.max_tokens = self.llm.max_tokens;
        request.temperature = self.llm.temperature;
        request.metadata.insert("stage".to_string(), role.to_string());
        request
    }

    /// Extract non-empty text from a response (pure function)
    fn extract_content(response: CompletionResponse) -> Result<String, String> {
        match response.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(format!("model {} returned no content", response.model)),
        }
    }
}

#[async_trait]
impl AgentExecutor for LlmAgentExecutor {
    async fn execute(
        &self,
        role: &str,
        instruction: &str,
        expected_output: &str,
    ) -> Result<String, String> {
        let persona = self
            .catalog
            .descriptor_for_role(role)
            .map(|descriptor| &descriptor.persona);

        let messages = vec![
            Message::system(Self::build_system_prompt(persona, expected_output)),
            Message::user(instruction),
        ];
        let request = self.create_completion_request(role, messages);

        debug!(
            stage = role,
            provider = self.provider.name(),
            model = %request.model,
            instruction_len = instruction.len(),
            "Sending stage to inference provider"
        );

        match self.provider.complete(request).await {
            Ok(response) => {
                debug!(
                    stage = role,
                    tokens = response.usage.total_tokens,
                    "Inference provider responded"
                );
                Self::extract_content(response)
            }
            Err(e) => {
                warn!(stage = role, error = %e, "Inference request failed");
                Err(e.to_string())
            }
        }
    }
}
