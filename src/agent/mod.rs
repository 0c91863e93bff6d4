//! Stage agents
//!
//! The executor hands each non-extraction stage to an [`AgentExecutor`] as a (role, instruction,
//! expected output) triple and gets back either the stage output or an error description.

use async_trait::async_trait;

pub mod llm_agent;

pub use llm_agent::LlmAgentExecutor;

/// Runs one stage's instruction on behalf of a role
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Produce the stage output, or a human-readable reason it could not be produced
    async fn execute(
        &self,
        role: &str,
        instruction: &str,
        expected_output: &str,
    ) -> Result<String, String>;
}
