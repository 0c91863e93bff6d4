//! Inference backend abstraction
//!
//! Provider-agnostic interface for chat completions with Ollama, OpenAI and Anthropic backends.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;
