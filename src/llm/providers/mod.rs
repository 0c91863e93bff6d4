//! LLM provider implementations

pub mod anthropic;
pub mod factory;
pub mod ollama;
pub mod openai;

pub use anthropic::*;
pub use factory::create_provider;
pub use ollama::*;
pub use openai::*;
