//! Configuration for the research pipeline
//!
//! Everything the pipeline needs is carried in one explicit [`CrewConfig`] value that is loaded
//! once at startup and handed to the components that need it. Secrets are never stored in the
//! file itself, only the names of the environment variables that hold them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::stage::StageId;

/// Providers understood by the LLM provider factory
pub const SUPPORTED_PROVIDERS: &[&str] = &["ollama", "openai", "anthropic"];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CrewConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    /// Web search is disabled when this section is absent
    pub search: Option<SearchSection>,
    #[serde(default)]
    pub documents: DocumentsSection,
    #[serde(default)]
    pub storage: StorageSection,
}

/// HTTP/WebSocket server section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Where uploaded documents are written before a run starts
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            upload_dir: default_upload_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads/documents")
}

/// Inference backend section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    /// Provider name: "ollama", "openai" or "anthropic"
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model used for any stage without an override
    #[serde(default = "default_model")]
    pub model: String,
    /// Override for the provider's API base URL
    pub base_url: Option<String>,
    /// Environment variable containing the API key
    pub api_key_env: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Per-stage model overrides keyed by stage role
    #[serde(default)]
    pub stage_models: HashMap<String, String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: None,
            temperature: None,
            max_tokens: None,
            stage_models: HashMap::new(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

impl LlmSection {
    /// Model for a stage, falling back to the default model
    pub fn model_for(&self, role: &str) -> &str {
        self.stage_models
            .get(role)
            .map(String::as_str)
            .unwrap_or(&self.model)
    }

    /// Every distinct model the pipeline may request
    pub fn required_models(&self) -> Vec<String> {
        let mut models = vec![self.model.clone()];
        for model in self.stage_models.values() {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
        models
    }
}

/// Pipeline execution section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSection {
    /// Upper bound on a single stage's collaborator call
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_writing_style")]
    pub writing_style: String,
    #[serde(default = "default_writing_length")]
    pub writing_length: String,
    /// Finished runs beyond this count are evicted oldest first
    #[serde(default = "default_max_retained_runs")]
    pub max_retained_runs: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout_secs(),
            writing_style: default_writing_style(),
            writing_length: default_writing_length(),
            max_retained_runs: default_max_retained_runs(),
        }
    }
}

impl PipelineSection {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

fn default_stage_timeout_secs() -> u64 {
    300
}

fn default_writing_style() -> String {
    "professional".to_string()
}

fn default_writing_length() -> String {
    "comprehensive".to_string()
}

fn default_max_retained_runs() -> usize {
    100
}

/// Web search section (Serper API)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchSection {
    #[serde(default = "default_search_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,
    pub base_url: Option<String>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            api_key_env: default_search_api_key_env(),
            max_results: default_search_max_results(),
            base_url: None,
        }
    }
}

fn default_search_api_key_env() -> String {
    "SERPER_API_KEY".to_string()
}

fn default_search_max_results() -> usize {
    10
}

/// Document extraction section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentsSection {
    #[serde(default = "default_max_chars_per_document")]
    pub max_chars_per_document: usize,
}

impl Default for DocumentsSection {
    fn default() -> Self {
        Self {
            max_chars_per_document: default_max_chars_per_document(),
        }
    }
}

fn default_max_chars_per_document() -> usize {
    20_000
}

/// Extraction archive section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    #[serde(default = "default_storage_enabled")]
    pub enabled: bool,
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            enabled: default_storage_enabled(),
            dir: default_storage_dir(),
        }
    }
}

fn default_storage_enabled() -> bool {
    true
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("uploads/json")
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CrewConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CrewConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_PROVIDERS.contains(&self.llm.provider.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Unsupported LLM provider '{}', expected one of {:?}",
                self.llm.provider, SUPPORTED_PROVIDERS
            )));
        }

        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "llm.model must not be empty".to_string(),
            ));
        }

        for role in self.llm.stage_models.keys() {
            if StageId::from_role(role).is_none() {
                return Err(ConfigError::InvalidConfig(format!(
                    "Unknown stage '{role}' in llm.stage_models"
                )));
            }
        }

        validate_url("llm.base_url", self.llm.base_url.as_deref())?;
        if let Some(search) = &self.search {
            validate_url("search.base_url", search.base_url.as_deref())?;
        }

        if self.pipeline.stage_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "pipeline.stage_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.pipeline.max_retained_runs == 0 {
            return Err(ConfigError::InvalidConfig(
                "pipeline.max_retained_runs must be greater than zero".to_string(),
            ));
        }

        // Both are spliced into the writing template before placeholders resolve
        for (field, value) in [
            ("pipeline.writing_style", &self.pipeline.writing_style),
            ("pipeline.writing_length", &self.pipeline.writing_length),
        ] {
            if value.contains(['{', '}']) {
                return Err(ConfigError::InvalidConfig(format!(
                    "{field} must not contain braces: '{value}'"
                )));
            }
        }

        Ok(())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// LLM API key, if the provider needs one
    pub fn get_llm_api_key(&self) -> Result<Option<String>, ConfigError> {
        self.llm
            .api_key_env
            .as_deref()
            .map(Self::get_env_var_required)
            .transpose()
    }

    /// Serper API key for the configured search section
    pub fn get_search_api_key(&self) -> Result<Option<String>, ConfigError> {
        self.search
            .as_ref()
            .map(|search| Self::get_env_var_required(&search.api_key_env))
            .transpose()
    }
}

fn validate_url(field: &str, value: Option<&str>) -> Result<(), ConfigError> {
    if let Some(raw) = value {
        url::Url::parse(raw)
            .map_err(|e| ConfigError::InvalidConfig(format!("{field} '{raw}' is invalid: {e}")))?;
    }
    Ok(())
}
