//! Error taxonomy for the research pipeline
//!
//! Submission-time problems (`InvalidInput`, `RunNotFound`) are the only errors that reach a
//! caller directly. Stage failures are captured on the stage itself and turned into a failed run
//! by the executor; observer and archive failures stay local to the component that hit them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Main error type for research pipeline operations
#[derive(Debug, Error)]
pub enum CrewError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Stage '{stage}' failed: {message}")]
    StageExecution { stage: String, message: String },

    #[error("Observer delivery failed: {message}")]
    ObserverDelivery { message: String },

    #[error("{collaborator} unavailable: {message}")]
    CollaboratorUnavailable {
        collaborator: String,
        message: String,
    },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CrewError {
    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create stage execution error
    pub fn stage_execution<S: Into<String>, M: Into<String>>(stage: S, message: M) -> Self {
        Self::StageExecution {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create observer delivery error
    pub fn observer_delivery<S: Into<String>>(message: S) -> Self {
        Self::ObserverDelivery {
            message: message.into(),
        }
    }

    /// Create collaborator unavailable error
    pub fn collaborator_unavailable<C: Into<String>, M: Into<String>>(
        collaborator: C,
        message: M,
    ) -> Self {
        Self::CollaboratorUnavailable {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    /// Create run not found error
    pub fn run_not_found(run_id: impl ToString) -> Self {
        Self::RunNotFound {
            run_id: run_id.to_string(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code used when this error crosses the transport boundary
    pub fn status_code(&self) -> u16 {
        match self {
            CrewError::InvalidInput { .. } => 400,
            CrewError::RunNotFound { .. } => 404,
            CrewError::CollaboratorUnavailable { .. } => 503,
            CrewError::StageExecution { .. }
            | CrewError::ObserverDelivery { .. }
            | CrewError::Config(_)
            | CrewError::Internal { .. } => 500,
        }
    }

    /// Client-facing body with secrets stripped from the message
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            error: sanitize_error_message(&self.to_string()),
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}

/// JSON error payload returned by the HTTP API
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub timestamp: u64,
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SECRET_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("secret path pattern is valid")
});

const MAX_ERROR_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Redact credentials and secret-looking paths, then bound the length
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SECRET_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for pipeline operations
pub type CrewResult<T> = Result<T, CrewError>;
