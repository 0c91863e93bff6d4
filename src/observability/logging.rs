//! Structured logging using the tracing crate
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering entirely
//!
//! ```bash
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG research-crew serve
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Machine-readable JSON lines
    Json,
    /// Multi-line, colored
    Pretty,
    /// Single-line, colored
    Compact,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn span_events(include_spans: bool) -> FmtSpan {
    if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

fn build_filter(level: Level) -> EnvFilter {
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }

    let mut filter = EnvFilter::new(level.to_string());
    // Quiet the HTTP stack
    for directive in ["hyper=warn", "warp=warn", "reqwest=warn", "tokio=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize logging with manual configuration
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    let result = match format {
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

/// Initialize logging from environment variables, raising the level for `-v` flags
pub fn init_default_logging(verbosity: u8) {
    let level = match verbosity {
        0 => parse_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string())),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));
    let include_spans = env::var("LOG_SPANS")
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(false);

    init_logging(level, format, include_spans);
}

/// Span covering one pipeline run
#[macro_export]
macro_rules! run_span {
    ($($field:tt)*) => {
        tracing::info_span!("pipeline_run", $($field)*)
    };
}

/// Span covering one stage within a run
#[macro_export]
macro_rules! stage_span {
    ($($field:tt)*) => {
        tracing::info_span!("stage_execution", $($field)*)
    };
}

/// Span covering one HTTP or WebSocket request
#[macro_export]
macro_rules! request_span {
    ($($field:tt)*) => {
        tracing::info_span!("transport_request", $($field)*)
    };
}

pub use crate::{request_span, run_span, stage_span};
