//! Structured logging and process-wide metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use logging::{request_span, run_span, stage_span};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};
