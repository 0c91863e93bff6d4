//! Run progress events
//!
//! Every stage transition becomes one [`EventRecord`], handed to a [`Progress`] sink through its
//! single `record` entry point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::run::RunId;

pub mod broadcaster;
pub use broadcaster::{Observer, ObserverId, ProgressBroadcaster, Subscription};

/// Kind of lifecycle transition an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StageStarted,
    StageFinished,
    StageFailed,
    RunCompleted,
    RunFailed,
}

impl EventType {
    /// Run-level events end a run's stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::RunCompleted | EventType::RunFailed)
    }
}

/// One timestamped entry in a run's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub run_id: RunId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub stage_role: Option<String>,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(
        run_id: RunId,
        event_type: EventType,
        stage_role: Option<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            event_type,
            stage_role,
            payload: payload.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn stage_started(run_id: RunId, role: &str, payload: impl Into<String>) -> Self {
        Self::new(run_id, EventType::StageStarted, Some(role.to_string()), payload)
    }

    pub fn stage_finished(run_id: RunId, role: &str, output: impl Into<String>) -> Self {
        Self::new(run_id, EventType::StageFinished, Some(role.to_string()), output)
    }

    pub fn stage_failed(run_id: RunId, role: &str, error: impl Into<String>) -> Self {
        Self::new(run_id, EventType::StageFailed, Some(role.to_string()), error)
    }

    pub fn run_completed(run_id: RunId, final_output: impl Into<String>) -> Self {
        Self::new(run_id, EventType::RunCompleted, None, final_output)
    }

    pub fn run_failed(run_id: RunId, diagnostic: impl Into<String>) -> Self {
        Self::new(run_id, EventType::RunFailed, None, diagnostic)
    }

    /// Single-line rendering used by the CLI
    pub fn summary_line(&self) -> String {
        let first_line = self.payload.lines().next().unwrap_or_default();
        match (&self.event_type, &self.stage_role) {
            (EventType::StageStarted, Some(role)) => format!("[{role}] started: {first_line}"),
            (EventType::StageFinished, Some(role)) => format!("[{role}] finished"),
            (EventType::StageFailed, Some(role)) => format!("[{role}] failed: {first_line}"),
            (EventType::RunCompleted, _) => "run completed".to_string(),
            (EventType::RunFailed, _) => format!("run failed: {first_line}"),
            (_, None) => first_line.to_string(),
        }
    }
}

/// Sink for run progress events
#[async_trait]
pub trait Progress: Send + Sync {
    /// Append `event` to its run's log and deliver it to live observers
    async fn record(&self, event: EventRecord);
}

/// Progress sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgress;

#[async_trait]
impl Progress for NoOpProgress {
    async fn record(&self, _event: EventRecord) {}
}
