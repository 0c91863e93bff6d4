//! Pipeline run state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::assembler::assemble;
use super::resolver::StageContext;
use super::stage::{StageId, StageInstance, StageStatus};
use crate::error::{CrewError, CrewResult};

/// Unique identifier of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = CrewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(RunId)
            .map_err(|_| CrewError::run_not_found(s))
    }
}

/// A document submitted alongside the topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub path: PathBuf,
    /// Display name, usually the original upload file name
    pub name: String,
}

impl DocumentRef {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }

    /// Use the file name component of `path` as the display name
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::new(path, name)
    }
}

/// Overall state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Status string exposed by the HTTP API; failures are reported as "error"
    pub fn as_api_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "error",
        }
    }
}

/// Shared handle to a run: many readers, one writing executor
pub type RunHandle = Arc<RwLock<PipelineRun>>;

/// One end-to-end execution of the assembled stages for a topic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRun {
    pub run_id: RunId,
    pub topic: String,
    pub document_refs: Vec<DocumentRef>,
    pub stages: Vec<StageInstance>,
    pub overall_status: RunStatus,
    pub final_output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Validate the submission and assemble its stages under a fresh run id
    pub fn new(topic: &str, document_refs: Vec<DocumentRef>) -> CrewResult<Self> {
        let stages = assemble(topic, &document_refs)?;
        Ok(Self {
            run_id: RunId::new(),
            topic: topic.trim().to_string(),
            document_refs,
            stages,
            overall_status: RunStatus::Pending,
            final_output: None,
            created_at: Utc::now(),
            finished_at: None,
        })
    }

    pub fn stage(&self, id: StageId) -> Option<&StageInstance> {
        self.stages.iter().find(|s| s.descriptor_id == id)
    }

    pub fn is_terminal(&self) -> bool {
        self.overall_status.is_terminal()
    }

    /// Context for the stage at `index`: inputs plus every earlier successful output
    pub fn context_for(&self, index: usize) -> StageContext {
        let mut context = StageContext::new(self.topic.clone()).with_documents(&self.document_refs);
        for stage in self.stages.iter().take(index) {
            if let (StageStatus::Succeeded, Some(output)) = (stage.status, &stage.output) {
                context.set_output(stage.descriptor_id, output.clone());
            }
        }
        context
    }

    /// Pending -> Running
    pub fn mark_running(&mut self) -> CrewResult<()> {
        if self.overall_status != RunStatus::Pending {
            return Err(CrewError::internal(format!(
                "run {} is {:?}, cannot start",
                self.run_id, self.overall_status
            )));
        }
        self.overall_status = RunStatus::Running;
        Ok(())
    }

    /// Running -> Completed; every stage must have succeeded
    pub fn complete(&mut self) -> CrewResult<()> {
        self.expect_running()?;
        if let Some(stage) = self
            .stages
            .iter()
            .find(|s| s.status != StageStatus::Succeeded)
        {
            return Err(CrewError::internal(format!(
                "run {} cannot complete: stage '{}' is {:?}",
                self.run_id,
                stage.role(),
                stage.status
            )));
        }

        self.final_output = self.stages.last().and_then(|s| s.output.clone());
        self.overall_status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Failed with a diagnostic final output
    pub fn fail(&mut self, diagnostic: String) -> CrewResult<()> {
        self.expect_running()?;
        self.final_output = Some(diagnostic);
        self.overall_status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// The failed stage's error, if any
    pub fn error(&self) -> Option<&str> {
        self.stages.iter().find_map(|s| s.error.as_deref())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            topic: self.topic.clone(),
            status: self.overall_status,
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }

    fn expect_running(&self) -> CrewResult<()> {
        if self.overall_status == RunStatus::Running {
            Ok(())
        } else {
            Err(CrewError::internal(format!(
                "run {} is {:?}, expected running",
                self.run_id, self.overall_status
            )))
        }
    }
}

/// Compact listing entry for a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub topic: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Diagnostic stored as `final_output` when a stage aborts the run
pub fn failure_diagnostic(role: &str, error: &str) -> String {
    format!("Pipeline failed at stage '{role}': {error}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::resolver::{resolve, NO_DOCUMENTS_PROVIDED};

    fn succeed_stage(run: &mut PipelineRun, index: usize, output: &str) {
        run.stages[index].start().unwrap();
        run.stages[index].succeed(output.to_string()).unwrap();
    }

    #[test]
    fn test_run_ids_are_unique_and_parse() {
        let a = RunId::new();
        let b = RunId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<RunId>().unwrap(), a);
        assert!(matches!(
            "not-a-uuid".parse::<RunId>(),
            Err(CrewError::RunNotFound { .. })
        ));
    }

    #[test]
    fn test_document_ref_from_path_uses_file_name() {
        let doc = DocumentRef::from_path("/data/uploads/report.pdf");
        assert_eq!(doc.name, "report.pdf");
        assert_eq!(doc.path, PathBuf::from("/data/uploads/report.pdf"));
    }

    #[test]
    fn test_new_run_is_pending_with_trimmed_topic() {
        let run = PipelineRun::new("  quantum sensors  ", vec![]).unwrap();
        assert_eq!(run.topic, "quantum sensors");
        assert_eq!(run.overall_status, RunStatus::Pending);
        assert!(run.final_output.is_none());
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Pending));
    }

    #[test]
    fn test_context_only_includes_earlier_successes() {
        let mut run = PipelineRun::new("topic", vec![]).unwrap();
        succeed_stage(&mut run, 0, "search summary");
        succeed_stage(&mut run, 1, "research report");

        let context = run.context_for(1);
        assert_eq!(resolve("{web_search_output}", &context), "search summary");
        assert_eq!(
            resolve("{research_output}", &context),
            "No data provided for research_output."
        );
        assert_eq!(
            resolve("{document_extraction_output}", &context),
            NO_DOCUMENTS_PROVIDED
        );
    }

    #[test]
    fn test_complete_requires_all_stages_succeeded() {
        let mut run = PipelineRun::new("topic", vec![]).unwrap();
        run.mark_running().unwrap();
        assert!(run.complete().is_err());

        for index in 0..run.stages.len() {
            succeed_stage(&mut run, index, &format!("out-{index}"));
        }
        run.complete().unwrap();

        assert_eq!(run.overall_status, RunStatus::Completed);
        assert_eq!(run.final_output.as_deref(), Some("out-4"));
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_fail_sets_diagnostic() {
        let mut run = PipelineRun::new("topic", vec![]).unwrap();
        run.mark_running().unwrap();
        run.fail(failure_diagnostic("analysis", "timed out")).unwrap();

        assert_eq!(run.overall_status, RunStatus::Failed);
        assert_eq!(
            run.final_output.as_deref(),
            Some("Pipeline failed at stage 'analysis': timed out")
        );
        assert!(run.mark_running().is_err());
        assert!(run.fail("again".to_string()).is_err());
    }

    #[test]
    fn test_api_status_strings() {
        assert_eq!(RunStatus::Failed.as_api_str(), "error");
        assert_eq!(RunStatus::Completed.as_api_str(), "completed");
        assert_eq!(
            serde_json::to_string(&RunStatus::Running).unwrap(),
            "\"running\""
        );
    }
}
