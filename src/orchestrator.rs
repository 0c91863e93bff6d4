//! Submission entry points shared by the CLI and the HTTP transport

use std::sync::Arc;
use tracing::info;

use crate::error::{CrewError, CrewResult};
use crate::observability::metrics::metrics;
use crate::pipeline::executor::SequentialExecutor;
use crate::pipeline::run::{DocumentRef, PipelineRun, RunHandle, RunId};
use crate::registry::RunRegistry;

/// Validates submissions, registers runs, and hands them to the executor
pub struct ResearchOrchestrator {
    registry: Arc<RunRegistry>,
    executor: Arc<SequentialExecutor>,
}

impl ResearchOrchestrator {
    pub fn new(registry: Arc<RunRegistry>, executor: Arc<SequentialExecutor>) -> Self {
        Self { registry, executor }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    async fn register(&self, topic: &str, document_refs: Vec<DocumentRef>) -> CrewResult<RunHandle> {
        let run = PipelineRun::new(topic, document_refs)?;
        info!(
            run_id = %run.run_id,
            stages = run.stages.len(),
            documents = run.document_refs.len(),
            "Run submitted"
        );
        metrics().run_submitted();
        Ok(self.registry.insert(run).await)
    }

    /// Register a run and execute it in the background; returns as soon as it is registered
    pub async fn submit(&self, topic: &str, document_refs: Vec<DocumentRef>) -> CrewResult<RunId> {
        let handle = self.register(topic, document_refs).await?;
        let run_id = handle.read().await.run_id;

        let executor = self.executor.clone();
        tokio::spawn(async move {
            executor.execute(&handle).await;
        });

        Ok(run_id)
    }

    /// Register a run and execute it inline, returning its final state
    pub async fn run_to_completion(
        &self,
        topic: &str,
        document_refs: Vec<DocumentRef>,
    ) -> CrewResult<PipelineRun> {
        let handle = self.register(topic, document_refs).await?;
        self.executor.execute(&handle).await;
        let state = handle.read().await;
        Ok(state.clone())
    }

    /// Resubmit an existing run's topic with a clarification appended, as a new run
    pub async fn clarify(&self, run_id: RunId, clarification: &str) -> CrewResult<RunId> {
        if clarification.trim().is_empty() {
            return Err(CrewError::invalid_input("clarification must not be empty"));
        }

        let original = self
            .registry
            .snapshot(run_id)
            .await
            .ok_or_else(|| CrewError::run_not_found(run_id))?;

        let topic = format!("{}\n\nClarification: {}", original.topic, clarification.trim());
        let new_run_id = self.submit(&topic, original.document_refs).await?;
        info!(run_id = %new_run_id, clarifies = %run_id, "Clarification submitted");
        Ok(new_run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::run::RunStatus;
    use crate::pipeline::stage::StageCatalog;
    use crate::progress::{EventType, ProgressBroadcaster};
    use crate::testing::mocks::{MockDocumentExtractor, StubAgentExecutor};
    use std::time::Duration;

    fn orchestrator() -> ResearchOrchestrator {
        let broadcaster = Arc::new(ProgressBroadcaster::new());
        let registry = Arc::new(RunRegistry::new(broadcaster.clone(), 50));
        let executor = SequentialExecutor::new(
            Arc::new(StageCatalog::default()),
            Arc::new(StubAgentExecutor::new()),
            Arc::new(MockDocumentExtractor::returning("text")),
            broadcaster,
            Duration::from_secs(5),
        );
        ResearchOrchestrator::new(registry, Arc::new(executor))
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let run = orchestrator()
            .run_to_completion("renewable energy", vec![])
            .await
            .unwrap();
        assert_eq!(run.overall_status, RunStatus::Completed);
        assert_eq!(run.final_output.as_deref(), Some("OK:finalize"));
    }

    #[tokio::test]
    async fn test_empty_topic_registers_nothing() {
        let orchestrator = orchestrator();
        assert!(matches!(
            orchestrator.submit("  ", vec![]).await,
            Err(CrewError::InvalidInput { .. })
        ));
        assert!(orchestrator.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_submit_runs_in_background() {
        let orchestrator = orchestrator();
        let run_id = orchestrator.submit("topic", vec![]).await.unwrap();

        let mut subscription = orchestrator
            .registry()
            .broadcaster()
            .subscribe(run_id)
            .await
            .unwrap();
        loop {
            let event = subscription.receiver.recv().await.unwrap();
            if event.event_type.is_terminal() {
                assert_eq!(event.event_type, EventType::RunCompleted);
                break;
            }
        }

        let snapshot = orchestrator.registry().snapshot(run_id).await.unwrap();
        assert_eq!(snapshot.overall_status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_clarify_creates_new_run() {
        let orchestrator = orchestrator();
        let first = orchestrator
            .run_to_completion("solar", vec![])
            .await
            .unwrap();

        let second = orchestrator
            .clarify(first.run_id, "focus on rooftop panels")
            .await
            .unwrap();
        assert_ne!(second, first.run_id);

        let snapshot = orchestrator.registry().snapshot(second).await.unwrap();
        assert_eq!(snapshot.topic, "solar\n\nClarification: focus on rooftop panels");
    }

    #[tokio::test]
    async fn test_clarify_unknown_run() {
        assert!(matches!(
            orchestrator().clarify(RunId::new(), "more").await,
            Err(CrewError::RunNotFound { .. })
        ));
    }
}
