//! Sequential stage execution with abort-on-failure
//!
//! The executor is the only writer of a run's state. It takes the run's write lock for short,
//! synchronous transitions and never holds it across a collaborator call, so status readers and
//! observers are never blocked by a slow stage.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Instrument};

use super::resolver::resolve;
use super::run::{failure_diagnostic, DocumentRef, RunHandle, RunId, RunStatus};
use super::stage::{StageCatalog, StageId};
use crate::agent::AgentExecutor;
use crate::observability::metrics::metrics;
use crate::progress::{EventRecord, Progress};
use crate::storage::{extraction_record, RecordStore};
use crate::tools::{DocumentExtractor, SearchTool};

/// Runs a pipeline's stages strictly in order
pub struct SequentialExecutor {
    catalog: Arc<StageCatalog>,
    agent: Arc<dyn AgentExecutor>,
    extractor: Arc<dyn DocumentExtractor>,
    progress: Arc<dyn Progress>,
    stage_timeout: Duration,
    search: Option<Arc<dyn SearchTool>>,
    archive: Option<Arc<dyn RecordStore>>,
}

impl SequentialExecutor {
    pub fn new(
        catalog: Arc<StageCatalog>,
        agent: Arc<dyn AgentExecutor>,
        extractor: Arc<dyn DocumentExtractor>,
        progress: Arc<dyn Progress>,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            agent,
            extractor,
            progress,
            stage_timeout,
            search: None,
            archive: None,
        }
    }

    /// Feed web search results into the web search stage
    pub fn with_search(mut self, search: Arc<dyn SearchTool>) -> Self {
        self.search = Some(search);
        self
    }

    /// Archive extraction summaries, best-effort
    pub fn with_archive(mut self, archive: Arc<dyn RecordStore>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    /// Drive a pending run to a terminal status
    ///
    /// Stage failures never escape: the first one fails the run with a diagnostic and leaves the
    /// remaining stages pending.
    pub async fn execute(&self, run: &RunHandle) -> RunStatus {
        let (run_id, stage_count) = {
            let mut state = run.write().await;
            if let Err(e) = state.mark_running() {
                warn!(run_id = %state.run_id, error = %e, "Run not executed");
                return state.overall_status;
            }
            (state.run_id, state.stages.len())
        };

        metrics().run_started();
        let started = Instant::now();
        let span = crate::run_span!(run_id = %run_id, stages = stage_count);

        async move {
            info!("Run started");

            for index in 0..stage_count {
                if let Err((role, stage_error)) = self.run_stage(run, run_id, index).await {
                    let diagnostic = failure_diagnostic(role, &stage_error);
                    if let Err(e) = run.write().await.fail(diagnostic.clone()) {
                        error!(error = %e, "Could not mark run failed");
                    }
                    self.progress
                        .record(EventRecord::run_failed(run_id, diagnostic))
                        .await;
                    metrics().run_failed(started.elapsed());
                    warn!(stage = role, error = %stage_error, duration_ms = started.elapsed().as_millis() as u64, "Run failed");
                    return RunStatus::Failed;
                }
            }

            let completion = {
                let mut state = run.write().await;
                state
                    .complete()
                    .map(|()| state.final_output.clone().unwrap_or_default())
            };

            match completion {
                Ok(final_output) => {
                    self.progress
                        .record(EventRecord::run_completed(run_id, final_output))
                        .await;
                    metrics().run_completed(started.elapsed());
                    info!(duration_ms = started.elapsed().as_millis() as u64, "Run completed");
                    RunStatus::Completed
                }
                Err(e) => {
                    let diagnostic = e.to_string();
                    if let Err(e) = run.write().await.fail(diagnostic.clone()) {
                        error!(error = %e, "Could not mark run failed");
                    }
                    self.progress
                        .record(EventRecord::run_failed(run_id, diagnostic))
                        .await;
                    metrics().run_failed(started.elapsed());
                    RunStatus::Failed
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run one stage to a terminal status; `Err` carries the role and error of a failed stage
    async fn run_stage(
        &self,
        run: &RunHandle,
        run_id: RunId,
        index: usize,
    ) -> Result<(), (&'static str, String)> {
        let (stage_id, topic, document_refs) = {
            let mut state = run.write().await;
            let stage_id = state.stages[index].descriptor_id;
            state.stages[index]
                .start()
                .map_err(|e| (stage_id.as_str(), e.to_string()))?;
            (stage_id, state.topic.clone(), state.document_refs.clone())
        };

        let role = stage_id.as_str();
        let descriptor = self.catalog.descriptor(stage_id);
        self.progress
            .record(EventRecord::stage_started(
                run_id,
                role,
                descriptor.persona.title.clone(),
            ))
            .await;

        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            self.stage_timeout,
            self.invoke(run, index, stage_id, &topic, &document_refs)
                .instrument(crate::stage_span!(stage = role)),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                metrics().stage_timed_out(role);
                Err(format!("timed out after {:?}", self.stage_timeout))
            }
        };
        metrics().stage_executed(role, started.elapsed(), outcome.is_ok());

        match outcome {
            Ok(output) => {
                run.write()
                    .await
                    .stages[index]
                    .succeed(output.clone())
                    .map_err(|e| (role, e.to_string()))?;

                if stage_id == StageId::DocumentExtraction {
                    self.archive_extraction(run_id, &document_refs, &output).await;
                }

                info!(stage = role, duration_ms = started.elapsed().as_millis() as u64, "Stage finished");
                self.progress
                    .record(EventRecord::stage_finished(run_id, role, output))
                    .await;
                Ok(())
            }
            Err(stage_error) => {
                if let Err(e) = run.write().await.stages[index].fail(stage_error.clone()) {
                    error!(stage = role, error = %e, "Could not mark stage failed");
                }

                warn!(stage = role, error = %stage_error, "Stage failed");
                self.progress
                    .record(EventRecord::stage_failed(run_id, role, stage_error.clone()))
                    .await;
                Err((role, stage_error))
            }
        }
    }

    /// The timed part of a stage: gather inputs, resolve the instruction, call the collaborator
    async fn invoke(
        &self,
        run: &RunHandle,
        index: usize,
        stage_id: StageId,
        topic: &str,
        document_refs: &[DocumentRef],
    ) -> Result<String, String> {
        let descriptor = self.catalog.descriptor(stage_id);

        let search_results = match (&self.search, stage_id) {
            (Some(search), StageId::WebSearch) => Some(search.search(topic).await?),
            _ => None,
        };

        let instruction = {
            let state = run.read().await;
            let mut context = state.context_for(index);
            if let Some(results) = search_results {
                context = context.with_search_results(results);
            }
            resolve(&descriptor.instruction_template, &context)
        };

        run.write()
            .await
            .stages[index]
            .set_instruction(instruction.clone())
            .map_err(|e| e.to_string())?;

        match stage_id {
            StageId::DocumentExtraction => self.extractor.extract(document_refs, Some(topic)).await,
            _ => {
                self.agent
                    .execute(&descriptor.role, &instruction, &descriptor.expected_output)
                    .await
            }
        }
    }

    async fn archive_extraction(&self, run_id: RunId, document_refs: &[DocumentRef], summary: &str) {
        let Some(archive) = &self.archive else {
            return;
        };

        match archive
            .save(extraction_record(run_id, document_refs, summary), None)
            .await
        {
            Ok(record_id) => info!(record_id = %record_id, "Extraction archived"),
            Err(e) => {
                metrics().archive_failed();
                warn!(error = %e, "Failed to archive extraction");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::run::PipelineRun;
    use crate::pipeline::stage::StageStatus;
    use crate::progress::{EventType, ProgressBroadcaster};
    use crate::storage::MemoryStore;
    use crate::testing::mocks::{MockDocumentExtractor, MockSearchTool, StubAgentExecutor};
    use tokio::sync::RwLock;

    struct Harness {
        broadcaster: Arc<ProgressBroadcaster>,
        agent: Arc<StubAgentExecutor>,
        executor: SequentialExecutor,
    }

    fn harness(agent: StubAgentExecutor) -> Harness {
        let broadcaster = Arc::new(ProgressBroadcaster::new());
        let agent = Arc::new(agent);
        let executor = SequentialExecutor::new(
            Arc::new(StageCatalog::default()),
            agent.clone(),
            Arc::new(MockDocumentExtractor::returning("extracted text")),
            broadcaster.clone(),
            Duration::from_secs(5),
        );
        Harness {
            broadcaster,
            agent,
            executor,
        }
    }

    fn handle(topic: &str, docs: Vec<DocumentRef>) -> RunHandle {
        Arc::new(RwLock::new(PipelineRun::new(topic, docs).unwrap()))
    }

    #[tokio::test]
    async fn test_all_stages_succeed() {
        let h = harness(StubAgentExecutor::new());
        let run = handle("renewable energy", vec![]);

        assert_eq!(h.executor.execute(&run).await, RunStatus::Completed);

        let state = run.read().await;
        assert_eq!(state.stages.len(), 5);
        assert_eq!(state.final_output.as_deref(), Some("OK:finalize"));
        assert!(state.stages.iter().all(|s| s.status == StageStatus::Succeeded));
        assert!(state.stages.iter().all(|s| !s.resolved_instruction.is_empty()));
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_stages() {
        let h = harness(StubAgentExecutor::new().failing_on("analysis"));
        let run = handle("renewable energy", vec![]);

        assert_eq!(h.executor.execute(&run).await, RunStatus::Failed);

        let state = run.read().await;
        let status_of = |id| state.stage(id).unwrap().status;
        assert_eq!(status_of(StageId::Analysis), StageStatus::Failed);
        assert_eq!(status_of(StageId::Writing), StageStatus::Pending);
        assert_eq!(status_of(StageId::Finalize), StageStatus::Pending);
        assert!(state.final_output.as_deref().unwrap().contains("analysis"));

        let roles: Vec<String> = h.agent.calls().await.into_iter().map(|(role, _)| role).collect();
        assert_eq!(roles, vec!["web_search", "research", "analysis"]);
    }

    #[tokio::test]
    async fn test_events_are_stage_ordered() {
        let h = harness(StubAgentExecutor::new());
        let run = handle("topic", vec![DocumentRef::from_path("/tmp/doc.txt")]);
        let run_id = run.read().await.run_id;

        h.executor.execute(&run).await;

        let events = h.broadcaster.events(run_id).await;
        assert_eq!(events.len(), 6 * 2 + 1);
        for (i, pair) in events[..12].chunks(2).enumerate() {
            assert_eq!(pair[0].event_type, EventType::StageStarted, "stage {i}");
            assert_eq!(pair[1].event_type, EventType::StageFinished, "stage {i}");
            assert_eq!(pair[0].stage_role, pair[1].stage_role);
        }
        assert_eq!(events[12].event_type, EventType::RunCompleted);
        assert_eq!(events[12].payload, "OK:finalize");
    }

    #[tokio::test]
    async fn test_downstream_sees_upstream_output() {
        let h = harness(StubAgentExecutor::new());
        let run = handle("topic", vec![]);

        h.executor.execute(&run).await;

        let state = run.read().await;
        let research = state.stage(StageId::Research).unwrap();
        assert!(research.resolved_instruction.contains("OK:web_search"));
        assert!(research.resolved_instruction.contains("No documents provided."));
    }

    #[tokio::test]
    async fn test_stage_timeout_fails_run() {
        let broadcaster = Arc::new(ProgressBroadcaster::new());
        let executor = SequentialExecutor::new(
            Arc::new(StageCatalog::default()),
            Arc::new(StubAgentExecutor::new().with_delay(Duration::from_millis(200))),
            Arc::new(MockDocumentExtractor::returning("text")),
            broadcaster.clone(),
            Duration::from_millis(20),
        );
        let run = handle("topic", vec![]);

        assert_eq!(executor.execute(&run).await, RunStatus::Failed);

        let state = run.read().await;
        let web_search = state.stage(StageId::WebSearch).unwrap();
        assert_eq!(web_search.status, StageStatus::Failed);
        assert!(web_search.error.as_deref().unwrap().starts_with("timed out after"));
        assert_eq!(state.stage(StageId::Research).unwrap().status, StageStatus::Pending);
    }

    #[tokio::test]
    async fn test_extraction_failure_fails_run() {
        let executor = SequentialExecutor::new(
            Arc::new(StageCatalog::default()),
            Arc::new(StubAgentExecutor::new()),
            Arc::new(MockDocumentExtractor::failing("unreadable file")),
            Arc::new(ProgressBroadcaster::new()),
            Duration::from_secs(5),
        );
        let run = handle("topic", vec![DocumentRef::from_path("/tmp/a.pdf")]);

        assert_eq!(executor.execute(&run).await, RunStatus::Failed);
        let state = run.read().await;
        assert_eq!(
            state.final_output.as_deref(),
            Some("Pipeline failed at stage 'document_extraction': unreadable file")
        );
    }

    #[tokio::test]
    async fn test_search_results_feed_web_search_stage() {
        let search = Arc::new(MockSearchTool::returning("1. Solar\n   URL: https://e.com"));
        let h = harness(StubAgentExecutor::new());
        let executor = h.executor.with_search(search.clone());
        let run = handle("solar power", vec![]);

        executor.execute(&run).await;

        assert_eq!(search.queries().await, vec!["solar power".to_string()]);
        let state = run.read().await;
        assert!(state
            .stage(StageId::WebSearch)
            .unwrap()
            .resolved_instruction
            .contains("1. Solar"));
    }

    #[tokio::test]
    async fn test_search_failure_fails_stage() {
        let h = harness(StubAgentExecutor::new());
        let executor = h
            .executor
            .with_search(Arc::new(MockSearchTool::failing("quota exceeded")));
        let run = handle("topic", vec![]);

        assert_eq!(executor.execute(&run).await, RunStatus::Failed);
        assert!(h.agent.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_extraction_is_archived() {
        let store = Arc::new(MemoryStore::new());
        let h = harness(StubAgentExecutor::new());
        let executor = h.executor.with_archive(store.clone());
        let run = handle("topic", vec![DocumentRef::new("/tmp/a.pdf", "a.pdf")]);

        executor.execute(&run).await;

        let ids = store.list_ids().await.unwrap();
        assert_eq!(ids.len(), 1);
        let record = store.load(&ids[0]).await.unwrap().unwrap();
        assert_eq!(record["data"], "extracted text");
    }

    #[tokio::test]
    async fn test_archive_failure_does_not_fail_run() {
        let h = harness(StubAgentExecutor::new());
        let executor = h.executor.with_archive(Arc::new(MemoryStore::failing()));
        let run = handle("topic", vec![DocumentRef::from_path("/tmp/a.pdf")]);

        assert_eq!(executor.execute(&run).await, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_terminal_run_is_not_reexecuted() {
        let h = harness(StubAgentExecutor::new());
        let run = handle("topic", vec![]);

        h.executor.execute(&run).await;
        let calls = h.agent.calls().await.len();

        assert_eq!(h.executor.execute(&run).await, RunStatus::Completed);
        assert_eq!(h.agent.calls().await.len(), calls);
    }
}
