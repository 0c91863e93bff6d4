//! Mock implementations for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::agent::AgentExecutor;
use crate::error::CrewError;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
};
use crate::pipeline::run::DocumentRef;
use crate::progress::{EventRecord, Observer};
use crate::tools::{DocumentExtractor, SearchTool};

/// Agent executor that answers `OK:<role>` for every stage
#[derive(Debug, Default)]
pub struct StubAgentExecutor {
    pub failing_role: Option<String>,
    pub delay: Option<Duration>,
    pub calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl StubAgentExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail whenever `role` is executed
    pub fn failing_on(mut self, role: impl Into<String>) -> Self {
        self.failing_role = Some(role.into());
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// (role, instruction) pairs in call order
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl AgentExecutor for StubAgentExecutor {
    async fn execute(
        &self,
        role: &str,
        instruction: &str,
        _expected_output: &str,
    ) -> Result<String, String> {
        self.calls
            .lock()
            .await
            .push((role.to_string(), instruction.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_role.as_deref() == Some(role) {
            return Err(format!("stub failure in {role}"));
        }
        Ok(format!("OK:{role}"))
    }
}

/// Mock LLM provider for testing
#[derive(Debug)]
pub struct MockLlmProvider {
    pub responses: Vec<String>,
    pub current_response: Arc<Mutex<usize>>,
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
    pub should_fail: bool,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            current_response: Arc::new(Mutex::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            should_fail: false,
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn available_models(&self) -> Vec<String> {
        vec!["mock-model".to_string()]
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().await.push(request);

        if self.should_fail {
            return Err(LlmError::RequestFailed("Mock LLM failure".to_string()));
        }

        let mut current = self.current_response.lock().await;
        let response_idx = *current % self.responses.len().max(1);
        *current += 1;

        let content = if self.responses.is_empty() {
            "Mock response".to_string()
        } else {
            self.responses[response_idx].clone()
        };

        Ok(CompletionResponse {
            content: Some(content),
            model: "mock-model".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: FinishReason::Stop,
            metadata: HashMap::new(),
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.should_fail {
            Err(LlmError::RequestFailed(
                "Mock health check failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Document extractor with a canned result
#[derive(Debug)]
pub struct MockDocumentExtractor {
    pub result: Result<String, String>,
    pub calls: Arc<Mutex<Vec<(Vec<DocumentRef>, Option<String>)>>>,
}

impl MockDocumentExtractor {
    pub fn returning(summary: impl Into<String>) -> Self {
        Self {
            result: Ok(summary.into()),
            calls: Arc::default(),
        }
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            result: Err(error.into()),
            calls: Arc::default(),
        }
    }

    pub async fn calls(&self) -> Vec<(Vec<DocumentRef>, Option<String>)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl DocumentExtractor for MockDocumentExtractor {
    async fn extract(
        &self,
        document_refs: &[DocumentRef],
        focus_query: Option<&str>,
    ) -> Result<String, String> {
        self.calls
            .lock()
            .await
            .push((document_refs.to_vec(), focus_query.map(str::to_string)));
        self.result.clone()
    }
}

/// Search tool with a canned result
#[derive(Debug)]
pub struct MockSearchTool {
    pub result: Result<String, String>,
    pub queries: Arc<Mutex<Vec<String>>>,
}

impl MockSearchTool {
    pub fn returning(results: impl Into<String>) -> Self {
        Self {
            result: Ok(results.into()),
            queries: Arc::default(),
        }
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            result: Err(error.into()),
            queries: Arc::default(),
        }
    }

    pub async fn queries(&self) -> Vec<String> {
        self.queries.lock().await.clone()
    }
}

#[async_trait]
impl SearchTool for MockSearchTool {
    async fn search(&self, query: &str) -> Result<String, String> {
        self.queries.lock().await.push(query.to_string());
        self.result.clone()
    }
}

/// Observer that keeps every delivered event; clones share the same log
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<StdMutex<Vec<EventRecord>>>,
    fail_after: Option<usize>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every delivery after the first `count`
    pub fn failing_after(count: usize) -> Self {
        Self {
            fail_after: Some(count),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.payload).collect()
    }
}

impl Observer for RecordingObserver {
    fn deliver(&self, event: &EventRecord) -> Result<(), CrewError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| CrewError::observer_delivery("recording lock poisoned"))?;

        if self.fail_after.is_some_and(|limit| events.len() >= limit) {
            return Err(CrewError::observer_delivery("observer closed"));
        }
        events.push(event.clone());
        Ok(())
    }
}
