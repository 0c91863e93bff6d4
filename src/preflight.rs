//! Connectivity checks run outside the pipeline
//!
//! Used by the `preflight` command and the `/ready` endpoint. Nothing in the pipeline core calls
//! these; a failing check only reports.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::llm::provider::LlmProvider;
use crate::observability::metrics::metrics;

/// Health check result
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthCheckResult {
    pub component: String,
    pub healthy: bool,
    pub message: Option<String>,
    pub response_time_ms: Option<u64>,
}

/// Trait for components that can be health checked
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> HealthCheckResult;

    fn component_name(&self) -> &str;
}

/// Inference backend reachability (and, for Ollama, model availability)
pub struct LlmProviderHealthCheck {
    llm_provider: Arc<dyn LlmProvider>,
}

impl LlmProviderHealthCheck {
    pub fn new(llm_provider: Arc<dyn LlmProvider>) -> Self {
        Self { llm_provider }
    }
}

#[async_trait]
impl HealthCheck for LlmProviderHealthCheck {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let provider = self.llm_provider.name();

        let (healthy, message) = match self.llm_provider.health_check().await {
            Ok(()) => (true, format!("{provider} provider healthy")),
            Err(e) => {
                warn!(provider = provider, error = %e, "LLM provider health check failed");
                (false, format!("{provider} provider error: {e}"))
            }
        };

        let response_time_ms = start.elapsed().as_millis() as u64;
        debug!(provider = provider, healthy, response_time_ms, "LLM provider health check");

        HealthCheckResult {
            component: self.component_name().to_string(),
            healthy,
            message: Some(message),
            response_time_ms: Some(response_time_ms),
        }
    }

    fn component_name(&self) -> &str {
        "llm_provider"
    }
}

/// Writable directory check for uploads and the extraction archive
pub struct StorageHealthCheck {
    name: String,
    dir: PathBuf,
}

impl StorageHealthCheck {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    async fn probe(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let probe = self.dir.join(format!(".preflight-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&probe, b"ok").await?;
        tokio::fs::remove_file(&probe).await
    }
}

#[async_trait]
impl HealthCheck for StorageHealthCheck {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();

        let (healthy, message) = match self.probe().await {
            Ok(()) => (true, format!("{} writable", self.dir.display())),
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Storage health check failed");
                (false, format!("{} not writable: {e}", self.dir.display()))
            }
        };

        HealthCheckResult {
            component: self.name.clone(),
            healthy,
            message: Some(message),
            response_time_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    fn component_name(&self) -> &str {
        &self.name
    }
}

/// Aggregated health check manager
#[derive(Default)]
pub struct HealthCheckManager {
    health_checks: Vec<Box<dyn HealthCheck>>,
}

impl HealthCheckManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_health_check(&mut self, health_check: Box<dyn HealthCheck>) {
        self.health_checks.push(health_check);
    }

    pub async fn run_health_checks(&self) -> Vec<HealthCheckResult> {
        let mut results = Vec::with_capacity(self.health_checks.len());
        for health_check in &self.health_checks {
            results.push(health_check.health_check().await);
        }
        results
    }

    /// Every component must be healthy; no checks counts as healthy
    pub async fn calculate_overall_health(&self) -> (bool, Vec<HealthCheckResult>) {
        let results = self.run_health_checks().await;
        let healthy = results.iter().all(|r| r.healthy);

        metrics().update_health_status(healthy);
        debug!(
            healthy_count = results.iter().filter(|r| r.healthy).count(),
            total = results.len(),
            overall = healthy,
            "Overall health check"
        );
        (healthy, results)
    }
}
