//! Process-wide run registry
//!
//! One shared object owns every run's state handle and the broadcaster holding its event log.
//! Transport handlers and the executor get it passed in explicitly.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::observability::metrics::metrics;
use crate::pipeline::run::{PipelineRun, RunHandle, RunId, RunSummary};
use crate::progress::ProgressBroadcaster;

pub struct RunRegistry {
    runs: RwLock<HashMap<RunId, RunHandle>>,
    broadcaster: Arc<ProgressBroadcaster>,
    max_retained_runs: usize,
}

impl RunRegistry {
    pub fn new(broadcaster: Arc<ProgressBroadcaster>, max_retained_runs: usize) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            broadcaster,
            max_retained_runs,
        }
    }

    pub fn broadcaster(&self) -> Arc<ProgressBroadcaster> {
        self.broadcaster.clone()
    }

    /// Register a new run, evicting the oldest finished runs beyond the retention limit
    pub async fn insert(&self, run: PipelineRun) -> RunHandle {
        let run_id = run.run_id;
        let handle: RunHandle = Arc::new(RwLock::new(run));
        // Observers may attach as soon as the run is visible
        self.broadcaster.open_run(run_id).await;

        let evicted = {
            let mut runs = self.runs.write().await;
            runs.insert(run_id, handle.clone());
            self.evict_excess(&mut runs)
        };

        for run_id in &evicted {
            self.broadcaster.remove_run(*run_id).await;
        }
        if !evicted.is_empty() {
            metrics().runs_evicted(evicted.len());
            debug!(evicted = evicted.len(), "Evicted finished runs");
        }

        handle
    }

    /// Drop terminal runs oldest-first until the limit holds; active runs are never dropped
    fn evict_excess(&self, runs: &mut HashMap<RunId, RunHandle>) -> Vec<RunId> {
        if runs.len() <= self.max_retained_runs {
            return Vec::new();
        }

        let mut terminal = Vec::new();
        for (run_id, handle) in runs.iter() {
            // A write lock held means the executor is mid-transition
            if let Ok(state) = handle.try_read() {
                if state.is_terminal() {
                    terminal.push((state.created_at, *run_id));
                }
            }
        }
        terminal.sort();

        let excess = runs.len() - self.max_retained_runs;
        terminal
            .into_iter()
            .take(excess)
            .map(|(_, run_id)| {
                runs.remove(&run_id);
                run_id
            })
            .collect()
    }

    pub async fn get(&self, run_id: RunId) -> Option<RunHandle> {
        self.runs.read().await.get(&run_id).cloned()
    }

    /// Point-in-time copy of a run's state
    pub async fn snapshot(&self, run_id: RunId) -> Option<PipelineRun> {
        let handle = self.get(run_id).await?;
        let state = handle.read().await;
        Some(state.clone())
    }

    /// Summaries of every retained run, newest first
    pub async fn list(&self) -> Vec<RunSummary> {
        let handles: Vec<RunHandle> = self.runs.read().await.values().cloned().collect();

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.read().await.summary());
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}
