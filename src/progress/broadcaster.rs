//! Replayable per-run event fan-out
//!
//! Each run has one channel holding its append-only log and its live observers behind a single
//! mutex. `record` appends then delivers while holding that mutex, and `attach` replays the log
//! then registers while holding it, so an observer sees every event exactly once and in order no
//! matter when it attaches.
//!
//! Only `open_run` and `record` create a channel. Attaching to a run whose channel is gone (never
//! opened, or removed on eviction) fails instead of waiting on an empty log.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

use super::{EventRecord, Progress};
use crate::error::{CrewError, CrewResult};
use crate::observability::metrics::metrics;
use crate::pipeline::run::RunId;

/// Registration handle returned by `attach`
pub type ObserverId = u64;

/// A live subscriber to one run's events
pub trait Observer: Send + Sync {
    /// Deliver one event; an error detaches the observer
    fn deliver(&self, event: &EventRecord) -> Result<(), CrewError>;
}

impl Observer for mpsc::UnboundedSender<EventRecord> {
    fn deliver(&self, event: &EventRecord) -> Result<(), CrewError> {
        self.send(event.clone())
            .map_err(|_| CrewError::observer_delivery("receiver dropped"))
    }
}

/// Channel-backed observer registration
pub struct Subscription {
    pub id: ObserverId,
    pub receiver: mpsc::UnboundedReceiver<EventRecord>,
}

#[derive(Default)]
struct RunChannel {
    log: Vec<EventRecord>,
    observers: Vec<(ObserverId, Box<dyn Observer>)>,
}

/// Event log and observer set for every run
#[derive(Default)]
pub struct ProgressBroadcaster {
    channels: RwLock<HashMap<RunId, Arc<Mutex<RunChannel>>>>,
    next_observer_id: AtomicU64,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    async fn channel(&self, run_id: RunId) -> Arc<Mutex<RunChannel>> {
        if let Some(channel) = self.channels.read().await.get(&run_id) {
            return channel.clone();
        }
        self.channels
            .write()
            .await
            .entry(run_id)
            .or_default()
            .clone()
    }

    async fn existing_channel(&self, run_id: RunId) -> Option<Arc<Mutex<RunChannel>>> {
        self.channels.read().await.get(&run_id).cloned()
    }

    /// Create an empty log for a run so observers can attach before its first event
    pub async fn open_run(&self, run_id: RunId) {
        self.channel(run_id).await;
    }

    /// Register `observer`, replaying the run's log to it first
    ///
    /// Fails with `RunNotFound` when the run has no open channel. If the replay itself fails the
    /// observer is never registered.
    pub async fn attach(
        &self,
        run_id: RunId,
        observer: Box<dyn Observer>,
    ) -> CrewResult<ObserverId> {
        let channel = self
            .existing_channel(run_id)
            .await
            .ok_or_else(|| CrewError::run_not_found(run_id))?;
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        let mut channel = channel.lock().await;

        for event in &channel.log {
            if let Err(e) = observer.deliver(event) {
                debug!(run_id = %run_id, observer_id = id, error = %e, "Observer dropped during replay");
                metrics().observer_dropped();
                return Ok(id);
            }
        }

        channel.observers.push((id, observer));
        metrics().observer_attached();
        debug!(run_id = %run_id, observer_id = id, replayed = channel.log.len(), "Observer attached");
        Ok(id)
    }

    /// Attach an unbounded channel and hand back its receiving end
    pub async fn subscribe(&self, run_id: RunId) -> CrewResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.attach(run_id, Box::new(sender)).await?;
        Ok(Subscription { id, receiver })
    }

    /// Remove a registration; unknown ids are ignored
    pub async fn detach(&self, run_id: RunId, observer_id: ObserverId) {
        if let Some(channel) = self.existing_channel(run_id).await {
            channel
                .lock()
                .await
                .observers
                .retain(|(id, _)| *id != observer_id);
        }
    }

    /// Snapshot of a run's log in append order
    pub async fn events(&self, run_id: RunId) -> Vec<EventRecord> {
        match self.existing_channel(run_id).await {
            Some(channel) => channel.lock().await.log.clone(),
            None => Vec::new(),
        }
    }

    pub async fn observer_count(&self, run_id: RunId) -> usize {
        match self.existing_channel(run_id).await {
            Some(channel) => channel.lock().await.observers.len(),
            None => 0,
        }
    }

    /// Drop a run's log and observers
    pub async fn remove_run(&self, run_id: RunId) {
        self.channels.write().await.remove(&run_id);
    }
}

#[async_trait]
impl Progress for ProgressBroadcaster {
    async fn record(&self, event: EventRecord) {
        let run_id = event.run_id;
        let channel = self.channel(run_id).await;
        let mut channel = channel.lock().await;

        channel.log.push(event.clone());
        channel.observers.retain(|(id, observer)| match observer.deliver(&event) {
            Ok(()) => true,
            Err(e) => {
                debug!(run_id = %run_id, observer_id = *id, error = %e, "Removing observer");
                metrics().observer_dropped();
                false
            }
        });
    }
}
