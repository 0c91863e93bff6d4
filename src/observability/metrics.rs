//! Thread-safe metrics collection system
//!
//! Atomic counters for run and stage throughput plus mutex-protected per-stage timing
//! samples. A process-wide collector is reachable through [`metrics`].

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Run metrics
    runs_submitted: AtomicU64,
    runs_running: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    runs_evicted: AtomicU64,
    run_durations: Mutex<Vec<u64>>, // milliseconds

    // Per-stage statistics keyed by role
    stage_stats: Mutex<HashMap<String, StageExecutionStats>>,

    // Delivery and persistence
    observers_attached: AtomicU64,
    observers_dropped: AtomicU64,
    archive_failures: AtomicU64,

    uptime_start: AtomicU64,
    health_status: AtomicBool,
    last_health_check: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let now = current_timestamp();
        Self {
            runs_submitted: AtomicU64::new(0),
            runs_running: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_evicted: AtomicU64::new(0),
            run_durations: Mutex::new(Vec::new()),
            stage_stats: Mutex::new(HashMap::new()),
            observers_attached: AtomicU64::new(0),
            observers_dropped: AtomicU64::new(0),
            archive_failures: AtomicU64::new(0),
            uptime_start: AtomicU64::new(now),
            health_status: AtomicBool::new(true),
            last_health_check: AtomicU64::new(now),
        }
    }

    // Run metrics
    pub fn run_submitted(&self) {
        self.runs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn run_started(&self) {
        self.runs_running.fetch_add(1, Ordering::Relaxed);
    }

    pub fn run_completed(&self, duration: Duration) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        self.run_finished(duration);
    }

    pub fn run_failed(&self, duration: Duration) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        self.run_finished(duration);
    }

    pub fn runs_evicted(&self, count: usize) {
        self.runs_evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn run_finished(&self, duration: Duration) {
        // Saturate so a finish without a matching start cannot wrap the gauge
        let _ = self
            .runs_running
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
        if let Ok(mut durations) = self.run_durations.lock() {
            push_bounded(&mut durations, duration);
        }
    }

    // Stage metrics
    pub fn stage_executed(&self, role: &str, duration: Duration, success: bool) {
        if let Ok(mut stats) = self.stage_stats.lock() {
            let stage = stats
                .entry(role.to_string())
                .or_insert_with(|| StageExecutionStats::new(role));
            stage.executions += 1;
            stage.last_execution = current_timestamp();
            push_bounded(&mut stage.execution_times, duration);
            if !success {
                stage.failures += 1;
            }
        }
    }

    pub fn stage_timed_out(&self, role: &str) {
        if let Ok(mut stats) = self.stage_stats.lock() {
            stats
                .entry(role.to_string())
                .or_insert_with(|| StageExecutionStats::new(role))
                .timeouts += 1;
        }
    }

    // Observer and archive metrics
    pub fn observer_attached(&self) {
        self.observers_attached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observer_dropped(&self) {
        self.observers_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn archive_failed(&self) {
        self.archive_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Health status metrics
    pub fn update_health_status(&self, healthy: bool) {
        self.health_status.store(healthy, Ordering::Relaxed);
        self.last_health_check
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        let now = current_timestamp();
        for counter in [
            &self.runs_submitted,
            &self.runs_running,
            &self.runs_completed,
            &self.runs_failed,
            &self.runs_evicted,
            &self.observers_attached,
            &self.observers_dropped,
            &self.archive_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.uptime_start.store(now, Ordering::Relaxed);
        self.health_status.store(true, Ordering::Relaxed);
        self.last_health_check.store(now, Ordering::Relaxed);

        if let Ok(mut durations) = self.run_durations.lock() {
            durations.clear();
        }
        if let Ok(mut stats) = self.stage_stats.lock() {
            stats.clear();
        }
    }

    fn run_duration_statistics(&self) -> (f64, f64, f64) {
        match self.run_durations.lock() {
            Ok(durations) => duration_statistics(&durations),
            Err(_) => (0.0, 0.0, 0.0),
        }
    }

    fn stage_snapshots(&self) -> HashMap<String, StageExecutionStatsSnapshot> {
        match self.stage_stats.lock() {
            Ok(stats) => stats
                .iter()
                .map(|(role, stats)| (role.clone(), stats.snapshot()))
                .collect(),
            Err(_) => HashMap::new(),
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_duration_ms, p50, p95) = self.run_duration_statistics();
        let stage_stats = self.stage_snapshots();

        MetricsSnapshot {
            runs: RunMetrics {
                runs_submitted: self.runs_submitted.load(Ordering::Relaxed),
                runs_running: self.runs_running.load(Ordering::Relaxed),
                runs_completed: self.runs_completed.load(Ordering::Relaxed),
                runs_failed: self.runs_failed.load(Ordering::Relaxed),
                runs_evicted: self.runs_evicted.load(Ordering::Relaxed),
                avg_run_duration_ms: avg_duration_ms,
                run_duration_p50_ms: p50,
                run_duration_p95_ms: p95,
            },
            stages: StageMetrics {
                total_executions: stage_stats.values().map(|s| s.executions).sum(),
                total_failures: stage_stats.values().map(|s| s.failures).sum(),
                total_timeouts: stage_stats.values().map(|s| s.timeouts).sum(),
                stage_stats,
            },
            delivery: DeliveryMetrics {
                observers_attached: self.observers_attached.load(Ordering::Relaxed),
                observers_dropped: self.observers_dropped.load(Ordering::Relaxed),
                archive_failures: self.archive_failures.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            healthy: self.health_status.load(Ordering::Relaxed),
            last_health_check: self.last_health_check.load(Ordering::Relaxed),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Internal stage statistics (with timing data)
#[derive(Debug)]
struct StageExecutionStats {
    role: String,
    executions: u64,
    failures: u64,
    timeouts: u64,
    execution_times: Vec<u64>, // milliseconds
    last_execution: u64,
}

impl StageExecutionStats {
    fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            executions: 0,
            failures: 0,
            timeouts: 0,
            execution_times: Vec::new(),
            last_execution: 0,
        }
    }

    fn snapshot(&self) -> StageExecutionStatsSnapshot {
        let (avg, p50, p95) = duration_statistics(&self.execution_times);
        let success_rate = if self.executions == 0 {
            0.0
        } else {
            (self.executions - self.failures) as f64 / self.executions as f64
        };

        StageExecutionStatsSnapshot {
            role: self.role.clone(),
            executions: self.executions,
            failures: self.failures,
            timeouts: self.timeouts,
            avg_execution_time_ms: avg,
            execution_time_p50_ms: p50,
            execution_time_p95_ms: p95,
            last_execution: self.last_execution,
            success_rate,
        }
    }
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub runs: RunMetrics,
    pub stages: StageMetrics,
    pub delivery: DeliveryMetrics,
    pub uptime_seconds: u64,
    pub healthy: bool,
    pub last_health_check: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct RunMetrics {
    pub runs_submitted: u64,
    pub runs_running: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub runs_evicted: u64,
    pub avg_run_duration_ms: f64,
    pub run_duration_p50_ms: f64,
    pub run_duration_p95_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct StageMetrics {
    pub stage_stats: HashMap<String, StageExecutionStatsSnapshot>,
    pub total_executions: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
}

#[derive(Debug, Serialize)]
pub struct StageExecutionStatsSnapshot {
    pub role: String,
    pub executions: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub avg_execution_time_ms: f64,
    pub execution_time_p50_ms: f64,
    pub execution_time_p95_ms: f64,
    pub last_execution: u64,
    pub success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct DeliveryMetrics {
    pub observers_attached: u64,
    pub observers_dropped: u64,
    pub archive_failures: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn push_bounded(samples: &mut Vec<u64>, duration: Duration) {
    samples.push(duration.as_millis() as u64);
    if samples.len() > MAX_SAMPLES {
        samples.remove(0);
    }
}

/// (avg, p50, p95) in milliseconds
fn duration_statistics(samples: &[u64]) -> (f64, f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
    (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;
        lower_value + (upper_value - lower_value) * index.fract()
    }
}
