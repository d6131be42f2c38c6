//! Aggregate counters and the health report

use crate::cache::CacheStats;
use crate::dispatcher::Strategy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine-wide counters, updated lock-free from any task
#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    failed_requests: AtomicU64,
    cancelled: AtomicU64,
    sequential_runs: AtomicU64,
    incremental_runs: AtomicU64,
    parallel_runs: AtomicU64,
    batches_fetched: AtomicU64,
    worker_retries: AtomicU64,
    bytes_fetched: AtomicU64,
    bytes_returned: AtomicU64,
    redactions: AtomicU64,
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub failed_requests: u64,
    pub cancelled: u64,
    pub sequential_runs: u64,
    pub incremental_runs: u64,
    pub parallel_runs: u64,
    pub batches_fetched: u64,
    pub worker_retries: u64,
    pub bytes_fetched: u64,
    pub bytes_returned: u64,
    pub redactions: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A request that failed at the fetch layer
    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_strategy(&self, strategy: Strategy) {
        let counter = match strategy {
            Strategy::Sequential => &self.sequential_runs,
            Strategy::Incremental => &self.incremental_runs,
            Strategy::Parallel => &self.parallel_runs,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, bytes: usize) {
        self.batches_fetched.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_fetched(&self, bytes: usize) {
        self.bytes_fetched.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_worker_retry(&self) {
        self.worker_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_returned(&self, bytes: usize) {
        self.bytes_returned.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_redactions(&self, count: usize) {
        self.redactions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            sequential_runs: self.sequential_runs.load(Ordering::Relaxed),
            incremental_runs: self.incremental_runs.load(Ordering::Relaxed),
            parallel_runs: self.parallel_runs.load(Ordering::Relaxed),
            batches_fetched: self.batches_fetched.load(Ordering::Relaxed),
            worker_retries: self.worker_retries.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            bytes_returned: self.bytes_returned.load(Ordering::Relaxed),
            redactions: self.redactions.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.requests,
            &self.failed_requests,
            &self.cancelled,
            &self.sequential_runs,
            &self.incremental_runs,
            &self.parallel_runs,
            &self.batches_fetched,
            &self.worker_retries,
            &self.bytes_fetched,
            &self.bytes_returned,
            &self.redactions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Overall engine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    /// More than half of requests failed at the fetch layer
    Degraded,
}

impl MetricsSnapshot {
    pub fn status(&self) -> HealthStatus {
        if self.requests > 0 && self.failed_requests * 2 > self.requests {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        }
    }
}

/// Cache and request statistics with a derived status
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: String,
    pub version: String,
    pub cache_hit_rate: f64,
    pub cache: CacheStats,
    pub metrics: MetricsSnapshot,
}

impl HealthReport {
    pub fn new(cache: CacheStats, metrics: MetricsSnapshot) -> Self {
        Self {
            status: metrics.status(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            cache_hit_rate: cache.hit_rate(),
            cache,
            metrics,
        }
    }
}
