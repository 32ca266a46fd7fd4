//! Cache metrics recording.

use metrics::{counter, gauge, histogram};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Describes the engine's metrics.
/// Call once at startup, after installing a recorder.
pub fn register_cache_metrics() {
    metrics::describe_counter!("syncache_cache_hits_total", "Reads that found a value");
    metrics::describe_counter!("syncache_cache_misses_total", "Reads that found no value");
    metrics::describe_counter!(
        "syncache_dedup_joins_total",
        "Fetches that joined an in-flight request instead of issuing one"
    );
    metrics::describe_counter!("syncache_fetches_total", "Loader calls issued by the engine");
    metrics::describe_counter!(
        "syncache_invalidations_total",
        "Entries marked stale by invalidation"
    );
    metrics::describe_counter!(
        "syncache_evictions_total",
        "Retained entries reclaimed by the eviction policy"
    );
    metrics::describe_gauge!("syncache_cache_entries", "Current number of cache entries");
    metrics::describe_histogram!("syncache_fetch_seconds", "Loader call duration");
}

/// Metrics recorder for the engine.
/// Keeps local atomic counters alongside the `metrics` facade so callers and
/// tests can read them without a recorder installed.
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    joins: Arc<AtomicU64>,
    fetches: Arc<AtomicU64>,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a read that found a value.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!("syncache_cache_hits_total").increment(1);
    }

    /// Records a read that found nothing usable.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("syncache_cache_misses_total").increment(1);
    }

    /// Records a caller joining an in-flight request.
    pub fn record_join(&self) {
        self.joins.fetch_add(1, Ordering::Relaxed);
        counter!("syncache_dedup_joins_total").increment(1);
    }

    /// Records a settled loader call.
    pub fn record_fetch(&self, success: bool, duration: Duration) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let outcome = if success { "success" } else { "failure" };
        counter!("syncache_fetches_total", "outcome" => outcome).increment(1);
        histogram!("syncache_fetch_seconds", "outcome" => outcome).record(duration.as_secs_f64());
    }

    /// Records entries marked stale by an invalidation.
    pub fn record_invalidations(&self, count: usize) {
        counter!("syncache_invalidations_total").increment(count as u64);
    }

    /// Records an eviction.
    pub fn record_eviction(&self, reason: &'static str) {
        counter!("syncache_evictions_total", "reason" => reason).increment(1);
    }

    /// Updates the entries gauge.
    pub fn update_entry_count(&self, count: u64) {
        gauge!("syncache_cache_entries").set(count as f64);
    }

    /// Hit rate (for logging/debugging).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total == 0.0 { 0.0 } else { hits / total }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of fetches that joined an in-flight request.
    pub fn joins(&self) -> u64 {
        self.joins.load(Ordering::Relaxed)
    }

    /// Number of loader calls that settled.
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}
