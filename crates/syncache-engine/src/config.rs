//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the polling interval of a key is chosen when several subscriptions
/// ask for different intervals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalPolicy {
    /// The most eager consumer wins.
    #[default]
    Min,
    /// The least eager consumer wins.
    Max,
}

impl IntervalPolicy {
    /// Picks the governing interval out of the requested ones.
    pub fn pick(&self, intervals: impl IntoIterator<Item = Duration>) -> Option<Duration> {
        let mut intervals = intervals.into_iter();
        match self {
            IntervalPolicy::Min => intervals.min(),
            IntervalPolicy::Max => intervals.max(),
        }
    }
}

/// Which cached keys a successful mutation invalidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationScope {
    /// Keys whose resolved path equals the mutation's path.
    #[default]
    Path,
    /// `Path`, plus keys on the ancestor collection paths
    /// (a write to `/items/7` also invalidates `/items`).
    Collection,
}

/// Configuration of a [`SyncClient`](crate::SyncClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// A Fresh entry younger than this is not refetched when a new consumer
    /// subscribes (default: 2000).
    pub dedupe_window_ms: u64,
    /// How long an entry without subscribers stays reclaimable
    /// (default: 300000 = 5 minutes).
    pub retain_unused_ms: u64,
    /// Maximum number of retained entries without subscribers (default: 10000).
    pub max_retained_entries: u64,
    /// Interval selection policy (default: `min`).
    pub interval_policy: IntervalPolicy,
    /// Mutation invalidation scope (default: `path`).
    pub invalidation_scope: InvalidationScope,
    /// Namespace carried by every key (default: none).
    pub key_prefix: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedupe_window_ms: 2_000,
            retain_unused_ms: 300_000,
            max_retained_entries: 10_000,
            interval_policy: IntervalPolicy::Min,
            invalidation_scope: InvalidationScope::Path,
            key_prefix: None,
        }
    }
}

impl EngineConfig {
    /// Returns the dedupe window as a Duration.
    pub fn dedupe_window(&self) -> Duration {
        Duration::from_millis(self.dedupe_window_ms)
    }

    /// Returns the retention period as a Duration.
    pub fn retain_unused(&self) -> Duration {
        Duration::from_millis(self.retain_unused_ms)
    }
}
