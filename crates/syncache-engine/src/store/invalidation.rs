//! Invalidation results and mutation descriptors, including glob-pattern
//! invalidation over key paths.

use std::collections::BTreeSet;

use glob::Pattern;
use syncache_core::{CacheKey, SyncError};
use tracing::debug;

use super::CacheStore;

/// Result of an invalidation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationResult {
    /// Number of entries that went Fresh -> Stale.
    pub count: usize,
    /// The keys that went Fresh -> Stale.
    pub invalidated: Vec<CacheKey>,
    /// The requested keys that have subscribers, whatever their state.
    pub subscribed: Vec<CacheKey>,
}

/// A write and the cached keys it makes outdated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationDescriptor {
    operation: CacheKey,
    affected_keys: BTreeSet<CacheKey>,
}

impl MutationDescriptor {
    pub fn new(operation: CacheKey, affected_keys: BTreeSet<CacheKey>) -> Self {
        Self {
            operation,
            affected_keys,
        }
    }

    /// Returns the write request.
    pub fn operation(&self) -> &CacheKey {
        &self.operation
    }

    /// Returns the keys to invalidate once the write succeeded.
    pub fn affected_keys(&self) -> &BTreeSet<CacheKey> {
        &self.affected_keys
    }
}

impl<V: Send + Sync + 'static> CacheStore<V> {
    /// Returns the known keys whose path matches a glob pattern.
    ///
    /// - `*`: any sequence of characters
    /// - `?`: any single character
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use syncache_engine::{CacheMetrics, CacheStore, EngineConfig, SubscriptionRegistry};
    /// # use syncache_engine::IntervalPolicy;
    /// # let registry = Arc::new(SubscriptionRegistry::<String>::new(IntervalPolicy::Min));
    /// # let store = CacheStore::new(&EngineConfig::default(), registry, CacheMetrics::new());
    /// // Every cached thing, list or detail
    /// let keys = store.keys_matching("/logical-things*").unwrap();
    /// assert!(keys.is_empty());
    /// ```
    ///
    /// # Errors
    ///
    /// `SyncError::InvalidRequestShape` if the pattern is not a valid glob.
    pub fn keys_matching(&self, pattern: &str) -> Result<Vec<CacheKey>, SyncError> {
        let glob = Pattern::new(pattern).map_err(|e| {
            debug!(pattern = %pattern, error = %e, "Invalid glob pattern");
            SyncError::invalid_shape(pattern, format!("invalid glob pattern: {}", e))
        })?;

        let mut keys: Vec<CacheKey> = self
            .keys()
            .into_iter()
            .filter(|key| glob.matches(key.path()))
            .collect();
        keys.sort();

        Ok(keys)
    }

    /// Marks stale every known key whose path matches `pattern`.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> Result<InvalidationResult, SyncError> {
        let keys = self.keys_matching(pattern)?;
        Ok(self.invalidate(&keys))
    }
}
