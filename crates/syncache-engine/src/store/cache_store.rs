//! Cache store with stale-while-revalidate entries.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use moka::notification::RemovalCause;
use moka::sync::Cache;
use parking_lot::RwLock;
use syncache_core::{CacheKey, ConsumerId};
use tokio::sync::mpsc;
use tracing::debug;

use super::{CacheEntry, FetchOutcome, InvalidationResult};
use crate::config::{EngineConfig, InvalidationScope};
use crate::metrics::CacheMetrics;
use crate::registry::{SubscriptionHandle, SubscriptionRegistry, Unsubscribed};

struct Committed<V> {
    entry: CacheEntry<V>,
    changed: bool,
    live: bool,
}

/// Process-wide cache of entries, one per key.
///
/// Every change is committed under the store's write lock and, for keys
/// with subscribers, delivered to the subscription queues before the lock
/// is released.
pub struct CacheStore<V> {
    live: RwLock<HashMap<CacheKey, CacheEntry<V>>>,
    retired: Cache<CacheKey, CacheEntry<V>>,
    registry: Arc<SubscriptionRegistry<V>>,
    metrics: CacheMetrics,
}

impl<V: Send + Sync + 'static> CacheStore<V> {
    /// Creates an empty store delivering notifications through `registry`.
    pub fn new(
        config: &EngineConfig,
        registry: Arc<SubscriptionRegistry<V>>,
        metrics: CacheMetrics,
    ) -> Self {
        let eviction_metrics = metrics.clone();
        let retired = Cache::builder()
            .max_capacity(config.max_retained_entries)
            .time_to_idle(config.retain_unused())
            .eviction_listener(move |_key, _value, cause| {
                let reason = match cause {
                    RemovalCause::Expired => "ttl",
                    RemovalCause::Size => "capacity",
                    RemovalCause::Explicit => "revived",
                    RemovalCause::Replaced => return,
                };
                eviction_metrics.record_eviction(reason);
            })
            .build();

        Self {
            live: RwLock::new(HashMap::new()),
            retired,
            registry,
            metrics,
        }
    }

    /// Returns a snapshot of the entry for `key`, if the store knows it.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let entry = self
            .live
            .read()
            .get(key)
            .cloned()
            .or_else(|| self.retired.get(key));

        if entry.as_ref().is_some_and(|e| e.value().is_some()) {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }

        entry
    }

    /// Like `get`, without recording a hit or miss.
    pub(crate) fn peek(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        self.live
            .read()
            .get(key)
            .cloned()
            .or_else(|| self.retired.get(key))
    }

    /// Records a settled request for `key`: Fresh with the value, or Failed
    /// with the error. Creates the entry if needed.
    pub fn put(&self, key: &CacheKey, outcome: FetchOutcome<V>) {
        let committed = self.commit(key, true, |entry| {
            entry.resolve(outcome);
            true
        });

        if let Some(committed) = committed {
            debug!(
                key = %key,
                state = %committed.entry.state(),
                subscribed = committed.live,
                "Entry updated"
            );
        }
        self.update_entry_gauge();
    }

    /// Fresh -> Stale, keeping the value. Returns true if the entry changed.
    pub fn mark_stale(&self, key: &CacheKey) -> bool {
        self.commit(key, false, CacheEntry::mark_stale)
            .is_some_and(|c| c.changed)
    }

    /// Moves `key` to Fetching, creating the entry if needed.
    pub(crate) fn begin_fetch(&self, key: &CacheKey) -> bool {
        self.commit(key, true, CacheEntry::begin_fetch)
            .is_some_and(|c| c.changed)
    }

    /// Marks `keys` stale.
    ///
    /// The result lists the keys that currently have subscribers; the
    /// caller is expected to refetch those (see
    /// [`SyncClient::invalidate`](crate::SyncClient::invalidate)).
    pub fn invalidate<'a>(&self, keys: impl IntoIterator<Item = &'a CacheKey>) -> InvalidationResult {
        let mut result = InvalidationResult::default();

        for key in keys {
            let Some(committed) = self.commit(key, false, CacheEntry::mark_stale) else {
                continue;
            };
            if committed.changed {
                result.invalidated.push(key.clone());
            }
            if committed.live {
                result.subscribed.push(key.clone());
            }
        }

        result.count = result.invalidated.len();
        self.metrics.record_invalidations(result.count);
        debug!(
            count = result.count,
            subscribed = result.subscribed.len(),
            "Cache entries invalidated"
        );

        result
    }

    /// Returns the known keys a successful `operation` affects under `scope`.
    pub fn affected_keys(&self, operation: &CacheKey, scope: InvalidationScope) -> BTreeSet<CacheKey> {
        let collections = match scope {
            InvalidationScope::Path => Vec::new(),
            InvalidationScope::Collection => operation.collection_paths(),
        };

        self.keys()
            .into_iter()
            .filter(|key| key.namespace() == operation.namespace())
            .filter(|key| {
                key.path() == operation.path() || collections.iter().any(|path| *path == key.path())
            })
            .collect()
    }

    /// Registers a subscription on `key` and queues the current snapshot as
    /// its first notification.
    ///
    /// A retired entry is revived with its last value; an unknown key gets a
    /// fresh Idle entry.
    pub fn attach(
        &self,
        key: &CacheKey,
        consumer: ConsumerId,
        interval: Option<Duration>,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<CacheEntry<V>>) {
        let mut live = self.live.write();
        let entry = live
            .entry(key.clone())
            .or_insert_with(|| {
                self.retired
                    .remove(key)
                    .unwrap_or_else(|| CacheEntry::new(key.clone()))
            })
            .clone();

        let (handle, receiver) = self.registry.subscribe(key, consumer, interval);
        self.registry.deliver(&handle, &entry);
        drop(live);

        self.update_entry_gauge();
        (handle, receiver)
    }

    /// Removes a subscription. When it was the last one on its key, the
    /// entry is retired. Returns None if the subscription was already gone.
    pub fn detach(&self, handle: &SubscriptionHandle) -> Option<Unsubscribed> {
        let mut live = self.live.write();
        let left = self.registry.unsubscribe(handle)?;

        if left.remaining == 0 {
            if let Some(entry) = live.remove(&left.key) {
                debug!(key = %left.key, state = %entry.state(), "Entry retired");
                self.retired.insert(left.key.clone(), entry);
            }
        }
        drop(live);

        self.update_entry_gauge();
        Some(left)
    }

    /// Returns true if `key` has subscribers.
    pub fn is_live(&self, key: &CacheKey) -> bool {
        self.live.read().contains_key(key)
    }

    /// Returns every known key, live and retired.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.live.read().keys().cloned().collect();
        keys.extend(self.retired.iter().map(|(key, _)| (*key).clone()));
        keys
    }

    /// Returns the approximate number of entries.
    pub fn entry_count(&self) -> u64 {
        self.live.read().len() as u64 + self.retired.entry_count()
    }

    /// Returns the subscription registry notifications go through.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry<V>> {
        &self.registry
    }

    /// Returns the metrics recorder.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Runs the retained cache's pending maintenance (expirations,
    /// evictions) immediately.
    pub fn run_pending_tasks(&self) {
        self.retired.run_pending_tasks();
    }

    fn commit<F>(&self, key: &CacheKey, create: bool, change: F) -> Option<Committed<V>>
    where
        F: FnOnce(&mut CacheEntry<V>) -> bool,
    {
        let mut live = self.live.write();

        if let Some(entry) = live.get_mut(key) {
            let changed = change(entry);
            let snapshot = entry.clone();
            if changed {
                self.registry.notify(key, &snapshot);
            }
            return Some(Committed {
                entry: snapshot,
                changed,
                live: true,
            });
        }

        let mut entry = match self.retired.get(key) {
            Some(entry) => entry,
            None if create => CacheEntry::new(key.clone()),
            None => return None,
        };
        let changed = change(&mut entry);
        if changed {
            self.retired.insert(key.clone(), entry.clone());
        }

        Some(Committed {
            entry,
            changed,
            live: false,
        })
    }

    fn update_entry_gauge(&self) {
        self.metrics.update_entry_count(self.entry_count());
    }
}
