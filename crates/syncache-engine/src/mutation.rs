//! Mutation coordinator.
//!
//! Writes are never deduplicated and never touch the cache before they
//! succeed. A successful write invalidates the keys it affects and
//! refetches the subscribed ones before returning.

use std::sync::Arc;

use futures::future::join_all;
use syncache_core::{CacheKey, KeyEncoder, Method, RequestParams, Result, SyncError, TransportError};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::InvalidationScope;
use crate::scheduler::RevalidationScheduler;
use crate::store::{CacheStore, InvalidationResult, MutationDescriptor};

/// Outcome of a successful write.
#[derive(Debug)]
pub struct MutationOutcome<V> {
    /// The write's response.
    pub response: Arc<V>,
    /// The keys the write made outdated.
    pub descriptor: MutationDescriptor,
    /// What the invalidation changed.
    pub invalidation: InvalidationResult,
    /// Subscribed keys whose refetch failed. The failure is recorded on
    /// their entries.
    pub failed_refetches: Vec<CacheKey>,
}

/// Executes writes and keeps the cache consistent with them.
pub struct MutationCoordinator<V> {
    encoder: KeyEncoder,
    store: Arc<CacheStore<V>>,
    scheduler: Arc<RevalidationScheduler<V>>,
    scope: InvalidationScope,
}

impl<V: Send + Sync + 'static> MutationCoordinator<V> {
    pub fn new(
        encoder: KeyEncoder,
        store: Arc<CacheStore<V>>,
        scheduler: Arc<RevalidationScheduler<V>>,
        scope: InvalidationScope,
    ) -> Self {
        Self {
            encoder,
            store,
            scheduler,
            scope,
        }
    }

    /// Encodes and executes a write.
    ///
    /// # Errors
    ///
    /// `InvalidRequestShape` if the request cannot be encoded;
    /// `MutationFailed` with the loader error if the write failed, in which
    /// case the cache is unchanged.
    pub async fn mutate(
        &self,
        method: Method,
        template: &str,
        params: &RequestParams,
    ) -> Result<MutationOutcome<V>> {
        let operation = self.encoder.encode(method, template, params)?;
        self.execute(&operation).await
    }

    /// Executes an encoded write.
    ///
    /// The write and the invalidation that follows it run on their own
    /// task: a caller that stops waiting does not prevent a write the
    /// server applied from invalidating the cache.
    pub async fn execute(&self, operation: &CacheKey) -> Result<MutationOutcome<V>> {
        let write = Write {
            store: Arc::clone(&self.store),
            scheduler: Arc::clone(&self.scheduler),
            scope: self.scope,
            operation: operation.clone(),
        };

        tokio::spawn(write.run()).await.unwrap_or_else(|e| {
            Err(SyncError::mutation_failed(
                operation.method(),
                operation.path(),
                TransportError::aborted(e.to_string()),
            ))
        })
    }

    /// Returns the invalidation scope.
    pub fn scope(&self) -> InvalidationScope {
        self.scope
    }
}

struct Write<V> {
    store: Arc<CacheStore<V>>,
    scheduler: Arc<RevalidationScheduler<V>>,
    scope: InvalidationScope,
    operation: CacheKey,
}

impl<V: Send + Sync + 'static> Write<V> {
    async fn run(self) -> Result<MutationOutcome<V>> {
        let operation = &self.operation;
        let started = Instant::now();
        let response = match self.scheduler.loader().load(operation).await {
            Ok(response) => Arc::new(response),
            Err(source) => {
                warn!(operation = %operation, error = %source, "Mutation failed, cache untouched");
                return Err(SyncError::mutation_failed(
                    operation.method(),
                    operation.path(),
                    source,
                ));
            },
        };

        // Reads started before this point may predate the write
        let watermark = self.scheduler.deduper().watermark();

        let descriptor = MutationDescriptor::new(
            operation.clone(),
            self.store.affected_keys(operation, self.scope),
        );
        let invalidation = self.store.invalidate(descriptor.affected_keys());

        let outcomes = join_all(
            invalidation
                .subscribed
                .iter()
                .map(|key| self.scheduler.refetch_after(key, watermark)),
        )
        .await;

        let failed_refetches: Vec<CacheKey> = invalidation
            .subscribed
            .iter()
            .zip(outcomes)
            .filter(|(_, outcome)| outcome.is_err())
            .map(|(key, _)| key.clone())
            .collect();

        if !failed_refetches.is_empty() {
            warn!(
                operation = %operation,
                failed = failed_refetches.len(),
                "Refetch after mutation failed"
            );
        }

        info!(
            operation = %operation,
            affected = descriptor.affected_keys().len(),
            invalidated = invalidation.count,
            refetched = invalidation.subscribed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Mutation applied"
        );

        Ok(MutationOutcome {
            response,
            descriptor,
            invalidation,
            failed_refetches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, IntervalPolicy};
    use crate::dedup::RequestDeduper;
    use crate::loader::Loader;
    use crate::metrics::CacheMetrics;
    use crate::registry::SubscriptionRegistry;
    use crate::store::EntryState;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use syncache_core::TransportError;

    /// Serves reads from a counter that every successful write bumps.
    struct CounterApi {
        version: Mutex<u32>,
        reject_writes: bool,
    }

    #[async_trait]
    impl Loader for CounterApi {
        type Output = u32;

        async fn load(&self, request: &CacheKey) -> std::result::Result<u32, TransportError> {
            let mut version = self.version.lock();
            if request.method().is_write() {
                if self.reject_writes {
                    return Err(TransportError::status(422, "rejected"));
                }
                *version += 1;
            }
            Ok(*version)
        }
    }

    fn coordinator(reject_writes: bool) -> (MutationCoordinator<u32>, Arc<CacheStore<u32>>) {
        let registry = Arc::new(SubscriptionRegistry::new(IntervalPolicy::Min));
        let metrics = CacheMetrics::new();
        let store = Arc::new(CacheStore::new(
            &EngineConfig::default(),
            registry,
            metrics.clone(),
        ));
        let deduper = Arc::new(RequestDeduper::new(Arc::clone(&store), metrics));
        let loader = Arc::new(CounterApi {
            version: Mutex::new(0),
            reject_writes,
        });
        let scheduler = Arc::new(RevalidationScheduler::new(deduper, loader));
        (
            MutationCoordinator::new(
                KeyEncoder::new(),
                Arc::clone(&store),
                scheduler,
                InvalidationScope::Path,
            ),
            store,
        )
    }

    fn key(method: Method, path: &str) -> CacheKey {
        KeyEncoder::new()
            .encode(method, path, &RequestParams::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_cache_untouched() {
        let (coordinator, store) = coordinator(true);
        let list = key(Method::Get, "/items");
        let (_handle, _rx) = store.attach(&list, "view".into(), None);
        store.put(&list, Ok(Arc::new(0)));
        let before = store.get(&list).unwrap();

        let err = coordinator
            .mutate(Method::Post, "/items", &RequestParams::new())
            .await
            .unwrap_err();

        assert!(err.is_mutation_failed());
        assert_eq!(err.transport().and_then(|e| e.status_code()), Some(422));
        let after = store.get(&list).unwrap();
        assert_eq!(after.state(), EntryState::Fresh);
        assert_eq!(after.revision(), before.revision());
        assert_eq!(after.value().map(|v| **v), Some(0));
    }

    #[tokio::test]
    async fn test_successful_mutation_refetches_subscribed_keys() {
        let (coordinator, store) = coordinator(false);
        let list = key(Method::Get, "/items");
        let detail = key(Method::Get, "/items/1");
        let (_handle, mut rx) = store.attach(&list, "view".into(), None);
        store.put(&list, Ok(Arc::new(0)));
        store.put(&detail, Ok(Arc::new(0)));

        let outcome = coordinator
            .mutate(Method::Post, "/items", &RequestParams::new())
            .await
            .unwrap();

        assert_eq!(*outcome.response, 1);
        assert!(outcome.descriptor.affected_keys().contains(&list));
        assert!(!outcome.descriptor.affected_keys().contains(&detail));
        assert_eq!(outcome.invalidation.subscribed, vec![list.clone()]);
        assert!(outcome.failed_refetches.is_empty());

        let entry = store.get(&list).unwrap();
        assert_eq!(entry.state(), EntryState::Fresh);
        assert_eq!(entry.value().map(|v| **v), Some(1));

        // Fresh -> Stale -> Fetching -> Fresh, as seen by the subscriber
        let mut states = vec![];
        while let Ok(snapshot) = rx.try_recv() {
            states.push(snapshot.state());
        }
        assert_eq!(
            states,
            vec![
                EntryState::Idle,
                EntryState::Fresh,
                EntryState::Stale,
                EntryState::Fetching,
                EntryState::Fresh,
            ]
        );
    }

    #[tokio::test]
    async fn test_mutation_with_invalid_shape() {
        let (coordinator, _store) = coordinator(false);
        let err = coordinator
            .mutate(Method::Put, "/items/{id}", &RequestParams::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_shape());
    }
}
