//! Request deduplication.
//!
//! At most one request per key is in flight at any time. The check for an
//! existing request and the registration of a new one happen under a single
//! lock, so two near-simultaneous callers cannot both start a request.
//! The loader runs on its own task: callers that stop waiting (an
//! unsubscribed consumer, a cancelled timer) never cancel it, and its
//! outcome always reaches the store.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use syncache_core::{CacheKey, TransportError};
use tokio::time::Instant;
use tracing::debug;

use crate::metrics::CacheMetrics;
use crate::store::{CacheStore, FetchOutcome};

/// A started request. Awaiting it waits for the outcome; dropping it does
/// not cancel the request.
pub type SharedFetch<V> = Shared<BoxFuture<'static, FetchOutcome<V>>>;

struct InFlightRequest<V> {
    fetch: SharedFetch<V>,
    sequence: u64,
    started_at: Instant,
    joiners: usize,
}

/// Ensures a single in-flight request per key; every caller of `fetch` for
/// that key observes the outcome of that one request.
pub struct RequestDeduper<V> {
    in_flight: Arc<Mutex<HashMap<CacheKey, InFlightRequest<V>>>>,
    store: Arc<CacheStore<V>>,
    metrics: CacheMetrics,
    sequence: AtomicU64,
}

impl<V: Send + Sync + 'static> RequestDeduper<V> {
    /// Creates a deduper committing outcomes into `store`.
    pub fn new(store: Arc<CacheStore<V>>, metrics: CacheMetrics) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            store,
            metrics,
            sequence: AtomicU64::new(0),
        }
    }

    /// Fetches `key`, joining the in-flight request if there is one and
    /// otherwise starting `loader`.
    ///
    /// The request is started (or joined) before this returns. The entry
    /// moves to Fetching when the request starts; the outcome is committed
    /// to the store (Fresh or Failed) before any caller resumes.
    pub fn fetch<F, Fut>(&self, key: &CacheKey, loader: F) -> SharedFetch<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, TransportError>> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock();

        if let Some(request) = in_flight.get_mut(key) {
            request.joiners += 1;
            self.metrics.record_join();
            debug!(key = %key, joiners = request.joiners, "Joined in-flight request");
            return request.fetch.clone();
        }

        self.store.begin_fetch(key);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        debug!(key = %key, sequence, "Starting request");

        let request = loader();
        let pending = Arc::clone(&self.in_flight);
        let store = Arc::clone(&self.store);
        let metrics = self.metrics.clone();
        let task_key = key.clone();

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match AssertUnwindSafe(request).catch_unwind().await {
                Ok(result) => result.map(Arc::new),
                Err(_) => Err(TransportError::aborted("loader panicked")),
            };
            metrics.record_fetch(outcome.is_ok(), started.elapsed());

            // Commit before removal: a caller arriving in between joins
            // this request and gets the committed outcome.
            let mut in_flight = pending.lock();
            store.put(&task_key, outcome.clone());
            let joiners = in_flight.remove(&task_key).map_or(0, |r| r.joiners);
            drop(in_flight);

            debug!(
                key = %task_key,
                joiners,
                success = outcome.is_ok(),
                "Request settled"
            );
            outcome
        });

        let fetch = task
            .map(|joined| {
                joined.unwrap_or_else(|e| Err(TransportError::aborted(e.to_string())))
            })
            .boxed()
            .shared();

        in_flight.insert(
            key.clone(),
            InFlightRequest {
                fetch: fetch.clone(),
                sequence,
                started_at: Instant::now(),
                joiners: 1,
            },
        );

        fetch
    }

    /// Like `fetch`, but never joins a request that started before
    /// `watermark` was taken: such a request is awaited first and a new one
    /// is started afterwards.
    ///
    /// Used after writes, whose effects a read issued earlier may not see.
    pub async fn fetch_after<F, Fut>(&self, key: &CacheKey, watermark: u64, loader: F) -> FetchOutcome<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, TransportError>> + Send + 'static,
    {
        loop {
            let earlier = {
                let in_flight = self.in_flight.lock();
                in_flight
                    .get(key)
                    .filter(|request| request.sequence < watermark)
                    .map(|request| request.fetch.clone())
            };

            match earlier {
                Some(fetch) => {
                    debug!(key = %key, "Waiting for a request issued before the watermark");
                    let _ = fetch.await;
                },
                None => break,
            }
        }

        self.fetch(key, loader).await
    }

    /// Returns a watermark: requests started from now on compare greater
    /// or equal to it.
    pub fn watermark(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Returns true if a request for `key` is outstanding.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    /// Returns the number of outstanding requests.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Returns how many callers are waiting on the request for `key`.
    pub fn joiners(&self, key: &CacheKey) -> usize {
        self.in_flight.lock().get(key).map_or(0, |r| r.joiners)
    }

    /// Returns how long the request for `key` has been outstanding.
    pub fn pending_for(&self, key: &CacheKey) -> Option<std::time::Duration> {
        self.in_flight.lock().get(key).map(|r| r.started_at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, IntervalPolicy};
    use crate::registry::SubscriptionRegistry;
    use crate::store::EntryState;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use syncache_core::{KeyEncoder, Method, RequestParams};

    fn deduper() -> (Arc<RequestDeduper<String>>, Arc<CacheStore<String>>) {
        let registry = Arc::new(SubscriptionRegistry::new(IntervalPolicy::Min));
        let metrics = CacheMetrics::new();
        let store = Arc::new(CacheStore::new(
            &EngineConfig::default(),
            registry,
            metrics.clone(),
        ));
        (
            Arc::new(RequestDeduper::new(Arc::clone(&store), metrics)),
            store,
        )
    }

    fn key(path: &str) -> CacheKey {
        KeyEncoder::new()
            .encode(Method::Get, path, &RequestParams::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_updates_store() {
        let (deduper, store) = deduper();
        let k = key("/items");

        let value = deduper
            .fetch(&k, || async { Ok("v1".to_string()) })
            .await
            .unwrap();

        assert_eq!(value.as_str(), "v1");
        assert_eq!(store.get(&k).unwrap().state(), EntryState::Fresh);
        assert!(!deduper.is_in_flight(&k));
    }

    #[tokio::test]
    async fn test_fetch_starts_without_being_awaited() {
        let (deduper, store) = deduper();
        let k = key("/items");

        let pending = deduper.fetch(&k, || async { Ok("v1".to_string()) });
        assert!(deduper.is_in_flight(&k));
        assert_eq!(store.get(&k).unwrap().state(), EntryState::Fetching);

        // Dropping the handle does not cancel the request
        drop(pending);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!deduper.is_in_flight(&k));
        assert_eq!(store.get(&k).unwrap().state(), EntryState::Fresh);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_recorded() {
        let (deduper, store) = deduper();
        let k = key("/items");

        let err = deduper
            .fetch(&k, || async { Err(TransportError::status(500, "boom")) })
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(500));
        let entry = store.get(&k).unwrap();
        assert_eq!(entry.state(), EntryState::Failed);
        assert_eq!(entry.error(), Some(&err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_share_one_request() {
        let (deduper, _store) = deduper();
        let k = key("/items");
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..50 {
            let deduper = Arc::clone(&deduper);
            let k = k.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                deduper
                    .fetch(&k, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok("shared".to_string())
                    })
                    .await
            }));
        }

        let mut results = vec![];
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
        assert_eq!(deduper.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_joiners_and_pending_time_are_tracked() {
        let (deduper, _store) = deduper();
        let k = key("/items");
        let slow = || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok("slow".to_string())
        };

        let first = deduper.fetch(&k, slow);
        for _ in 0..3 {
            drop(deduper.fetch(&k, slow));
        }
        assert_eq!(deduper.joiners(&k), 4);

        tokio::time::advance(Duration::from_millis(40)).await;
        assert_eq!(deduper.pending_for(&k), Some(Duration::from_millis(40)));

        first.await.unwrap();
        assert_eq!(deduper.joiners(&k), 0);
        assert_eq!(deduper.pending_for(&k), None);
    }

    async fn exploding() -> Result<String, TransportError> {
        panic!("loader bug")
    }

    #[tokio::test]
    async fn test_loader_panic_becomes_aborted() {
        let (deduper, store) = deduper();
        let k = key("/items");

        let err = deduper
            .fetch(&k, exploding)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Aborted { .. }));
        assert_eq!(store.get(&k).unwrap().state(), EntryState::Failed);
        assert!(!deduper.is_in_flight(&k));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_after_skips_earlier_request() {
        let (deduper, store) = deduper();
        let k = key("/items");
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let early = {
            let deduper = Arc::clone(&deduper);
            let k = k.clone();
            tokio::spawn(async move {
                deduper
                    .fetch(&k, || async move {
                        let _ = release_rx.await;
                        Ok("before write".to_string())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(deduper.is_in_flight(&k));

        let watermark = deduper.watermark();
        let late = {
            let deduper = Arc::clone(&deduper);
            let k = k.clone();
            tokio::spawn(async move {
                deduper
                    .fetch_after(&k, watermark, || async { Ok("after write".to_string()) })
                    .await
            })
        };
        tokio::task::yield_now().await;
        let _ = release_tx.send(());

        assert_eq!(early.await.unwrap().unwrap().as_str(), "before write");
        assert_eq!(late.await.unwrap().unwrap().as_str(), "after write");
        assert_eq!(
            store.get(&k).unwrap().value().map(|v| v.as_str()),
            Some("after write")
        );
    }
}
