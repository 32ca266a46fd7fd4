//! The sync client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use syncache_core::{CacheKey, ConsumerId, KeyEncoder, Method, RequestParams, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{CallbackSubscription, InfiniteHandle, MutationHandle, ResourceHandle, ResourceOptions};
use crate::config::EngineConfig;
use crate::dedup::{RequestDeduper, SharedFetch};
use crate::loader::Loader;
use crate::metrics::CacheMetrics;
use crate::mutation::{MutationCoordinator, MutationOutcome};
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use crate::scheduler::RevalidationScheduler;
use crate::store::{CacheEntry, CacheStore, InvalidationResult};

/// Entry point of the engine: one instance per API the application talks
/// to. Cloning is cheap and every clone shares the same cache.
///
/// # Example
///
/// ```no_run
/// # use std::time::Duration;
/// # use syncache_core::{Method, RequestParams};
/// # use syncache_engine::{ResourceOptions, SyncClient};
/// # async fn run(client: SyncClient<serde_json::Value>) -> syncache_core::Result<()> {
/// let mut things = client.use_resource(
///     Method::Post,
///     "/logical-things",
///     &RequestParams::new(),
///     ResourceOptions::new().poll_interval(Duration::from_millis(1000)),
/// )?;
///
/// while let Some(state) = things.changed().await {
///     println!("{:?}", state.data);
/// }
/// # Ok(())
/// # }
/// ```
pub struct SyncClient<V> {
    inner: Arc<ClientInner<V>>,
}

impl<V> Clone for SyncClient<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ClientInner<V> {
    config: EngineConfig,
    encoder: KeyEncoder,
    store: Arc<CacheStore<V>>,
    scheduler: Arc<RevalidationScheduler<V>>,
    mutations: MutationCoordinator<V>,
    /// Serializes subscribe/unsubscribe so that the subscriber set and the
    /// timer of a key always agree.
    membership: Mutex<()>,
    next_consumer: AtomicU64,
}

impl<V: Send + Sync + 'static> SyncClient<V> {
    /// Creates a client fetching through `loader`.
    pub fn new(loader: Arc<dyn Loader<Output = V>>, config: EngineConfig) -> Self {
        let metrics = CacheMetrics::new();
        let registry = Arc::new(SubscriptionRegistry::new(config.interval_policy));
        let store = Arc::new(CacheStore::new(&config, registry, metrics.clone()));
        let deduper = Arc::new(RequestDeduper::new(Arc::clone(&store), metrics));
        let scheduler = Arc::new(RevalidationScheduler::new(deduper, Arc::clone(&loader)));

        let encoder = match &config.key_prefix {
            Some(prefix) => KeyEncoder::with_namespace(prefix.clone()),
            None => KeyEncoder::new(),
        };
        let mutations = MutationCoordinator::new(
            encoder.clone(),
            Arc::clone(&store),
            Arc::clone(&scheduler),
            config.invalidation_scope,
        );

        info!(
            loader = loader.name(),
            namespace = ?config.key_prefix,
            policy = ?config.interval_policy,
            scope = ?config.invalidation_scope,
            "Sync client created"
        );

        Self {
            inner: Arc::new(ClientInner {
                config,
                encoder,
                store,
                scheduler,
                mutations,
                membership: Mutex::new(()),
                next_consumer: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a client owning `loader`.
    pub fn with_loader<L>(loader: L, config: EngineConfig) -> Self
    where
        L: Loader<Output = V>,
    {
        Self::new(Arc::new(loader), config)
    }

    /// Encodes a request into a key of this client's namespace.
    pub fn key(&self, method: Method, template: &str, params: &RequestParams) -> Result<CacheKey> {
        self.inner.encoder.encode(method, template, params)
    }

    /// Subscribes to a resource for the lifetime of the returned handle.
    ///
    /// # Errors
    ///
    /// `InvalidRequestShape` if the request cannot be encoded.
    pub fn use_resource(
        &self,
        method: Method,
        template: &str,
        params: &RequestParams,
        options: ResourceOptions,
    ) -> Result<ResourceHandle<V>> {
        let key = self.key(method, template, params)?;
        Ok(self.subscribe(key, options))
    }

    /// Subscribes to an encoded key.
    pub fn subscribe(&self, key: CacheKey, options: ResourceOptions) -> ResourceHandle<V> {
        let consumer = options.consumer.unwrap_or_else(|| self.next_consumer());
        let (subscription, receiver) = self.attach(&key, consumer, options.poll_interval);
        ResourceHandle::new(self.clone(), subscription, receiver)
    }

    /// Subscribes to `key` and calls `on_change` with every committed
    /// snapshot, in commit order, until the returned subscription is dropped.
    ///
    /// The callback runs on a dedicated task.
    pub fn subscribe_with<F>(&self, key: CacheKey, options: ResourceOptions, mut on_change: F) -> CallbackSubscription<V>
    where
        F: FnMut(CacheEntry<V>) + Send + 'static,
    {
        let consumer = options.consumer.unwrap_or_else(|| self.next_consumer());
        let (subscription, mut receiver) = self.attach(&key, consumer, options.poll_interval);

        let dispatch = tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                on_change(entry);
            }
        });

        CallbackSubscription::new(self.clone(), subscription, dispatch)
    }

    /// Returns a handle performing writes on `template`.
    pub fn use_mutation(&self, method: Method, template: impl Into<String>) -> MutationHandle<V> {
        MutationHandle::new(self.clone(), method, template.into())
    }

    /// Performs a write; see [`MutationCoordinator::mutate`].
    pub async fn mutate(&self, method: Method, template: &str, params: &RequestParams) -> Result<MutationOutcome<V>> {
        self.inner.mutations.mutate(method, template, params).await
    }

    /// Subscribes to the first page of a `limit`/`offset` paginated
    /// resource.
    pub fn use_infinite(
        &self,
        method: Method,
        template: &str,
        params: &RequestParams,
        page_size: usize,
        options: ResourceOptions,
    ) -> Result<InfiniteHandle<V>> {
        InfiniteHandle::open(self.clone(), method, template, params.clone(), page_size, options)
    }

    /// Reads a resource once, through the cache's deduplication, without
    /// subscribing.
    pub async fn fetch(&self, method: Method, template: &str, params: &RequestParams) -> Result<Arc<V>> {
        let key = self.key(method, template, params)?;
        Ok(self.refetch(&key).await?)
    }

    /// Revalidates `key` now; see [`RevalidationScheduler::refetch`].
    pub fn refetch(&self, key: &CacheKey) -> SharedFetch<V> {
        self.inner.scheduler.refetch(key)
    }

    /// Marks `keys` stale and starts a refetch of the subscribed ones.
    pub fn invalidate<'a>(&self, keys: impl IntoIterator<Item = &'a CacheKey>) -> InvalidationResult {
        let result = self.inner.store.invalidate(keys);
        for key in &result.subscribed {
            drop(self.refetch(key));
        }
        result
    }

    /// Marks stale every known key whose path matches a glob pattern and
    /// starts a refetch of the subscribed ones.
    ///
    /// # Errors
    ///
    /// `InvalidRequestShape` if the pattern is not a valid glob.
    pub fn invalidate_matching(&self, pattern: &str) -> Result<InvalidationResult> {
        let keys = self.inner.store.keys_matching(pattern)?;
        Ok(self.invalidate(&keys))
    }

    /// Returns a snapshot of the entry for `key`.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        self.inner.store.get(key)
    }

    /// Stops every polling timer. Outstanding requests still complete.
    pub fn shutdown(&self) {
        self.inner.scheduler.cancel_all();
        info!("Sync client polling stopped");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<CacheStore<V>> {
        &self.inner.store
    }

    pub fn scheduler(&self) -> &Arc<RevalidationScheduler<V>> {
        &self.inner.scheduler
    }

    pub fn metrics(&self) -> &CacheMetrics {
        self.inner.store.metrics()
    }

    /// Returns the number of subscriptions on `key`.
    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.inner.store.registry().subscriber_count(key)
    }

    /// Registers a subscription, reschedules the key's timer and revalidates
    /// it unless its value is recent.
    pub(crate) fn attach(
        &self,
        key: &CacheKey,
        consumer: ConsumerId,
        interval: Option<Duration>,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<CacheEntry<V>>) {
        let inner = &self.inner;
        let attached = {
            let _membership = inner.membership.lock();
            let attached = inner.store.attach(key, consumer, interval);
            inner
                .scheduler
                .schedule(key, inner.store.registry().effective_interval(key));
            attached
        };

        let recent = inner
            .store
            .peek(key)
            .is_some_and(|entry| entry.is_fresh_within(inner.config.dedupe_window()));
        if recent {
            debug!(key = %key, "Value is recent, skipping revalidation on subscribe");
        } else {
            drop(self.refetch(key));
        }

        attached
    }

    /// Removes a subscription. The last one on a key stops its timer;
    /// otherwise the timer follows the remaining subscriptions.
    pub(crate) fn release(&self, subscription: &SubscriptionHandle) {
        let inner = &self.inner;
        let _membership = inner.membership.lock();
        let Some(detached) = inner.store.detach(subscription) else {
            return;
        };

        if detached.remaining == 0 {
            inner.scheduler.cancel(&detached.key);
        } else {
            inner
                .scheduler
                .schedule(&detached.key, detached.effective_interval);
        }
    }

    fn next_consumer(&self) -> ConsumerId {
        let n = self.inner.next_consumer.fetch_add(1, Ordering::Relaxed);
        ConsumerId::new(format!("consumer-{}", n))
    }
}
