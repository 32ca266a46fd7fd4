//! Subscription and mutation handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use syncache_core::{CacheKey, ConsumerId, Method, RequestParams, Result, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::SyncClient;
use crate::dedup::SharedFetch;
use crate::mutation::MutationOutcome;
use crate::registry::{SubscriptionHandle, SubscriptionId};
use crate::store::{CacheEntry, EntryState};

/// Options of a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceOptions {
    /// Polling interval; `None` disables polling for this consumer.
    pub poll_interval: Option<Duration>,
    /// Consumer name used in logs; generated when absent.
    pub consumer: Option<ConsumerId>,
}

impl ResourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Polls every `interval` while subscribed.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Polls every `millis` milliseconds while subscribed.
    pub fn poll_interval_ms(self, millis: u64) -> Self {
        self.poll_interval(Duration::from_millis(millis))
    }

    pub fn consumer(mut self, consumer: impl Into<ConsumerId>) -> Self {
        self.consumer = Some(consumer.into());
        self
    }
}

/// What a consumer renders.
#[derive(Debug)]
pub struct ResourceState<V> {
    /// Last successfully fetched value, kept while Stale, Fetching or Failed.
    pub data: Option<Arc<V>>,
    /// Error of the last request, if it failed.
    pub error: Option<TransportError>,
    /// No data yet and a request is pending or about to start.
    pub is_loading: bool,
    /// A request is pending.
    pub is_validating: bool,
    pub state: EntryState,
    pub revision: u64,
}

impl<V> Clone for ResourceState<V> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            error: self.error.clone(),
            is_loading: self.is_loading,
            is_validating: self.is_validating,
            state: self.state,
            revision: self.revision,
        }
    }
}

impl<V> From<&CacheEntry<V>> for ResourceState<V> {
    fn from(entry: &CacheEntry<V>) -> Self {
        let pending = matches!(entry.state(), EntryState::Idle | EntryState::Fetching);
        Self {
            data: entry.value().cloned(),
            error: entry.error().cloned(),
            is_loading: entry.value().is_none() && pending,
            is_validating: entry.state() == EntryState::Fetching,
            state: entry.state(),
            revision: entry.revision(),
        }
    }
}

/// A live subscription to one key. Dropping it unsubscribes.
pub struct ResourceHandle<V: Send + Sync + 'static> {
    client: SyncClient<V>,
    subscription: SubscriptionHandle,
    receiver: mpsc::UnboundedReceiver<CacheEntry<V>>,
    current: CacheEntry<V>,
}

impl<V: Send + Sync + 'static> ResourceHandle<V> {
    pub(crate) fn new(
        client: SyncClient<V>,
        subscription: SubscriptionHandle,
        mut receiver: mpsc::UnboundedReceiver<CacheEntry<V>>,
    ) -> Self {
        // The subscription's first snapshot is queued by `attach`
        let current = receiver
            .try_recv()
            .unwrap_or_else(|_| CacheEntry::new(subscription.key().clone()));
        Self {
            client,
            subscription,
            receiver,
            current,
        }
    }

    pub fn key(&self) -> &CacheKey {
        self.subscription.key()
    }

    pub fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }

    /// Returns the latest committed state without waiting.
    pub fn state(&mut self) -> ResourceState<V> {
        ResourceState::from(self.snapshot())
    }

    /// Returns the latest committed entry without waiting.
    pub fn snapshot(&mut self) -> &CacheEntry<V> {
        while let Ok(entry) = self.receiver.try_recv() {
            self.current = entry;
        }
        &self.current
    }

    /// Waits for the next committed change and returns it.
    ///
    /// Changes are returned one by one, in commit order; none is skipped.
    pub async fn changed(&mut self) -> Option<ResourceState<V>> {
        let entry = self.receiver.recv().await?;
        self.current = entry;
        Some(ResourceState::from(&self.current))
    }

    /// Waits until the entry settles (Fresh or Failed) and returns that
    /// state. Returns immediately if it already has.
    pub async fn settled(&mut self) -> Option<ResourceState<V>> {
        let state = self.state();
        if matches!(state.state, EntryState::Fresh | EntryState::Failed) {
            return Some(state);
        }
        loop {
            let state = self.changed().await?;
            if matches!(state.state, EntryState::Fresh | EntryState::Failed) {
                return Some(state);
            }
        }
    }

    /// Revalidates the key now.
    pub fn refetch(&self) -> SharedFetch<V> {
        self.client.refetch(self.subscription.key())
    }
}

impl<V: Send + Sync + 'static> Drop for ResourceHandle<V> {
    fn drop(&mut self) {
        self.client.release(&self.subscription);
    }
}

/// A subscription whose snapshots are dispatched to a callback.
/// Dropping it unsubscribes; snapshots already queued are still delivered.
pub struct CallbackSubscription<V: Send + Sync + 'static> {
    client: SyncClient<V>,
    subscription: SubscriptionHandle,
    dispatch: JoinHandle<()>,
}

impl<V: Send + Sync + 'static> CallbackSubscription<V> {
    pub(crate) fn new(client: SyncClient<V>, subscription: SubscriptionHandle, dispatch: JoinHandle<()>) -> Self {
        Self {
            client,
            subscription,
            dispatch,
        }
    }

    pub fn key(&self) -> &CacheKey {
        self.subscription.key()
    }

    pub fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }

    /// Returns false once the dispatch task ended.
    pub fn is_active(&self) -> bool {
        !self.dispatch.is_finished()
    }
}

impl<V: Send + Sync + 'static> Drop for CallbackSubscription<V> {
    fn drop(&mut self) {
        self.client.release(&self.subscription);
    }
}

/// Performs writes on one endpoint.
pub struct MutationHandle<V> {
    client: SyncClient<V>,
    method: Method,
    template: String,
    in_progress: AtomicUsize,
}

impl<V: Send + Sync + 'static> MutationHandle<V> {
    pub(crate) fn new(client: SyncClient<V>, method: Method, template: String) -> Self {
        Self {
            client,
            method,
            template,
            in_progress: AtomicUsize::new(0),
        }
    }

    /// Sends `payload` as the JSON body and returns the response.
    ///
    /// # Errors
    ///
    /// `MutationFailed` carrying the loader error; the cache is unchanged.
    pub async fn mutate(&self, payload: Value) -> Result<Arc<V>> {
        let params = RequestParams::new().body(payload);
        Ok(self.mutate_with(&params).await?.response)
    }

    /// Performs the write with explicit path, query and body parameters.
    pub async fn mutate_with(&self, params: &RequestParams) -> Result<MutationOutcome<V>> {
        let _pending = PendingWrite::start(&self.in_progress);
        self.client.mutate(self.method, &self.template, params).await
    }

    /// Returns true while a write issued through this handle is pending.
    pub fn is_mutating(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst) > 0
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

/// Counts one pending write until dropped, including when the caller
/// abandons the write.
struct PendingWrite<'a>(&'a AtomicUsize);

impl<'a> PendingWrite<'a> {
    fn start(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingWrite<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
