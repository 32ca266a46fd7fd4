//! Periodic and one-shot revalidation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use syncache_core::CacheKey;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use super::TimerHandle;
use crate::dedup::{RequestDeduper, SharedFetch};
use crate::loader::Loader;
use crate::store::FetchOutcome;

/// Owns the polling timers of subscribed keys.
pub struct RevalidationScheduler<V> {
    timers: Mutex<HashMap<CacheKey, TimerHandle>>,
    deduper: Arc<RequestDeduper<V>>,
    loader: Arc<dyn Loader<Output = V>>,
}

impl<V: Send + Sync + 'static> RevalidationScheduler<V> {
    /// Creates a scheduler fetching through `deduper` with `loader`.
    pub fn new(deduper: Arc<RequestDeduper<V>>, loader: Arc<dyn Loader<Output = V>>) -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            deduper,
            loader,
        }
    }

    /// Polls `key` every `interval`, replacing any timer with a different
    /// period. `None` or a zero interval cancels polling.
    ///
    /// The first tick fires one period from now.
    pub fn schedule(&self, key: &CacheKey, interval: Option<Duration>) {
        let Some(period) = interval.filter(|d| !d.is_zero()) else {
            self.cancel(key);
            return;
        };

        let mut timers = self.timers.lock();
        if timers.get(key).is_some_and(|t| t.interval() == period) {
            return;
        }

        // Ticks are timed from this call, not from when the task first runs
        let start = Instant::now() + period;
        let (handle, shutdown_rx) = TimerHandle::new(period);
        tokio::spawn(poll(
            key.clone(),
            start,
            period,
            Arc::clone(&self.deduper),
            Arc::clone(&self.loader),
            shutdown_rx,
        ));

        // The replaced handle stops its timer on drop
        if timers.insert(key.clone(), handle).is_some() {
            info!(key = %key, ?period, "Polling interval changed");
        } else {
            info!(key = %key, ?period, "Polling scheduled");
        }
    }

    /// Stops polling `key`. Returns true if a timer was running.
    pub fn cancel(&self, key: &CacheKey) -> bool {
        let removed = self.timers.lock().remove(key);
        if removed.is_some() {
            info!(key = %key, "Polling cancelled");
        }
        removed.is_some()
    }

    /// Stops every timer.
    pub fn cancel_all(&self) {
        let timers: Vec<TimerHandle> = self.timers.lock().drain().map(|(_, t)| t).collect();
        debug!(count = timers.len(), "Cancelling all polling timers");
    }

    /// Revalidates `key` once, joining an in-flight request if there is one.
    ///
    /// The request starts immediately; the returned future only waits for
    /// its outcome.
    pub fn refetch(&self, key: &CacheKey) -> SharedFetch<V> {
        revalidate(&self.deduper, &self.loader, key)
    }

    /// Revalidates `key` once with a request that started no earlier than
    /// `watermark`.
    pub async fn refetch_after(&self, key: &CacheKey, watermark: u64) -> FetchOutcome<V> {
        let loader = Arc::clone(&self.loader);
        let request = key.clone();
        self.deduper
            .fetch_after(key, watermark, move || async move { loader.load(&request).await })
            .await
    }

    /// Returns true if `key` is being polled.
    pub fn is_scheduled(&self, key: &CacheKey) -> bool {
        self.timers.lock().contains_key(key)
    }

    /// Returns the polling period of `key`.
    pub fn scheduled_interval(&self, key: &CacheKey) -> Option<Duration> {
        self.timers.lock().get(key).map(TimerHandle::interval)
    }

    /// Returns the number of running timers.
    pub fn scheduled_count(&self) -> usize {
        self.timers.lock().len()
    }

    /// Returns the deduper fetches go through.
    pub fn deduper(&self) -> &Arc<RequestDeduper<V>> {
        &self.deduper
    }

    /// Returns the loader.
    pub fn loader(&self) -> &Arc<dyn Loader<Output = V>> {
        &self.loader
    }
}

fn revalidate<V: Send + Sync + 'static>(
    deduper: &RequestDeduper<V>,
    loader: &Arc<dyn Loader<Output = V>>,
    key: &CacheKey,
) -> SharedFetch<V> {
    let loader = Arc::clone(loader);
    let request = key.clone();
    deduper.fetch(key, move || async move { loader.load(&request).await })
}

/// Timer loop of one key. A failed fetch keeps the timer running.
async fn poll<V: Send + Sync + 'static>(
    key: CacheKey,
    start: Instant,
    period: Duration,
    deduper: Arc<RequestDeduper<V>>,
    loader: Arc<dyn Loader<Output = V>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                debug!(key = %key, loader = loader.name(), "Scheduled revalidation");
                // Stopping while waiting abandons the wait, not the request
                tokio::select! {
                    outcome = revalidate(&deduper, &loader, &key) => {
                        if let Err(e) = outcome {
                            warn!(key = %key, error = %e, "Scheduled revalidation failed");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    debug!(key = %key, "Polling timer stopped");
}
