//! Subscription registry.
//!
//! Each subscription owns an unbounded queue. The store pushes a snapshot
//! into the queue of every subscriber of a key while it still holds the
//! lock under which the change was committed, so each consumer sees the
//! changes of a key in commit order, without drops, and never before the
//! change is visible through `CacheStore::get`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use syncache_core::{CacheKey, ConsumerId};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::IntervalPolicy;
use crate::store::CacheEntry;

/// Identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A consumer's interest in a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub key: CacheKey,
    pub consumer: ConsumerId,
    /// Requested polling interval, if the consumer wants polling.
    pub interval: Option<Duration>,
}

/// Token returned by `subscribe`, required to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    key: CacheKey,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

/// Result of removing a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribed {
    pub key: CacheKey,
    /// Subscriptions left on the key.
    pub remaining: usize,
    /// Interval governing the key after the removal.
    pub effective_interval: Option<Duration>,
}

struct Slot<V> {
    subscription: Subscription,
    sender: mpsc::UnboundedSender<CacheEntry<V>>,
}

/// Tracks which consumers observe which keys and delivers snapshots to them.
pub struct SubscriptionRegistry<V> {
    slots: Mutex<HashMap<CacheKey, BTreeMap<SubscriptionId, Slot<V>>>>,
    next_id: AtomicU64,
    policy: IntervalPolicy,
}

impl<V> SubscriptionRegistry<V> {
    /// Creates an empty registry using `policy` to combine intervals.
    pub fn new(policy: IntervalPolicy) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            policy,
        }
    }

    /// Registers interest of `consumer` in `key`.
    ///
    /// Returns the handle needed to unsubscribe and the queue on which the
    /// subscription receives entry snapshots.
    pub fn subscribe(
        &self,
        key: &CacheKey,
        consumer: ConsumerId,
        interval: Option<Duration>,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<CacheEntry<V>>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();

        debug!(key = %key, consumer = %consumer, subscription = %id, ?interval, "Subscribed");

        let subscription = Subscription {
            id,
            key: key.clone(),
            consumer,
            interval,
        };
        self.slots
            .lock()
            .entry(key.clone())
            .or_default()
            .insert(id, Slot { subscription, sender });

        (
            SubscriptionHandle {
                id,
                key: key.clone(),
            },
            receiver,
        )
    }

    /// Removes a subscription. Returns None if it was already removed.
    ///
    /// Dropping the subscription's sender closes its queue once the
    /// snapshots already queued have been received.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> Option<Unsubscribed> {
        let mut slots = self.slots.lock();
        let per_key = slots.get_mut(&handle.key)?;
        per_key.remove(&handle.id)?;

        let remaining = per_key.len();
        let effective_interval = self.policy.pick(
            per_key
                .values()
                .filter_map(|slot| slot.subscription.interval),
        );
        if remaining == 0 {
            slots.remove(&handle.key);
        }

        debug!(key = %handle.key, subscription = %handle.id, remaining, "Unsubscribed");

        Some(Unsubscribed {
            key: handle.key.clone(),
            remaining,
            effective_interval,
        })
    }

    /// Delivers `entry` to one subscription.
    pub(crate) fn deliver(&self, handle: &SubscriptionHandle, entry: &CacheEntry<V>) {
        if let Some(slot) = self
            .slots
            .lock()
            .get(&handle.key)
            .and_then(|per_key| per_key.get(&handle.id))
        {
            let _ = slot.sender.send(entry.clone());
        }
    }

    /// Delivers `entry` to every subscriber of `key`. Returns how many
    /// subscriptions were notified.
    pub fn notify(&self, key: &CacheKey, entry: &CacheEntry<V>) -> usize {
        let slots = self.slots.lock();
        let Some(per_key) = slots.get(key) else {
            return 0;
        };

        // A closed queue belongs to a consumer that is going away; its
        // handle will unsubscribe it.
        per_key
            .values()
            .filter(|slot| slot.sender.send(entry.clone()).is_ok())
            .count()
    }

    /// Returns the number of subscriptions on `key`.
    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.slots.lock().get(key).map_or(0, BTreeMap::len)
    }

    /// Returns true if `key` has at least one subscription.
    pub fn is_subscribed(&self, key: &CacheKey) -> bool {
        self.subscriber_count(key) > 0
    }

    /// Returns the interval governing `key` under the registry's policy.
    pub fn effective_interval(&self, key: &CacheKey) -> Option<Duration> {
        let slots = self.slots.lock();
        let per_key = slots.get(key)?;
        self.policy.pick(
            per_key
                .values()
                .filter_map(|slot| slot.subscription.interval),
        )
    }

    /// Returns the subscriptions on `key`, in subscription order.
    pub fn subscriptions(&self, key: &CacheKey) -> Vec<Subscription> {
        self.slots.lock().get(key).map_or_else(Vec::new, |per_key| {
            per_key
                .values()
                .map(|slot| slot.subscription.clone())
                .collect()
        })
    }

    /// Returns every key with at least one subscription.
    pub fn subscribed_keys(&self) -> Vec<CacheKey> {
        self.slots.lock().keys().cloned().collect()
    }

    /// Returns the interval policy.
    pub fn policy(&self) -> IntervalPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use syncache_core::{KeyEncoder, Method, RequestParams};

    fn key(path: &str) -> CacheKey {
        KeyEncoder::new()
            .encode(Method::Get, path, &RequestParams::new())
            .unwrap()
    }

    #[test]
    fn test_subscribe_and_count() {
        let registry = SubscriptionRegistry::<u32>::new(IntervalPolicy::Min);
        let k = key("/items");

        let (a, _rx_a) = registry.subscribe(&k, "a".into(), None);
        let (b, _rx_b) = registry.subscribe(&k, "b".into(), None);

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.subscriber_count(&k), 2);
        assert!(registry.is_subscribed(&k));
        assert_eq!(registry.subscribed_keys(), vec![k.clone()]);

        let subs = registry.subscriptions(&k);
        assert_eq!(subs[0].consumer.as_str(), "a");
        assert_eq!(subs[1].consumer.as_str(), "b");
    }

    #[test]
    fn test_effective_interval_uses_minimum() {
        let registry = SubscriptionRegistry::<u32>::new(IntervalPolicy::Min);
        let k = key("/items");

        registry.subscribe(&k, "a".into(), Some(Duration::from_millis(1000)));
        let (fast, _rx) = registry.subscribe(&k, "b".into(), Some(Duration::from_millis(500)));
        registry.subscribe(&k, "c".into(), None);

        assert_eq!(
            registry.effective_interval(&k),
            Some(Duration::from_millis(500))
        );

        let left = registry.unsubscribe(&fast).unwrap();
        assert_eq!(left.remaining, 2);
        assert_eq!(left.effective_interval, Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_effective_interval_with_max_policy() {
        let registry = SubscriptionRegistry::<u32>::new(IntervalPolicy::Max);
        let k = key("/items");

        registry.subscribe(&k, "a".into(), Some(Duration::from_millis(1000)));
        registry.subscribe(&k, "b".into(), Some(Duration::from_millis(500)));

        assert_eq!(
            registry.effective_interval(&k),
            Some(Duration::from_millis(1000))
        );
    }

    #[test]
    fn test_unsubscribe_last_removes_key() {
        let registry = SubscriptionRegistry::<u32>::new(IntervalPolicy::Min);
        let k = key("/items");

        let (handle, _rx) = registry.subscribe(&k, "a".into(), Some(Duration::from_secs(1)));
        let left = registry.unsubscribe(&handle).unwrap();

        assert_eq!(left.remaining, 0);
        assert_eq!(left.effective_interval, None);
        assert!(!registry.is_subscribed(&k));
        assert!(registry.subscribed_keys().is_empty());

        // Second unsubscribe is a no-op
        assert!(registry.unsubscribe(&handle).is_none());
    }

    #[tokio::test]
    async fn test_notify_reaches_every_subscriber_in_order() {
        let registry = SubscriptionRegistry::<u32>::new(IntervalPolicy::Min);
        let k = key("/items");
        let other = key("/other");

        let (_a, mut rx_a) = registry.subscribe(&k, "a".into(), None);
        let (_b, mut rx_b) = registry.subscribe(&k, "b".into(), None);
        let (_c, mut rx_c) = registry.subscribe(&other, "c".into(), None);

        let mut entry = CacheEntry::new(k.clone());
        for value in 1..=3 {
            entry.begin_fetch();
            entry.resolve(Ok(Arc::new(value)));
            assert_eq!(registry.notify(&k, &entry), 2);
        }

        for rx in [&mut rx_a, &mut rx_b] {
            for expected in 1..=3 {
                let snapshot = rx.recv().await.unwrap();
                assert_eq!(snapshot.value().map(|v| **v), Some(expected));
            }
            assert!(rx.try_recv().is_err());
        }
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_queue_after_pending_snapshots() {
        let registry = SubscriptionRegistry::<u32>::new(IntervalPolicy::Min);
        let k = key("/items");

        let (handle, mut rx) = registry.subscribe(&k, "a".into(), None);
        registry.notify(&k, &CacheEntry::new(k.clone()));
        registry.unsubscribe(&handle);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_notify_skips_dropped_receivers() {
        let registry = SubscriptionRegistry::<u32>::new(IntervalPolicy::Min);
        let k = key("/items");

        let (_a, rx_a) = registry.subscribe(&k, "a".into(), None);
        let (_b, _rx_b) = registry.subscribe(&k, "b".into(), None);
        drop(rx_a);

        assert_eq!(registry.notify(&k, &CacheEntry::new(k.clone())), 1);
    }
}
