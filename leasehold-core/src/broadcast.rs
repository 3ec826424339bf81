//! # Broadcast Hub
//!
//! One-to-many fan-out of values to independent subscribers.
//!
//! Every subscriber owns a channel with room for exactly one value. Publishing never waits: if a
//! subscriber has not consumed its previous value yet, the new one is dropped for that subscriber
//! only. Publications share a read lock, structural changes take the write lock.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use uuid::Uuid;

/// Buffer capacity of every subscriber channel
pub const SUBSCRIBER_CAPACITY: usize = 1;

/// Unique identifier for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiving side of a hub subscription.
///
/// Once the subscription is removed from its hub the channel is closed: buffered values can
/// still be drained, after which `recv` returns `None`.
#[derive(Debug)]
pub struct Subscription<T> {
    id: SubscriptionId,
    receiver: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next value. `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Take the buffered value, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

/// Snapshot of hub delivery counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub closed: u64,
    pub subscribers: usize,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicU64,
}

/// Generic fan-out hub
#[derive(Debug)]
pub struct BroadcastHub<T> {
    subscribers: RwLock<HashMap<SubscriptionId, mpsc::Sender<T>>>,
    counters: Counters,
}

impl<T: Clone> BroadcastHub<T> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Register a new subscriber.
    ///
    /// Subscribers whose receiving side was dropped without unsubscribing are forgotten here.
    pub fn subscribe(&self) -> Subscription<T> {
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);

        let mut subscribers = self.subscribers.write();
        prune_closed(&mut subscribers);
        subscribers.insert(id, tx);
        drop(subscribers);
        debug!("New subscription created: {}", id);

        Subscription { id, receiver: rx }
    }

    /// Remove a subscriber and close its channel. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let removed = self.subscribers.write().remove(&id);

        // Dropping the only sender closes the channel.
        if let Some(sender) = removed {
            drop(sender);
            debug!("Subscription removed: {}", id);
        }
    }

    /// Offer `value` to every subscriber without waiting on any of them
    pub fn publish(&self, value: T) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let subscribers = self.subscribers.read();
        let mut delivered = 0;
        let mut dropped = 0;
        let mut closed = 0;

        for sender in subscribers.values() {
            match sender.try_send(value.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => dropped += 1,
                Err(TrySendError::Closed(_)) => closed += 1,
            }
        }
        drop(subscribers);

        self.counters
            .delivered
            .fetch_add(delivered, Ordering::Relaxed);
        self.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
        self.counters.closed.fetch_add(closed, Ordering::Relaxed);

        debug!(
            "Published value: delivered={}, dropped={}, closed={}",
            delivered, dropped, closed
        );
    }

    /// Forget subscribers whose receiving side was dropped without unsubscribing
    pub fn cleanup_closed_subscribers(&self) {
        prune_closed(&mut self.subscribers.write());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn get_stats(&self) -> BroadcastStats {
        BroadcastStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            closed: self.counters.closed.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

fn prune_closed<T>(subscribers: &mut HashMap<SubscriptionId, mpsc::Sender<T>>) {
    let initial_count = subscribers.len();

    subscribers.retain(|_, sender| !sender.is_closed());

    let removed = initial_count - subscribers.len();
    if removed > 0 {
        debug!("Cleaned up {} closed subscriber channels", removed);
    }
}

impl<T: Clone> Default for BroadcastHub<T> {
    fn default() -> Self {
        Self::new()
    }
}
