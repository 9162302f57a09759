//! Fan-out of newly captured exchanges to live observers.
//!
//! Every subscriber owns a bounded channel. Publishing never waits: a
//! subscriber whose channel is full simply misses that exchange (at-most-once,
//! may-drop delivery). Exchanges a subscriber does receive arrive in publish
//! order.

use crate::capture::Exchange;
use crate::config::DEFAULT_SUBSCRIBER_CAPACITY;
use crate::metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Subscribers skipped because their channel was full
    pub dropped: usize,
    /// Subscribers removed because their receiver was gone
    pub pruned: usize,
}

/// Subscriber registry. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<BroadcasterInner>,
}

struct BroadcasterInner {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Arc<Exchange>>>>,
}

impl BroadcasterInner {
    fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            metrics::subscriber_removed();
            debug!("Subscriber {} unregistered", id);
        }
        removed
    }
}

impl Broadcaster {
    /// Create a broadcaster whose subscribers buffer up to `capacity` exchanges.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Register a new subscriber. It receives exchanges published from now on.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner.subscribers.lock().insert(id, tx);
        metrics::subscriber_added();
        debug!("Subscriber {} registered", id);

        Subscription {
            id,
            receiver: rx,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber and close its channel. Returns false if it was
    /// already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.remove(id)
    }

    /// Offer an exchange to every subscriber without blocking.
    pub fn publish(&self, exchange: Arc<Exchange>) -> PublishReport {
        let mut report = PublishReport::default();
        {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&exchange)) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    debug!("Subscriber {} is full, dropping exchange {}", id, exchange.id);
                    report.dropped += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    report.pruned += 1;
                    false
                }
            });
        }

        metrics::record_subscriber_drops(report.dropped);
        for _ in 0..report.pruned {
            metrics::subscriber_removed();
        }
        report
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Unregister every subscriber. Their streams end once drained.
    pub fn close_all(&self) -> usize {
        let closed = {
            let mut subscribers = self.inner.subscribers.lock();
            let closed = subscribers.len();
            subscribers.clear();
            closed
        };
        for _ in 0..closed {
            metrics::subscriber_removed();
        }
        closed
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

/// Receiving side of a subscription. Dropping it unregisters the subscriber.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<Exchange>>,
    registry: Weak<BroadcasterInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next exchange. Returns `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Arc<Exchange>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Arc<Exchange>, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Arc<Exchange>>> {
        self.receiver.poll_recv(cx)
    }

    /// Explicitly unregister. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
