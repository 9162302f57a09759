//! Read-only access to captured traffic for presentation layers.

use crate::broadcaster::{Broadcaster, Subscription};
use crate::capture::{CaptureStore, Exchange, ExchangeId, TrafficStats};
use futures::Stream;
use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Snapshot, lookup, stats and streaming reads over one proxy's capture.
#[derive(Clone)]
pub struct QuerySurface {
    store: Arc<CaptureStore>,
    broadcaster: Broadcaster,
}

impl QuerySurface {
    pub fn new(store: Arc<CaptureStore>, broadcaster: Broadcaster) -> Self {
        Self { store, broadcaster }
    }

    /// Retained exchanges, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<Exchange>> {
        self.store.snapshot()
    }

    pub fn get(&self, id: ExchangeId) -> Option<Arc<Exchange>> {
        self.store.get(id)
    }

    pub fn stats(&self) -> TrafficStats {
        self.store.stats()
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Forget retained exchanges. Cumulative stats are unaffected.
    pub fn clear(&self) -> usize {
        self.store.clear()
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    /// The current snapshot followed by live exchanges as they are captured.
    ///
    /// The subscription is registered before the snapshot is taken, so an
    /// exchange captured in between is delivered exactly once.
    pub fn stream(&self) -> ExchangeStream {
        let subscription = self.broadcaster.subscribe();
        let backlog: VecDeque<_> = self.store.snapshot().into();
        let seen = backlog.iter().map(|exchange| exchange.id).collect();
        ExchangeStream {
            backlog,
            seen,
            subscription,
        }
    }

    pub(crate) fn close_subscriptions(&self) -> usize {
        self.broadcaster.close_all()
    }
}

/// Snapshot-then-live stream of exchanges.
///
/// Ends when the proxy shuts down. Dropping it releases the subscription.
/// Live delivery is best-effort: if the consumer falls behind the subscriber
/// capacity, some live exchanges are skipped.
pub struct ExchangeStream {
    backlog: VecDeque<Arc<Exchange>>,
    seen: HashSet<ExchangeId>,
    subscription: Subscription,
}

impl ExchangeStream {
    pub async fn next_exchange(&mut self) -> Option<Arc<Exchange>> {
        std::future::poll_fn(|cx| self.poll_exchange(cx)).await
    }

    fn poll_exchange(&mut self, cx: &mut Context<'_>) -> Poll<Option<Arc<Exchange>>> {
        if let Some(exchange) = self.backlog.pop_front() {
            return Poll::Ready(Some(exchange));
        }
        loop {
            match self.subscription.poll_recv(cx) {
                Poll::Ready(Some(exchange)) => {
                    if !self.seen.is_empty() && self.seen.remove(&exchange.id) {
                        continue;
                    }
                    return Poll::Ready(Some(exchange));
                }
                other => return other,
            }
        }
    }
}

impl Stream for ExchangeStream {
    type Item = Arc<Exchange>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_exchange(cx)
    }
}
