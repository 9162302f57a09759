//! Bounded store of captured exchanges.

use super::types::{Exchange, ExchangeId, TrafficStats};
use crate::config::DEFAULT_CAPACITY;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// FIFO ring of the most recent exchanges plus cumulative counters.
///
/// The buffer and the counters sit behind the same lock, so an insertion and
/// its counter update are observed together. Reads take the shared side.
pub struct CaptureStore {
    capacity: usize,
    inner: RwLock<StoreInner>,
}

struct StoreInner {
    exchanges: VecDeque<Arc<Exchange>>,
    stats: TrafficStats,
}

impl CaptureStore {
    /// Create a store retaining up to `capacity` exchanges (0 means the default).
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            capacity
        };
        Self {
            capacity,
            inner: RwLock::new(StoreInner {
                exchanges: VecDeque::with_capacity(capacity),
                stats: TrafficStats::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an exchange, evicting the oldest when full. Returns the evicted
    /// exchange, if any.
    pub fn insert(&self, exchange: Arc<Exchange>) -> Option<Arc<Exchange>> {
        let mut inner = self.inner.write();
        inner.stats.record(&exchange);
        inner.exchanges.push_back(exchange);
        if inner.exchanges.len() > self.capacity {
            let evicted = inner.exchanges.pop_front();
            if let Some(ref old) = evicted {
                debug!("Evicted exchange {} from capture store", old.id);
            }
            evicted
        } else {
            None
        }
    }

    /// Copy of the retained exchanges, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<Exchange>> {
        self.inner.read().exchanges.iter().cloned().collect()
    }

    /// Look up a retained exchange. Does not affect eviction order.
    pub fn get(&self, id: ExchangeId) -> Option<Arc<Exchange>> {
        self.inner
            .read()
            .exchanges
            .iter()
            .find(|exchange| exchange.id == id)
            .cloned()
    }

    pub fn stats(&self) -> TrafficStats {
        self.inner.read().stats
    }

    /// Drop retained exchanges. Cumulative counters are kept.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.write();
        let cleared = inner.exchanges.len();
        inner.exchanges.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.inner.read().exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().exchanges.is_empty()
    }
}

impl Default for CaptureStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
