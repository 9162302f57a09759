//! Types for captured traffic - exchanges, identifiers and counters.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::HeaderMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identifier of a captured exchange.
///
/// Derived from the wall clock in nanoseconds, bumped past the previously
/// issued value so that ids from one generator never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(u64);

impl ExchangeId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ExchangeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ExchangeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl Serialize for ExchangeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Issues strictly increasing [`ExchangeId`]s.
#[derive(Debug, Default)]
pub struct ExchangeIdGenerator {
    last: AtomicU64,
}

impl ExchangeIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> ExchangeId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        ExchangeId(now.max(previous + 1))
    }
}

/// One completed request/response cycle.
///
/// Exchanges are shared as `Arc<Exchange>` once built and never mutated.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub id: ExchangeId,
    /// When the request arrived at the proxy
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub status: u16,
    /// From dispatch to the target until the last response byte was read
    pub duration: Duration,
    pub request_headers: BTreeMap<String, String>,
    pub response_headers: BTreeMap<String, String>,
    pub request_body: Bytes,
    pub response_body: Bytes,
    /// Full request body size, regardless of capture truncation
    pub bytes_in: u64,
    /// Full response body size, regardless of capture truncation
    pub bytes_out: u64,
    pub request_body_truncated: bool,
    pub response_body_truncated: bool,
}

/// Flatten a header map into name -> value. Later values of a repeated
/// header replace earlier ones.
pub fn capture_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut captured = BTreeMap::new();
    for (name, value) in headers.iter() {
        captured.insert(
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    captured
}

/// Cut a body down to `limit` bytes for storage. Returns the stored slice
/// and whether anything was dropped.
pub fn clip_body(body: &Bytes, limit: Option<usize>) -> (Bytes, bool) {
    match limit {
        Some(limit) if body.len() > limit => (body.slice(..limit), true),
        _ => (body.clone(), false),
    }
}

/// Cumulative traffic counters. Never decremented by eviction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub exchanges: u64,
}

impl TrafficStats {
    pub(crate) fn record(&mut self, exchange: &Exchange) {
        self.bytes_in += exchange.bytes_in;
        self.bytes_out += exchange.bytes_out;
        self.exchanges += 1;
    }
}
