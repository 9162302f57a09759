//! Server-Sent Events encoding for the live exchange feed.

use super::types::ExchangeView;
use crate::capture::Exchange;
use crate::query::ExchangeStream;
use bytes::Bytes;
use futures::Stream;
use hyper::body::Frame;
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::warn;

pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

const KEEP_ALIVE_COMMENT: &[u8] = b": keep-alive\n\n";

/// One SSE event.
#[derive(Debug, Default)]
pub struct SseEvent {
    id: Option<String>,
    event: Option<String>,
    data: String,
}

impl SseEvent {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = String::new();
        if let Some(ref event) = self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        if let Some(ref id) = self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        Bytes::from(out)
    }
}

fn exchange_event(exchange: &Exchange) -> Option<Bytes> {
    match serde_json::to_string(&ExchangeView::from(exchange)) {
        Ok(json) => Some(SseEvent::new(json).id(exchange.id.to_string()).to_bytes()),
        Err(e) => {
            warn!("Failed to encode exchange {}: {}", exchange.id, e);
            None
        }
    }
}

/// Turn an exchange stream into SSE body frames, interleaving keep-alive
/// comments while no exchange arrives.
pub fn event_stream(
    exchanges: ExchangeStream,
    keep_alive: Duration,
) -> impl Stream<Item = Result<Frame<Bytes>, Infallible>> + Send {
    let mut ticker = interval_at(Instant::now() + keep_alive, keep_alive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    futures::stream::unfold(
        (exchanges, ticker),
        |(mut exchanges, mut ticker)| async move {
            loop {
                let chunk = tokio::select! {
                    exchange = exchanges.next_exchange() => match exchange {
                        Some(exchange) => match exchange_event(&exchange) {
                            Some(chunk) => chunk,
                            None => continue,
                        },
                        None => return None,
                    },
                    _ = ticker.tick() => Bytes::from_static(KEEP_ALIVE_COMMENT),
                };
                return Some((Ok(Frame::data(chunk)), (exchanges, ticker)));
            }
        },
    )
}
