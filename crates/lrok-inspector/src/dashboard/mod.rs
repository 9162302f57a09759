//! Dashboard HTTP API over the query surface.
//!
//! Serves the captured history as JSON and the live feed as Server-Sent
//! Events. The HTML front end is served elsewhere.
//!
//! - `GET /api/requests` - retained exchanges, oldest first
//! - `GET /api/requests/{id}` - one exchange
//! - `DELETE /api/requests` - clear retained history
//! - `GET /api/requests/stream` - snapshot, then live exchanges (SSE)
//! - `GET /api/stats` - cumulative counters and instance labels
//! - `GET /health`, `GET /metrics`

mod router;
mod server;
mod sse;
mod types;

pub use server::{DashboardServer, DashboardState};
pub use sse::SseEvent;
pub use types::{encode_body, BodyEncoding, ExchangeView, StatsView};
