//! Traffic capture: recorded exchanges and the bounded store holding them.
//!
//! # Module Structure
//!
//! - `types` - Exchange, identifiers, header/body capture helpers, counters
//! - `store` - Capture store (FIFO ring + cumulative counters)

mod store;
mod types;

pub use store::CaptureStore;
pub use types::{
    capture_headers, clip_body, Exchange, ExchangeId, ExchangeIdGenerator, TrafficStats,
};
