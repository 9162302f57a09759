//! Inspecting reverse proxy.
//!
//! Every request is relayed unmodified to one local target; each completed
//! round trip is recorded in the capture store and broadcast to subscribers.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer startup, ProxyHandle and the accept loop
//! - `forwarding` - ForwardingEngine: relay + capture of one request
//! - `connection` - Write and idle timeouts for accepted connections
//! - `client` - Pooled outbound HTTP client
//! - `headers` - Reserved paths, marker headers, hop-by-hop filtering
//! - `network` - Listener creation with ephemeral-port fallback

mod client;
mod connection;
mod forwarding;
mod headers;
mod network;
mod server;

#[cfg(test)]
mod tests;

pub use forwarding::{error_response, ForwardingEngine};
pub use headers::{LIVENESS_PATH, X_LROK_WARMUP};
pub use network::bind_with_fallback;
pub use server::{ProxyHandle, ProxyServer};
