//! Inspecting HTTP reverse proxy.
//!
//! A [`ProxyServer`] relays every request to one local target, records each
//! completed exchange in a bounded [`CaptureStore`] and fans it out to live
//! subscribers. Startup only returns once the listener has been verified end
//! to end by the readiness gate. Consumers read captured traffic through
//! [`QuerySurface`], or over HTTP through the [`dashboard`] API.

pub mod broadcaster;
pub mod capture;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod query;
pub mod readiness;

pub use broadcaster::{Broadcaster, PublishReport, Subscription};
pub use capture::{CaptureStore, Exchange, ExchangeId, TrafficStats};
pub use config::InspectorConfig;
pub use error::{ForwardError, ProbeError, StartupError};
pub use proxy::{ForwardingEngine, ProxyHandle, ProxyServer};
pub use query::{ExchangeStream, QuerySurface};
pub use readiness::{ReadinessGate, ReadinessState};
