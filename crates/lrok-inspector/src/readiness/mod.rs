//! Startup sequencing for a proxy instance.
//!
//! A proxy is only handed back to its caller once it is bound, answers its
//! internal liveness endpoint, and has pushed a few warm-up requests through the
//! forwarding path to prime the outbound connection pool.
//!
//! # Module Structure
//!
//! - `state` - States, events and the pure transition function
//! - `gate` - `ReadinessGate`, which drives the state machine with a probe
//! - `probe` - `ReadinessProbe` trait and the HTTP implementation

mod gate;
mod probe;
mod state;

pub use gate::ReadinessGate;
pub use probe::{probe_url, HttpProbe, ReadinessProbe};
pub use state::{FailureCause, ReadinessEvent, ReadinessLimits, ReadinessState};
