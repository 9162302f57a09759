//! Error types for the inspector.
//!
//! Startup errors are fatal to a proxy instance and are returned synchronously
//! from [`ProxyServer::start`](crate::proxy::ProxyServer::start). Forwarding
//! errors are local to one request and are turned into a gateway-style response
//! for that caller only.

use hyper::StatusCode;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Failure to bring a proxy instance up to `Ready`.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("proxy not responding after {attempts} health check attempts: {last_error}")]
    HealthCheckExhausted { attempts: u32, last_error: String },
    #[error("proxy warm-up failed: none of {attempts} requests reached the proxy ({last_error})")]
    WarmUpFailed { attempts: u32, last_error: String },
    #[error("invalid readiness transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },
    #[error("failed to build readiness probe: {0}")]
    Probe(String),
    #[error("startup aborted: {0}")]
    Aborted(String),
}

/// Outcome of a failed readiness probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("proxy unreachable: {0}")]
    Unreachable(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl ProbeError {
    /// Whether the proxy accepted the request even though the probe failed.
    pub fn reached_proxy(&self) -> bool {
        !matches!(self, ProbeError::Unreachable(_))
    }
}

/// Failure to relay a single request to the target.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to read request body: {0}")]
    RequestBody(#[source] hyper::Error),
    #[error("timed out reading request body after {0:?}")]
    RequestBodyTimeout(Duration),
    #[error("invalid upstream request: {0}")]
    InvalidRequest(#[from] hyper::http::Error),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
    #[error("upstream timed out after {0:?}")]
    UpstreamTimeout(Duration),
    #[error("failed to read upstream response body: {0}")]
    ResponseBody(#[source] hyper::Error),
}

impl ForwardError {
    /// Status code returned to the original caller.
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::RequestBody(_) => StatusCode::BAD_REQUEST,
            ForwardError::RequestBodyTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            ForwardError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::InvalidRequest(_)
            | ForwardError::Upstream(_)
            | ForwardError::ResponseBody(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::RequestBody(_) => "request_body",
            ForwardError::RequestBodyTimeout(_) => "request_timeout",
            ForwardError::InvalidRequest(_) => "invalid_request",
            ForwardError::Upstream(_) => "upstream",
            ForwardError::UpstreamTimeout(_) => "upstream_timeout",
            ForwardError::ResponseBody(_) => "response_body",
        }
    }
}
