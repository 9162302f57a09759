//! Probes used by the readiness gate.

use crate::config::ReadinessConfig;
use crate::error::{ProbeError, StartupError};
use crate::proxy::{LIVENESS_PATH, X_LROK_WARMUP};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

/// Checks performed against a freshly bound proxy.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Hit the internal liveness endpoint.
    async fn check_liveness(&self, addr: SocketAddr) -> Result<(), ProbeError>;

    /// Send one request through the full forwarding path.
    async fn warm_up(&self, addr: SocketAddr) -> Result<(), ProbeError>;
}

/// Probe that talks HTTP to the proxy over loopback.
pub struct HttpProbe {
    client: reqwest::Client,
    warmup_token: String,
    probe_timeout: Duration,
    warmup_timeout: Duration,
}

impl HttpProbe {
    /// `warmup_token` is sent as the warm-up marker so the proxy skips capture.
    pub fn new(config: &ReadinessConfig, warmup_token: String) -> Result<Self, StartupError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| StartupError::Probe(e.to_string()))?;
        Ok(Self {
            client,
            warmup_token,
            probe_timeout: config.probe_timeout(),
            warmup_timeout: config.warmup_timeout(),
        })
    }

    async fn get(
        &self,
        url: String,
        timeout: Duration,
        warmup: bool,
    ) -> Result<reqwest::StatusCode, ProbeError> {
        let mut request = self.client.get(url).timeout(timeout);
        if warmup {
            request = request.header(X_LROK_WARMUP.as_str(), self.warmup_token.as_str());
        }
        match request.send().await {
            Ok(response) => Ok(response.status()),
            Err(e) if e.is_timeout() => Err(ProbeError::Timeout(timeout)),
            Err(e) => Err(ProbeError::Unreachable(e.to_string())),
        }
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn check_liveness(&self, addr: SocketAddr) -> Result<(), ProbeError> {
        let status = self
            .get(probe_url(addr, LIVENESS_PATH), self.probe_timeout, false)
            .await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }

    async fn warm_up(&self, addr: SocketAddr) -> Result<(), ProbeError> {
        let status = self
            .get(probe_url(addr, "/"), self.warmup_timeout, true)
            .await?;
        // Any answer from the target primes the pool. Gateway errors mean the
        // proxy could not reach it.
        match status.as_u16() {
            502 | 504 => Err(ProbeError::Status(status.as_u16())),
            _ => Ok(()),
        }
    }
}

/// URL for `path` on the proxy. Wildcard listen addresses are probed via
/// loopback.
pub fn probe_url(addr: SocketAddr, path: &str) -> String {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    format!("http://{}{}", SocketAddr::new(ip, addr.port()), path)
}
