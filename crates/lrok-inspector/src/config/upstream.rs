//! Target and connection pool configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The single local service every request is forwarded to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    #[serde(default = "default_target_host")]
    pub host: String,
    #[serde(default = "default_target_port")]
    pub port: u16,
    /// Upper bound on one upstream round trip, including the response body
    #[serde(default = "default_target_timeout")]
    pub timeout_secs: u64,
}

impl TargetConfig {
    /// `host:port` authority, with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Base URI requests are rewritten onto, e.g. `http://127.0.0.1:3000`.
    pub fn base_uri(&self) -> String {
        format!("http://{}", self.authority())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_target_host(),
            port: default_target_port(),
            timeout_secs: default_target_timeout(),
        }
    }
}

fn default_target_host() -> String {
    "127.0.0.1".to_string()
}

fn default_target_port() -> u16 {
    8080
}

fn default_target_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            idle_timeout_secs: default_pool_idle_timeout(),
            keepalive_timeout_secs: default_keepalive_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_keepalive_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5
}
