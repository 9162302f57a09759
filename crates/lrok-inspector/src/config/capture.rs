//! Capture and readiness configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of exchanges retained in memory.
pub const DEFAULT_CAPACITY: usize = 100;

/// Default per-subscriber channel capacity.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 10;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Ring buffer size; 0 means the default
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
    /// Truncate captured bodies beyond this size. Forwarding is never truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_body_bytes: Option<usize>,
}

impl CaptureConfig {
    pub fn effective_capacity(&self) -> usize {
        if self.capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            self.capacity
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            subscriber_capacity: default_subscriber_capacity(),
            max_body_bytes: None,
        }
    }
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_subscriber_capacity() -> usize {
    DEFAULT_SUBSCRIBER_CAPACITY
}

/// Startup sequencing: liveness probes, then warm-up requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_health_attempts")]
    pub health_attempts: u32,
    #[serde(default = "default_health_interval")]
    pub health_interval_ms: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_warmup_requests")]
    pub warmup_requests: u32,
    #[serde(default = "default_warmup_backoff")]
    pub warmup_backoff_ms: u64,
    #[serde(default = "default_warmup_timeout")]
    pub warmup_timeout_ms: u64,
}

impl ReadinessConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn warmup_backoff(&self) -> Duration {
        Duration::from_millis(self.warmup_backoff_ms)
    }

    pub fn warmup_timeout(&self) -> Duration {
        Duration::from_millis(self.warmup_timeout_ms)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            health_attempts: default_health_attempts(),
            health_interval_ms: default_health_interval(),
            probe_timeout_ms: default_probe_timeout(),
            warmup_requests: default_warmup_requests(),
            warmup_backoff_ms: default_warmup_backoff(),
            warmup_timeout_ms: default_warmup_timeout(),
        }
    }
}

fn default_health_attempts() -> u32 {
    10
}

fn default_health_interval() -> u64 {
    100
}

fn default_probe_timeout() -> u64 {
    2000
}

fn default_warmup_requests() -> u32 {
    3
}

fn default_warmup_backoff() -> u64 {
    100
}

fn default_warmup_timeout() -> u64 {
    3000
}
