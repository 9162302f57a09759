//! Configuration types for the inspector.

mod capture;
mod listen;
mod upstream;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use capture::{
    CaptureConfig, ReadinessConfig, DEFAULT_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY,
};
pub use listen::{DashboardConfig, ListenConfig};
pub use upstream::{ConnectionPoolConfig, TargetConfig};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InspectorConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

impl InspectorConfig {
    /// Default configuration forwarding to `127.0.0.1:<port>`.
    pub fn for_target_port(port: u16) -> Self {
        let mut config = Self::default();
        config.target.port = port;
        config
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: InspectorConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.target.host.trim().is_empty() {
            anyhow::bail!("'target.host' must not be empty");
        }
        if self.target.port == 0 {
            anyhow::bail!("'target.port' must be a non-zero port");
        }
        if self.target.timeout_secs == 0 {
            anyhow::bail!("'target.timeout_secs' must be greater than zero");
        }

        for (name, value) in [
            ("listen.read_timeout_secs", self.listen.read_timeout_secs),
            ("listen.write_timeout_secs", self.listen.write_timeout_secs),
            ("listen.idle_timeout_secs", self.listen.idle_timeout_secs),
        ] {
            if value == 0 {
                anyhow::bail!("'{name}' must be greater than zero");
            }
        }

        if self.capture.subscriber_capacity == 0 {
            anyhow::bail!("'capture.subscriber_capacity' must be at least 1");
        }
        if self.readiness.health_attempts == 0 {
            anyhow::bail!("'readiness.health_attempts' must be at least 1");
        }

        Ok(())
    }
}
