//! Watchdog (lifecycle client) configuration

use anyhow::{anyhow, Result};
use std::time::Duration;

/// Default local endpoint of the orchestration agent
pub const DEFAULT_WATCHDOG_URL: &str = "ws://localhost:5555/watchdog";

/// Settings for the watchdog control channel
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// WebSocket endpoint of the local watchdog
    pub url: String,
    /// Opaque server identifier handed to the process at startup
    pub server_id: String,
    /// How long a connect attempt may take before it is reported as failed
    pub connect_timeout: Duration,
    /// Period between heartbeats
    pub heartbeat_interval: Duration,
    /// Upper bound on waiting for the heartbeat task to stop
    pub heartbeat_join_timeout: Duration,
    /// Upper bound on sending the close frame during disconnect
    pub close_timeout: Duration,
}

impl WatchdogConfig {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_WATCHDOG_URL.to_string(),
            server_id: server_id.into(),
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_join_timeout: Duration::from_secs(1),
            close_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_id.trim().is_empty() {
            return Err(anyhow!("Server ID cannot be empty"));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(anyhow!("Watchdog URL must be a ws:// or wss:// URL: {}", self.url));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("Watchdog connect timeout must be greater than 0"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(anyhow!("Heartbeat interval must be greater than 0"));
        }
        Ok(())
    }
}
