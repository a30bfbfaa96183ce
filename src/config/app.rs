//! Main application configuration
//!
//! This module defines the broker configuration structures, including
//! environment variable loading, TOML file loading and validation.

use crate::error::BrokerError;
use crate::utils::split_list;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub claim: ClaimSettings,
    pub matchmaking: MatchmakingSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port serving the client WebSocket endpoint and probes
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Claim service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimSettings {
    /// Base URL of the platform (login and claim APIs)
    pub base_url: String,
    pub namespace: String,
    pub client_id: String,
    pub client_secret: String,
    /// Claim keys tried in order
    pub claim_keys: Vec<String>,
    /// Regions tried in order
    pub regions: Vec<String>,
    /// Name of the port mapping reported back to clients
    pub port_name: String,
    /// Fixed address returned instead of calling the claim service
    pub override_address: Option<String>,
    /// Timeout for a single claim request in seconds
    pub request_timeout_seconds: u64,
}

/// Matchmaking-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Number of connections grouped into one match
    pub match_size: usize,
    /// Interval between match formation passes in milliseconds
    pub match_interval_ms: u64,
    /// Delay between a terminal event and closing the member connections
    pub close_delay_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "match-broker".to_string(),
            log_level: "info".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            namespace: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            claim_keys: vec!["default".to_string()],
            regions: vec!["us-west-2".to_string(), "us-east-1".to_string()],
            port_name: "default".to_string(),
            override_address: None,
            request_timeout_seconds: 10,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            match_size: 2,
            match_interval_ms: 2000,
            close_delay_ms: 100,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file; environment variables still override it
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(port) = env::var("PORT") {
            self.service.port = port
                .parse()
                .map_err(|_| anyhow!("Invalid PORT value: {}", port))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            self.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Claim settings
        if let Ok(base_url) = env::var("AB_BASE_URL") {
            self.claim.base_url = base_url;
        }
        if let Ok(namespace) = env::var("AB_NAMESPACE") {
            self.claim.namespace = namespace;
        }
        if let Ok(client_id) = env::var("AB_CLIENT_ID") {
            self.claim.client_id = client_id;
        }
        if let Ok(client_secret) = env::var("AB_CLIENT_SECRET") {
            self.claim.client_secret = client_secret;
        }
        if let Ok(keys) = env::var("CLAIM_KEYS") {
            self.claim.claim_keys = split_list(&keys);
        }
        if let Ok(regions) = env::var("REGIONS") {
            self.claim.regions = split_list(&regions);
        }
        if let Ok(port_name) = env::var("CLAIM_PORT_NAME") {
            self.claim.port_name = port_name;
        }
        if let Ok(address) = env::var("CLAIM_OVERRIDE_ADDRESS") {
            let address = address.trim().to_string();
            self.claim.override_address = (!address.is_empty()).then_some(address);
        }
        if let Ok(timeout) = env::var("CLAIM_TIMEOUT_SECONDS") {
            self.claim.request_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid CLAIM_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Matchmaking settings
        if let Ok(size) = env::var("MATCH_SIZE") {
            self.matchmaking.match_size = size
                .parse()
                .map_err(|_| anyhow!("Invalid MATCH_SIZE value: {}", size))?;
        }
        if let Ok(interval) = env::var("MATCH_INTERVAL_MS") {
            self.matchmaking.match_interval_ms = interval
                .parse()
                .map_err(|_| anyhow!("Invalid MATCH_INTERVAL_MS value: {}", interval))?;
        }
        if let Ok(delay) = env::var("CLOSE_DELAY_MS") {
            self.matchmaking.close_delay_ms = delay
                .parse()
                .map_err(|_| anyhow!("Invalid CLOSE_DELAY_MS value: {}", delay))?;
        }

        Ok(())
    }

    /// Whether claims are answered from the fixed override address
    pub fn uses_claim_override(&self) -> bool {
        self.claim.override_address.is_some()
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get claim request timeout as Duration
    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim.request_timeout_seconds)
    }

    /// Get match formation interval as Duration
    pub fn match_interval(&self) -> Duration {
        Duration::from_millis(self.matchmaking.match_interval_ms)
    }

    /// Get the delay before closing matched connections as Duration
    pub fn close_delay(&self) -> Duration {
        Duration::from_millis(self.matchmaking.close_delay_ms)
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    BrokerError::ConfigurationError {
        message: message.into(),
    }
    .into()
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => {
            return Err(invalid(format!(
                "Invalid log level: {}",
                config.service.log_level
            )))
        }
    }

    if config.service.port == 0 {
        return Err(invalid("Port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(invalid("Shutdown timeout must be greater than 0"));
    }

    // Validate matchmaking settings
    if config.matchmaking.match_size == 0 {
        return Err(invalid("Match size must be at least 1"));
    }
    if config.matchmaking.match_interval_ms == 0 {
        return Err(invalid("Match interval must be greater than 0"));
    }

    // Validate claim settings
    if config.claim.claim_keys.is_empty() {
        return Err(invalid("At least one claim key is required"));
    }
    if config.claim.regions.is_empty() {
        return Err(invalid("At least one region is required"));
    }
    if config.claim.port_name.is_empty() {
        return Err(invalid("Claim port name cannot be empty"));
    }

    // Credentials only matter when the real claim service is used
    if !config.uses_claim_override() {
        if config.claim.request_timeout_seconds == 0 {
            return Err(invalid("Claim timeout must be greater than 0"));
        }
        for (name, value) in [
            ("AB_BASE_URL", &config.claim.base_url),
            ("AB_NAMESPACE", &config.claim.namespace),
            ("AB_CLIENT_ID", &config.claim.client_id),
            ("AB_CLIENT_SECRET", &config.claim.client_secret),
        ] {
            if value.is_empty() {
                return Err(invalid(format!(
                    "{} is required unless CLAIM_OVERRIDE_ADDRESS is set",
                    name
                )));
            }
        }
    }

    Ok(())
}
