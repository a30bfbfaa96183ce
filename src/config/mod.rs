//! Configuration management for the broker and the lifecycle client
//!
//! This module handles configuration loading from environment variables and
//! TOML files, validation, and default values.

pub mod app;
pub mod watchdog;

// Re-export commonly used types
pub use app::{validate_config, AppConfig, ClaimSettings, MatchmakingSettings, ServiceSettings};
pub use watchdog::{WatchdogConfig, DEFAULT_WATCHDOG_URL};
