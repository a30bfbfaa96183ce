//! Match Broker - FIFO matchmaking and dedicated-server lifecycle
//!
//! The broker groups waiting WebSocket clients in arrival order, claims a
//! dedicated server for each group and tells the clients where to connect.
//! The watchdog client keeps a dedicated server's control channel to its
//! orchestration agent: readiness, heartbeats and drain handling.

pub mod claim;
pub mod config;
pub mod dedicated;
pub mod error;
pub mod matchmaking;
pub mod metrics;
pub mod service;
pub mod types;
pub mod utils;
pub mod watchdog;

// Re-export commonly used types and traits
pub use error::{BrokerError, Result};
pub use types::*;

// Re-export key components
pub use claim::{AllocationRequestor, ClaimService};
pub use matchmaking::{ConnectionRegistry, Matchmaker};
pub use watchdog::{WatchdogClient, WatchdogHandler};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
