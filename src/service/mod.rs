//! Service layer for the match broker
//!
//! Application state, health checks, the HTTP/WebSocket server and the
//! per-client session task.

pub mod app;
pub mod health;
pub mod server;
pub mod socket;

pub use app::{AppState, ServiceError};
pub use health::{HealthCheck, HealthStatus, ServiceStats};
pub use server::{router, BrokerServer, BrokerServerConfig};
