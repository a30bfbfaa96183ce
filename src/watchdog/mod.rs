//! Dedicated-server lifecycle client
//!
//! Keeps a WebSocket control channel to the local watchdog: announces
//! readiness, sends heartbeats, and reports drain requests.

pub mod connection;
pub mod error;
pub mod handlers;
pub mod heartbeat;
pub mod messages;

pub use connection::{WatchdogClient, WatchdogState};
pub use error::WatchdogError;
pub use handlers::{DisconnectReason, LoggingHandler, WatchdogHandler};
pub use heartbeat::{run_heartbeat, HeartbeatEmitter, HeartbeatResult};
pub use messages::{InboundMessage, OutboundMessage, DSID_HEADER};
