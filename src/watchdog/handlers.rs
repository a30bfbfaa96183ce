//! Observer interface for watchdog lifecycle events

use async_trait::async_trait;
use tracing::{info, warn};

/// Why the control channel went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called locally
    Requested,
    /// The watchdog closed the channel
    Remote { code: Option<u16>, reason: String },
    /// The transport failed underneath us
    Transport(String),
}

impl DisconnectReason {
    /// Anything other than a local disconnect
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, DisconnectReason::Requested)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "requested"),
            DisconnectReason::Remote { code, reason } => match code {
                Some(code) => write!(f, "remote close ({}): {}", code, reason),
                None => write!(f, "remote close"),
            },
            DisconnectReason::Transport(message) => write!(f, "transport error: {}", message),
        }
    }
}

/// Receives lifecycle events from a watchdog connection.
///
/// Callbacks run on the connection's receive task, one at a time and in the
/// order the events happened. `on_drain` is delivered at most once per
/// connection.
#[async_trait]
pub trait WatchdogHandler: Send + Sync {
    async fn on_connected(&self) {}

    async fn on_drain(&self) {}

    async fn on_disconnected(&self, _reason: DisconnectReason) {}
}

/// Handler that only logs
pub struct LoggingHandler;

#[async_trait]
impl WatchdogHandler for LoggingHandler {
    async fn on_connected(&self) {
        info!("Connected to watchdog");
    }

    async fn on_drain(&self) {
        warn!("Drain received from watchdog");
    }

    async fn on_disconnected(&self, reason: DisconnectReason) {
        if reason.is_unexpected() {
            warn!(reason = %reason, "Disconnected from watchdog");
        } else {
            info!("Disconnected from watchdog");
        }
    }
}
