//! Watchdog client errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchdogError {
    #[error("Not connected to watchdog")]
    NotConnected,

    #[error("Ready was already sent on this connection")]
    ReadyAlreadySent,

    #[error("Watchdog connection already open")]
    AlreadyConnected,

    #[error("Timed out connecting to watchdog after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("Failed to connect to watchdog: {message}")]
    ConnectFailed { message: String },

    #[error("Failed to send {kind} message: {message}")]
    Send { kind: &'static str, message: String },

    #[error("Malformed watchdog message: {message}")]
    ProtocolDecode { message: String },

    #[error("Invalid watchdog request: {message}")]
    InvalidRequest { message: String },
}
