//! Error types for the matchmaking broker and lifecycle client
//!
//! This module defines the crate-wide error taxonomy. Most call sites use
//! anyhow for propagation and these variants for the cases callers branch on.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific broker and lifecycle scenarios
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Authentication or watchdog connect failed; fatal to process start
    #[error("Startup failed: {message}")]
    StartupFailure { message: String },

    /// A match was asked to move through an invalid state transition
    #[error("Invalid match transition for {match_id}: {from} -> {to}")]
    InvalidMatchTransition {
        match_id: String,
        from: String,
        to: String,
    },

    #[error("Claim request failed: {message}")]
    ClaimRequestFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}
