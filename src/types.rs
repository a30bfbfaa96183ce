//! Common types used throughout the broker

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for client connections
pub type ConnectionId = Uuid;

/// Unique identifier for matches
pub type MatchId = Uuid;

/// Lifecycle of a match from formation until its outcome is broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchState {
    /// Members selected, nothing requested yet
    Forming,
    /// Claim request outstanding
    Claiming,
    /// A server was claimed (terminal)
    Claimed { address: String },
    /// No server could be claimed (terminal)
    Failed { reason: String },
}

impl MatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchState::Claimed { .. } | MatchState::Failed { .. })
    }
}

impl std::fmt::Display for MatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchState::Forming => write!(f, "forming"),
            MatchState::Claiming => write!(f, "claiming"),
            MatchState::Claimed { .. } => write!(f, "claimed"),
            MatchState::Failed { .. } => write!(f, "failed"),
        }
    }
}

/// Events delivered to client connections as JSON text frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Sent once when a connection joins the pool
    OnQueued {
        connection_id: ConnectionId,
        message: String,
    },
    /// A match was formed and a server is being requested
    OnMatchFound { match_id: MatchId, message: String },
    /// A server was claimed for the match
    OnServerClaimed { match_id: MatchId, address: String },
    /// No server could be claimed for the match
    OnMatchError { match_id: MatchId, reason: String },
}

impl ClientEvent {
    /// Terminal events end a match; the connection is closed after delivery
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClientEvent::OnServerClaimed { .. } | ClientEvent::OnMatchError { .. }
        )
    }

    /// Name of the `type` discriminator on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::OnQueued { .. } => "OnQueued",
            ClientEvent::OnMatchFound { .. } => "OnMatchFound",
            ClientEvent::OnServerClaimed { .. } => "OnServerClaimed",
            ClientEvent::OnMatchError { .. } => "OnMatchError",
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::BrokerError::InternalError {
                message: format!("Failed to serialize client event: {}", e),
            }
            .into()
        })
    }
}

/// Request sent to the claim service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    /// Claim keys in priority order
    pub claim_keys: Vec<String>,
    /// Candidate regions in preference order
    pub regions: Vec<String>,
    pub session_id: String,
}

/// Successful response from the claim service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub ip: String,
    #[serde(default)]
    pub ports: HashMap<String, u16>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub server_id: Option<String>,
}

/// Outcome of a successful claim as seen by the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResult {
    /// `host:port` clients should connect to
    pub address: String,
    pub ports: HashMap<String, u16>,
}
