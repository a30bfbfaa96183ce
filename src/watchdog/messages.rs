//! Control channel wire format
//!
//! Every message is a JSON object with a single key naming the message kind,
//! e.g. `{"heartbeat":{}}`.

use crate::watchdog::error::WatchdogError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Header carrying the server identifier on the upgrade request
pub const DSID_HEADER: &str = "ams-dsid";

/// Messages sent to the watchdog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Server finished initializing and can be claimed
    Ready { dsid: String },
    Heartbeat {},
    /// Extend the current session; the timeout is in nanoseconds
    ResetSessionTimeout {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_timeout: Option<u64>,
    },
}

impl OutboundMessage {
    /// Session timeout reset; durations beyond `u64` nanoseconds saturate
    pub fn reset_session_timeout(new_timeout: Option<Duration>) -> Self {
        OutboundMessage::ResetSessionTimeout {
            new_timeout: new_timeout
                .map(|timeout| u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Ready { .. } => "ready",
            OutboundMessage::Heartbeat {} => "heartbeat",
            OutboundMessage::ResetSessionTimeout { .. } => "reset_session_timeout",
        }
    }

    pub fn to_json(&self) -> Result<String, WatchdogError> {
        serde_json::to_string(self).map_err(|e| WatchdogError::Send {
            kind: self.kind(),
            message: e.to_string(),
        })
    }
}

/// Messages received from the watchdog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Stop taking sessions and shut down once idle
    Drain,
    /// A kind this client does not handle; carries the top-level keys
    Unrecognized(Vec<String>),
}

impl InboundMessage {
    /// Parse a text frame. Unknown kinds are not an error.
    pub fn parse(text: &str) -> Result<Self, WatchdogError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| WatchdogError::ProtocolDecode {
                message: e.to_string(),
            })?;

        let Value::Object(fields) = value else {
            return Err(WatchdogError::ProtocolDecode {
                message: "expected a JSON object".to_string(),
            });
        };

        if fields.contains_key("drain") {
            Ok(InboundMessage::Drain)
        } else {
            Ok(InboundMessage::Unrecognized(fields.keys().cloned().collect()))
        }
    }
}
