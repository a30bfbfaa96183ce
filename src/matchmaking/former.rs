//! Match formation and the match state machine
//!
//! Grouping is strictly first-come first-served: the first N waiting
//! connections of a registry snapshot form the next match.

use crate::error::{BrokerError, Result};
use crate::matchmaking::connection::Connection;
use crate::types::{ClaimResult, ClientEvent, ConnectionId, MatchId, MatchState};
use crate::utils::{current_timestamp, generate_match_id};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// A fixed group of connections waiting on one server claim
#[derive(Debug)]
pub struct Match {
    id: MatchId,
    members: Vec<Arc<Connection>>,
    state: MatchState,
    formed_at: DateTime<Utc>,
}

impl Match {
    fn new(members: Vec<Arc<Connection>>) -> Self {
        Self {
            id: generate_match_id(),
            members,
            state: MatchState::Forming,
            formed_at: current_timestamp(),
        }
    }

    pub fn id(&self) -> MatchId {
        self.id
    }

    pub fn members(&self) -> &[Arc<Connection>] {
        &self.members
    }

    pub fn member_ids(&self) -> Vec<ConnectionId> {
        self.members.iter().map(|member| member.id()).collect()
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn formed_at(&self) -> DateTime<Utc> {
        self.formed_at
    }

    /// Session identifier sent along with the claim
    pub fn session_id(&self) -> String {
        self.id.to_string()
    }

    /// Informational event sent before the claim is requested
    pub fn found_event(&self) -> ClientEvent {
        ClientEvent::OnMatchFound {
            match_id: self.id,
            message: "Match found! Requesting server...".to_string(),
        }
    }

    /// forming -> claiming
    pub fn begin_claim(&mut self) -> Result<()> {
        if self.state != MatchState::Forming {
            return Err(self.invalid_transition("claiming"));
        }
        self.state = MatchState::Claiming;
        Ok(())
    }

    /// claiming -> claimed | failed, returning the terminal event for members
    pub fn complete(&mut self, outcome: Option<ClaimResult>) -> Result<ClientEvent> {
        if self.state != MatchState::Claiming {
            return Err(self.invalid_transition("completed"));
        }

        let event = match outcome {
            Some(result) => {
                self.state = MatchState::Claimed {
                    address: result.address.clone(),
                };
                ClientEvent::OnServerClaimed {
                    match_id: self.id,
                    address: result.address,
                }
            }
            None => {
                let reason = "No server available".to_string();
                self.state = MatchState::Failed {
                    reason: reason.clone(),
                };
                ClientEvent::OnMatchError {
                    match_id: self.id,
                    reason,
                }
            }
        };

        Ok(event)
    }

    fn invalid_transition(&self, to: &str) -> anyhow::Error {
        BrokerError::InvalidMatchTransition {
            match_id: self.id.to_string(),
            from: self.state.to_string(),
            to: to.to_string(),
        }
        .into()
    }
}

/// Selects fixed-size groups from registry snapshots
#[derive(Debug, Clone)]
pub struct MatchFormer {
    group_size: usize,
}

impl MatchFormer {
    pub fn new(group_size: usize) -> Self {
        Self {
            group_size: group_size.max(1),
        }
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// The first `group_size` unassigned connections, or None if there are not enough
    pub fn select(&self, snapshot: &[Arc<Connection>]) -> Option<Vec<Arc<Connection>>> {
        let candidates: Vec<_> = snapshot
            .iter()
            .filter(|connection| !connection.is_assigned() && !connection.is_closed())
            .take(self.group_size)
            .cloned()
            .collect();

        (candidates.len() == self.group_size).then_some(candidates)
    }

    /// Select and assign the next match from a snapshot
    pub fn form(&self, snapshot: &[Arc<Connection>]) -> Option<Match> {
        let candidates = self.select(snapshot)?;

        let mut assigned = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.try_assign() {
                assigned.push(candidate);
            } else {
                // Someone else took it between select and assign
                for member in &assigned {
                    member.release();
                }
                return None;
            }
        }

        let formed = Match::new(assigned);
        debug!(
            match_id = %formed.id(),
            members = ?formed.member_ids(),
            "Match formed"
        );
        Some(formed)
    }
}
