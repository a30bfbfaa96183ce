//! Client connection handle shared between the registry and matches
//!
//! A `Connection` does not own the socket. It owns the sending half of a
//! channel drained by the connection's own session task, so events and the
//! final close are written to the socket in the order they were queued.

use crate::types::{ClientEvent, ConnectionId};
use crate::utils::{current_timestamp, generate_connection_id};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Frames queued for a client's session task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Event(ClientEvent),
    /// Flush what was queued before, then close the socket
    Close,
}

/// An open client connection
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    created_at: DateTime<Utc>,
    tx: mpsc::UnboundedSender<Outbound>,
    /// Set once the connection has been placed into a match
    assigned: AtomicBool,
}

impl Connection {
    /// Create a new connection around the session task's outbound channel
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id: generate_connection_id(),
            created_at: current_timestamp(),
            tx,
            assigned: AtomicBool::new(false),
        }
    }

    /// Create a connection together with the receiver its session task drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Queue an event; returns false if the session task is already gone
    pub fn send(&self, event: ClientEvent) -> bool {
        self.tx.send(Outbound::Event(event)).is_ok()
    }

    /// Ask the session task to close the socket after queued events
    pub fn close(&self) -> bool {
        self.tx.send(Outbound::Close).is_ok()
    }

    /// Whether the session task has stopped draining this connection
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Claim this connection for a match. Only the first caller succeeds.
    pub fn try_assign(&self) -> bool {
        self.assigned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Return an assigned connection to the waiting pool
    pub fn release(&self) {
        self.assigned.store(false, Ordering::Release);
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned.load(Ordering::Acquire)
    }
}
