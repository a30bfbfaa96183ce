//! Registry of currently open client connections
//!
//! Session tasks add themselves on open and remove themselves on close. The
//! matchmaker only ever reads a snapshot, so it never iterates while a
//! session task is mutating the membership.

use crate::matchmaking::connection::Connection;
use crate::types::ConnectionId;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Ordered set of open connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<Vec<Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection at the back of the arrival order
    pub async fn add(&self, connection: Arc<Connection>) {
        let mut connections = self.connections.write().await;
        debug!(
            connection_id = %connection.id(),
            registered = connections.len() + 1,
            "Connection registered"
        );
        connections.push(connection);
    }

    /// Remove a connection; removing an unknown id is a no-op
    pub async fn remove(&self, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        let before = connections.len();
        connections.retain(|connection| connection.id() != connection_id);
        let removed = connections.len() != before;

        if removed {
            debug!(
                connection_id = %connection_id,
                registered = connections.len(),
                "Connection unregistered"
            );
        }
        removed
    }

    /// Point-in-time copy of the membership in arrival order
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Connections not yet placed in a match
    pub async fn waiting(&self) -> usize {
        self.connections
            .read()
            .await
            .iter()
            .filter(|connection| !connection.is_assigned())
            .count()
    }

    pub async fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections
            .read()
            .await
            .iter()
            .any(|connection| connection.id() == connection_id)
    }
}
