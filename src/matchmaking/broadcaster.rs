//! Delivers match events to every member of a match
//!
//! Terminal events are followed by a close of every member connection.
//! Each member's events and its close travel through the same ordered
//! channel, so the close is never written ahead of the event. Removal from
//! the registry happens in the session task once the socket is closed.

use crate::matchmaking::former::Match;
use crate::types::ClientEvent;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct MatchBroadcaster {
    close_delay: Duration,
}

impl MatchBroadcaster {
    pub fn new(close_delay: Duration) -> Self {
        Self { close_delay }
    }

    /// Send `event` to all members; returns how many were still reachable
    pub async fn notify(&self, formed: &Match, event: ClientEvent) -> usize {
        let terminal = event.is_terminal();
        let kind = event.kind();

        let mut delivered = 0;
        for member in formed.members() {
            if member.send(event.clone()) {
                delivered += 1;
            } else {
                debug!(
                    match_id = %formed.id(),
                    connection_id = %member.id(),
                    event = kind,
                    "Member already gone, event dropped"
                );
            }
        }

        if delivered < formed.members().len() {
            warn!(
                match_id = %formed.id(),
                delivered,
                members = formed.members().len(),
                event = kind,
                "Event not delivered to every member"
            );
        }

        if terminal {
            if !self.close_delay.is_zero() {
                tokio::time::sleep(self.close_delay).await;
            }
            for member in formed.members() {
                member.close();
            }
            debug!(match_id = %formed.id(), "Match members closed");
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaking::connection::{Connection, Outbound};
    use crate::matchmaking::former::MatchFormer;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn members(count: usize) -> (Vec<Arc<Connection>>, Vec<UnboundedReceiver<Outbound>>) {
        (0..count)
            .map(|_| {
                let (connection, rx) = Connection::channel();
                (Arc::new(connection), rx)
            })
            .unzip()
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_event_then_close() {
        let (connections, mut receivers) = members(2);
        let mut formed = MatchFormer::new(2).form(&connections).unwrap();
        formed.begin_claim().unwrap();
        let event = formed.complete(None).unwrap();

        let broadcaster = MatchBroadcaster::new(Duration::from_millis(100));
        assert_eq!(broadcaster.notify(&formed, event.clone()).await, 2);

        for rx in receivers.iter_mut() {
            assert_eq!(rx.recv().await, Some(Outbound::Event(event.clone())));
            assert_eq!(rx.recv().await, Some(Outbound::Close));
        }
    }

    #[tokio::test]
    async fn test_informational_event_keeps_connections_open() {
        let (connections, mut receivers) = members(2);
        let formed = MatchFormer::new(2).form(&connections).unwrap();

        let broadcaster = MatchBroadcaster::new(Duration::ZERO);
        broadcaster.notify(&formed, formed.found_event()).await;

        for rx in receivers.iter_mut() {
            assert!(matches!(
                rx.recv().await,
                Some(Outbound::Event(ClientEvent::OnMatchFound { .. }))
            ));
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_dropped_member_does_not_block_others() {
        let (connections, mut receivers) = members(2);
        let formed = MatchFormer::new(2).form(&connections).unwrap();
        let gone = receivers.remove(0);
        drop(gone);

        let event = ClientEvent::OnServerClaimed {
            match_id: formed.id(),
            address: "10.0.0.5:7777".to_string(),
        };
        let broadcaster = MatchBroadcaster::new(Duration::ZERO);
        assert_eq!(broadcaster.notify(&formed, event.clone()).await, 1);
        assert_eq!(receivers[0].recv().await, Some(Outbound::Event(event)));
        assert_eq!(receivers[0].recv().await, Some(Outbound::Close));
    }
}
