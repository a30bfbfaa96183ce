//! Client WebSocket session
//!
//! Runs one client from upgrade until close: registers the connection,
//! writes queued events in order, and unregisters it once the socket is
//! closed by either side.

use crate::matchmaking::{Connection, Outbound};
use crate::service::app::AppState;
use crate::types::ClientEvent;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const QUEUED_MESSAGE: &str = "Waiting for match...";

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// The broker closed it after a terminal event
    Completed,
    /// The peer went away first
    Dropped,
    /// The broker is shutting down
    Shutdown,
}

#[instrument(skip_all)]
pub async fn run_client_session(ws: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (connection, mut outbound) = Connection::channel();
    let connection = Arc::new(connection);
    let connection_id = connection.id();
    let registry = state.registry();
    let metrics = state.metrics();
    let closing = state.session_token();

    info!(%connection_id, "Client connected");
    metrics.record_connection_opened();

    connection.send(ClientEvent::OnQueued {
        connection_id,
        message: QUEUED_MESSAGE.to_string(),
    });
    registry.add(connection.clone()).await;

    let end = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Event(event)) => {
                    let json = match event.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(%connection_id, error = %e, "Dropping unserializable event");
                            continue;
                        }
                    };
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break SessionEnd::Dropped;
                    }
                    debug!(%connection_id, event = event.kind(), "Event delivered");
                }
                Some(Outbound::Close) | None => break SessionEnd::Completed,
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break SessionEnd::Dropped,
                // Clients have nothing to say while they wait
                Some(Ok(_)) => {}
            },
            () = closing.cancelled() => break SessionEnd::Shutdown,
        }
    };

    if end != SessionEnd::Dropped {
        // Sends the close frame after everything queued before it
        let _ = ws_tx.close().await;
    }
    drop(outbound);

    registry.remove(connection_id).await;
    metrics.record_connection_closed(end == SessionEnd::Dropped);

    match end {
        SessionEnd::Completed => info!(%connection_id, "Client session completed"),
        SessionEnd::Dropped => info!(%connection_id, "Client disconnected"),
        SessionEnd::Shutdown => info!(%connection_id, "Client closed for shutdown"),
    }
}
