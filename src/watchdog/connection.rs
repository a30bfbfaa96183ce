//! Watchdog control channel client
//!
//! One connection per dedicated-server process. Local calls (connect, send,
//! disconnect) and inbound frames both go through the same state lock, so a
//! heartbeat can never be written after the disconnect has been observed.

use crate::config::WatchdogConfig;
use crate::watchdog::error::WatchdogError;
use crate::watchdog::handlers::{DisconnectReason, WatchdogHandler};
use crate::watchdog::heartbeat::{run_heartbeat, HeartbeatEmitter};
use crate::watchdog::messages::{InboundMessage, OutboundMessage, DSID_HEADER};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Lifecycle of the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Disconnected,
    Connecting,
    Connected,
    /// Drain received; heartbeats continue until disconnect
    Draining,
    /// Locally disconnected
    Closed,
}

impl WatchdogState {
    fn is_open(self) -> bool {
        matches!(self, WatchdogState::Connected | WatchdogState::Draining)
    }
}

impl std::fmt::Display for WatchdogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WatchdogState::Disconnected => "disconnected",
            WatchdogState::Connecting => "connecting",
            WatchdogState::Connected => "connected",
            WatchdogState::Draining => "draining",
            WatchdogState::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct HeartbeatTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    state: WatchdogState,
    ready_sent: bool,
    drain_received: bool,
    /// Bumped on every connect so stale tasks can tell they are stale
    generation: u64,
    sink: Option<WsSink>,
    heartbeat: Option<HeartbeatTask>,
    /// Stops the receive task of the current connection
    receive_cancel: Option<CancellationToken>,
}

struct Inner {
    config: WatchdogConfig,
    shared: Mutex<Shared>,
    heartbeats_sent: AtomicU64,
}

/// Client for the local orchestration watchdog
#[derive(Clone)]
pub struct WatchdogClient {
    inner: Arc<Inner>,
}

impl WatchdogClient {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                shared: Mutex::new(Shared {
                    state: WatchdogState::Disconnected,
                    ready_sent: false,
                    drain_received: false,
                    generation: 0,
                    sink: None,
                    heartbeat: None,
                    receive_cancel: None,
                }),
                heartbeats_sent: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.inner.config
    }

    pub async fn state(&self) -> WatchdogState {
        self.inner.shared.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await.is_open()
    }

    pub async fn ready_sent(&self) -> bool {
        self.inner.shared.lock().await.ready_sent
    }

    pub async fn drain_received(&self) -> bool {
        self.inner.shared.lock().await.drain_received
    }

    /// Heartbeats written since the client was created
    pub fn heartbeats_sent(&self) -> u64 {
        self.inner.heartbeats_sent.load(Ordering::Relaxed)
    }

    /// Open the control channel and start heartbeats.
    ///
    /// Fails if the channel is not open within the configured connect
    /// timeout. Not retried.
    pub async fn connect(&self, handler: Arc<dyn WatchdogHandler>) -> Result<(), WatchdogError> {
        {
            let mut shared = self.inner.shared.lock().await;
            match shared.state {
                WatchdogState::Disconnected | WatchdogState::Closed => {
                    shared.state = WatchdogState::Connecting;
                }
                _ => return Err(WatchdogError::AlreadyConnected),
            }
        }

        let config = &self.inner.config;
        info!(
            url = %config.url,
            server_id = %config.server_id,
            "Connecting to watchdog"
        );

        let ws = match self.open_socket().await {
            Ok(ws) => ws,
            Err(e) => {
                self.inner.shared.lock().await.state = WatchdogState::Disconnected;
                error!(error = %e, "Watchdog connect failed");
                return Err(e);
            }
        };
        let (sink, stream) = ws.split();

        let receive_cancel = CancellationToken::new();
        let generation = {
            let mut shared = self.inner.shared.lock().await;
            shared.generation += 1;
            shared.state = WatchdogState::Connected;
            shared.ready_sent = false;
            shared.drain_received = false;
            shared.sink = Some(sink);
            shared.receive_cancel = Some(receive_cancel.clone());
            shared.heartbeat = Some(self.spawn_heartbeat(shared.generation));
            shared.generation
        };

        info!(server_id = %config.server_id, "Connected to watchdog");
        handler.on_connected().await;

        tokio::spawn(receive_loop(
            self.inner.clone(),
            stream,
            handler,
            receive_cancel,
            generation,
        ));

        Ok(())
    }

    async fn open_socket(&self) -> Result<WsStream, WatchdogError> {
        let config = &self.inner.config;

        let mut request = config.url.as_str().into_client_request().map_err(|e| {
            WatchdogError::InvalidRequest {
                message: e.to_string(),
            }
        })?;
        let dsid = HeaderValue::from_str(&config.server_id).map_err(|e| {
            WatchdogError::InvalidRequest {
                message: format!("server id is not a valid header value: {}", e),
            }
        })?;
        request.headers_mut().insert(DSID_HEADER, dsid);

        match tokio::time::timeout(config.connect_timeout, connect_async(request)).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(WatchdogError::ConnectFailed {
                message: e.to_string(),
            }),
            Err(_) => Err(WatchdogError::ConnectTimeout {
                timeout_ms: config.connect_timeout.as_millis() as u64,
            }),
        }
    }

    fn spawn_heartbeat(&self, generation: u64) -> HeartbeatTask {
        let cancel = CancellationToken::new();
        let emitter = ConnectionHeartbeat {
            inner: Arc::downgrade(&self.inner),
            generation,
        };
        let interval = self.inner.config.heartbeat_interval;
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            run_heartbeat(&emitter, interval, token).await;
        });
        HeartbeatTask { cancel, handle }
    }

    /// Tell the watchdog this server can be claimed. Allowed once per connection.
    pub async fn send_ready(&self) -> Result<(), WatchdogError> {
        let mut shared = self.inner.shared.lock().await;
        match shared.state {
            WatchdogState::Connected => {}
            WatchdogState::Draining => {
                return Err(WatchdogError::Send {
                    kind: "ready",
                    message: "connection is draining".to_string(),
                })
            }
            _ => return Err(WatchdogError::NotConnected),
        }
        if shared.ready_sent {
            return Err(WatchdogError::ReadyAlreadySent);
        }

        let message = OutboundMessage::Ready {
            dsid: self.inner.config.server_id.clone(),
        };
        write_message(&mut shared, &message).await?;
        shared.ready_sent = true;
        info!(server_id = %self.inner.config.server_id, "Sent ready to watchdog");
        Ok(())
    }

    pub async fn send_heartbeat(&self) -> Result<(), WatchdogError> {
        self.send_open(&OutboundMessage::Heartbeat {}).await?;
        self.inner.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        debug!("Sent heartbeat to watchdog");
        Ok(())
    }

    /// Extend the current session, optionally with a new timeout
    pub async fn reset_session_timeout(
        &self,
        new_timeout: Option<Duration>,
    ) -> Result<(), WatchdogError> {
        let message = OutboundMessage::reset_session_timeout(new_timeout);
        self.send_open(&message).await?;
        info!(new_timeout = ?new_timeout, "Sent session timeout reset to watchdog");
        Ok(())
    }

    async fn send_open(&self, message: &OutboundMessage) -> Result<(), WatchdogError> {
        let mut shared = self.inner.shared.lock().await;
        if !shared.state.is_open() {
            return Err(WatchdogError::NotConnected);
        }
        write_message(&mut shared, message).await
    }

    /// Close the channel and stop heartbeats. Safe to call more than once.
    pub async fn disconnect(&self) {
        let (sink, heartbeat, receive_cancel) = {
            let mut shared = self.inner.shared.lock().await;
            if shared.state == WatchdogState::Closed {
                return;
            }
            shared.state = WatchdogState::Closed;
            (
                shared.sink.take(),
                shared.heartbeat.take(),
                shared.receive_cancel.take(),
            )
        };

        info!("Disconnecting from watchdog");

        if let Some(cancel) = receive_cancel {
            cancel.cancel();
        }
        if let Some(heartbeat) = heartbeat {
            stop_heartbeat(heartbeat, self.inner.config.heartbeat_join_timeout).await;
        }
        if let Some(mut sink) = sink {
            match tokio::time::timeout(self.inner.config.close_timeout, sink.close()).await {
                Ok(Ok(())) => debug!("Watchdog channel closed"),
                Ok(Err(e)) => debug!(error = %e, "Error closing watchdog channel"),
                Err(_) => warn!("Timed out closing watchdog channel"),
            }
        }
    }
}

async fn write_message(shared: &mut Shared, message: &OutboundMessage) -> Result<(), WatchdogError> {
    let json = message.to_json()?;
    let Some(sink) = shared.sink.as_mut() else {
        return Err(WatchdogError::NotConnected);
    };
    sink.send(Message::text(json))
        .await
        .map_err(|e| WatchdogError::Send {
            kind: message.kind(),
            message: e.to_string(),
        })
}

async fn stop_heartbeat(heartbeat: HeartbeatTask, join_timeout: Duration) {
    heartbeat.cancel.cancel();
    let abort = heartbeat.handle.abort_handle();
    if tokio::time::timeout(join_timeout, heartbeat.handle).await.is_err() {
        warn!("Heartbeat task did not stop in time, aborting");
        abort.abort();
    }
}

/// Heartbeats for one connection generation
struct ConnectionHeartbeat {
    inner: Weak<Inner>,
    generation: u64,
}

#[async_trait]
impl HeartbeatEmitter for ConnectionHeartbeat {
    async fn emit(&self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };

        let mut shared = inner.shared.lock().await;
        if shared.generation != self.generation || !shared.state.is_open() {
            return false;
        }

        match write_message(&mut shared, &OutboundMessage::Heartbeat {}).await {
            Ok(()) => {
                inner.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                debug!("Sent heartbeat to watchdog");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to send heartbeat");
                // The receive task reports the disconnect
                true
            }
        }
    }
}

async fn receive_loop(
    inner: Arc<Inner>,
    mut stream: SplitStream<WsStream>,
    handler: Arc<dyn WatchdogHandler>,
    cancel: CancellationToken,
    generation: u64,
) {
    let reason = loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break DisconnectReason::Requested,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                handle_text(&inner, handler.as_ref(), generation, text.as_str()).await;
            }
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(frame) => DisconnectReason::Remote {
                        code: Some(u16::from(frame.code)),
                        reason: frame.reason.to_string(),
                    },
                    None => DisconnectReason::Remote {
                        code: None,
                        reason: String::new(),
                    },
                };
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break DisconnectReason::Transport(e.to_string()),
            None => {
                break DisconnectReason::Remote {
                    code: None,
                    reason: String::new(),
                }
            }
        }
    };

    if reason.is_unexpected() {
        mark_disconnected(&inner, generation).await;
        warn!(reason = %reason, "Watchdog connection lost");
    }

    handler.on_disconnected(reason).await;
}

async fn handle_text(inner: &Inner, handler: &dyn WatchdogHandler, generation: u64, text: &str) {
    match InboundMessage::parse(text) {
        Ok(InboundMessage::Drain) => {
            let first = {
                let mut shared = inner.shared.lock().await;
                if shared.generation != generation || !shared.state.is_open() {
                    return;
                }
                shared.state = WatchdogState::Draining;
                !std::mem::replace(&mut shared.drain_received, true)
            };

            if first {
                warn!("Drain received from watchdog");
                handler.on_drain().await;
            } else {
                debug!("Repeated drain ignored");
            }
        }
        Ok(InboundMessage::Unrecognized(kinds)) => {
            debug!(kinds = ?kinds, "Ignoring unrecognized watchdog message");
        }
        Err(e) => {
            warn!(error = %e, "Discarding malformed watchdog message");
        }
    }
}

/// Transport went away underneath an open connection
async fn mark_disconnected(inner: &Inner, generation: u64) {
    let (sink, heartbeat) = {
        let mut shared = inner.shared.lock().await;
        if shared.generation != generation || !shared.state.is_open() {
            return;
        }
        shared.state = WatchdogState::Disconnected;
        shared.receive_cancel = None;
        (shared.sink.take(), shared.heartbeat.take())
    };

    if let Some(heartbeat) = heartbeat {
        stop_heartbeat(heartbeat, inner.config.heartbeat_join_timeout).await;
    }
    drop(sink);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::handlers::LoggingHandler;

    fn client() -> WatchdogClient {
        WatchdogClient::new(
            WatchdogConfig::new("ds-test")
                .with_url("ws://127.0.0.1:1/watchdog")
                .with_connect_timeout(Duration::from_millis(200)),
        )
    }

    #[tokio::test]
    async fn test_initial_state() {
        let client = client();
        assert_eq!(client.state().await, WatchdogState::Disconnected);
        assert!(!client.ready_sent().await);
        assert!(!client.drain_received().await);
        assert_eq!(client.heartbeats_sent(), 0);
    }

    #[tokio::test]
    async fn test_sends_fail_before_connect() {
        let client = client();
        assert!(matches!(
            client.send_ready().await,
            Err(WatchdogError::NotConnected)
        ));
        assert!(matches!(
            client.send_heartbeat().await,
            Err(WatchdogError::NotConnected)
        ));
        assert!(matches!(
            client.reset_session_timeout(None).await,
            Err(WatchdogError::NotConnected)
        ));
        assert!(!client.ready_sent().await);
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let client = client();
        let result = client.connect(Arc::new(LoggingHandler)).await;
        assert!(matches!(
            result,
            Err(WatchdogError::ConnectFailed { .. }) | Err(WatchdogError::ConnectTimeout { .. })
        ));
        assert_eq!(client.state().await, WatchdogState::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_server_id_header() {
        let client = WatchdogClient::new(WatchdogConfig::new("bad\nid"));
        assert!(matches!(
            client.connect(Arc::new(LoggingHandler)).await,
            Err(WatchdogError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let client = client();
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state().await, WatchdogState::Closed);
    }
}
