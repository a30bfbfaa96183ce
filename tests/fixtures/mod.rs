//! Test fixtures and fake collaborators for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use match_broker::claim::{AllocationRequestor, ClaimService};
use match_broker::config::AppConfig;
use match_broker::error::{BrokerError, Result};
use match_broker::service::{AppState, BrokerServer, BrokerServerConfig};
use match_broker::types::{ClaimRequest, ClaimResponse, ClientEvent};
use match_broker::watchdog::{DisconnectReason, WatchdogHandler};
use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Scripted answer for one claim
#[derive(Debug, Clone)]
pub enum ClaimAnswer {
    Server { ip: String, port: u16 },
    NoCapacity,
    Failure,
}

/// Claim service that replays scripted answers and records requests
#[derive(Default)]
pub struct ScriptedClaimService {
    answers: Mutex<VecDeque<ClaimAnswer>>,
    requests: Mutex<Vec<ClaimRequest>>,
    /// How long each claim takes to answer
    latency: Duration,
}

impl ScriptedClaimService {
    pub fn new(answers: Vec<ClaimAnswer>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            requests: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn requests(&self) -> Vec<ClaimRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ClaimService for ScriptedClaimService {
    async fn claim(&self, request: &ClaimRequest) -> Result<Option<ClaimResponse>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let answer = self
            .answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front())
            .unwrap_or(ClaimAnswer::NoCapacity);

        match answer {
            ClaimAnswer::Server { ip, port } => Ok(Some(ClaimResponse {
                ip,
                ports: [("default".to_string(), port)].into_iter().collect(),
                region: Some("us-west-2".to_string()),
                server_id: None,
            })),
            ClaimAnswer::NoCapacity => Ok(None),
            ClaimAnswer::Failure => Err(BrokerError::ClaimRequestFailed {
                message: "scripted failure".to_string(),
            }
            .into()),
        }
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.matchmaking.match_interval_ms = 20;
    config.matchmaking.close_delay_ms = 10;
    config.service.shutdown_timeout_seconds = 2;
    config
}

/// A broker serving on an ephemeral local port
pub struct TestBroker {
    pub state: Arc<AppState>,
    pub addr: SocketAddr,
}

impl TestBroker {
    pub async fn start(config: AppConfig, requestor: AllocationRequestor) -> Self {
        let state = Arc::new(AppState::with_requestor(config, requestor).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = BrokerServer::new(BrokerServerConfig::default(), state.clone());
        tokio::spawn(async move { server.serve(listener).await });
        state.start().await;

        Self { state, addr }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect_client(&self) -> TestClient {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url()).await.unwrap();
        TestClient { ws }
    }

    pub async fn stop(&self) {
        self.state.shutdown().await;
    }
}

/// A matchmaking client
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Next event, or None once the broker closed the socket
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timed out waiting for a frame");
            match frame {
                Some(Ok(Message::Text(text))) => {
                    return Some(serde_json::from_str(text.as_str()).unwrap())
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Poll `check` until it returns true or `limit` passes
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}

/// Commands for the fake watchdog's connection task
enum WatchdogCommand {
    Send(String),
    Close,
}

/// Local stand-in for the orchestration watchdog. Accepts one connection.
pub struct FakeWatchdog {
    pub url: String,
    dsid: Arc<Mutex<Option<String>>>,
    received: Arc<Mutex<Vec<String>>>,
    closed_by_client: Arc<Mutex<bool>>,
    commands: mpsc::UnboundedSender<WatchdogCommand>,
}

impl FakeWatchdog {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/watchdog", listener.local_addr().unwrap());

        let dsid = Arc::new(Mutex::new(None));
        let received = Arc::new(Mutex::new(Vec::new()));
        let closed_by_client = Arc::new(Mutex::new(false));
        let (commands, mut command_rx) = mpsc::unbounded_channel();

        {
            let dsid = dsid.clone();
            let received = received.clone();
            let closed_by_client = closed_by_client.clone();

            tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                let capture = dsid.clone();
                let callback = move |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
                    let header = request
                        .headers()
                        .get("ams-dsid")
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    *capture.lock().unwrap() = header;
                    Ok(response)
                };
                let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                    .await
                    .unwrap();

                loop {
                    tokio::select! {
                        command = command_rx.recv() => match command {
                            Some(WatchdogCommand::Send(text)) => {
                                if ws.send(Message::text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Some(WatchdogCommand::Close) | None => {
                                let _ = ws.close(None).await;
                                break;
                            }
                        },
                        frame = ws.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                received.lock().unwrap().push(text.to_string());
                            }
                            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                                *closed_by_client.lock().unwrap() = true;
                                break;
                            }
                            Some(Ok(_)) => {}
                        },
                    }
                }
            });
        }

        Self {
            url,
            dsid,
            received,
            closed_by_client,
            commands,
        }
    }

    pub fn dsid_header(&self) -> Option<String> {
        self.dsid.lock().unwrap().clone()
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self, message: &str) -> usize {
        self.received().iter().filter(|m| m.as_str() == message).count()
    }

    pub fn closed_by_client(&self) -> bool {
        *self.closed_by_client.lock().unwrap()
    }

    pub fn send(&self, text: &str) {
        let _ = self.commands.send(WatchdogCommand::Send(text.to_string()));
    }

    pub fn send_drain(&self) {
        self.send(r#"{"drain":{}}"#);
    }

    pub fn close(&self) {
        let _ = self.commands.send(WatchdogCommand::Close);
    }
}

/// Watchdog handler that records what it was told
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<String>>,
    disconnects: Mutex<Vec<DisconnectReason>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> Vec<DisconnectReason> {
        self.disconnects.lock().unwrap().clone()
    }
}

#[async_trait]
impl WatchdogHandler for RecordingHandler {
    async fn on_connected(&self) {
        self.events.lock().unwrap().push("connected".to_string());
    }

    async fn on_drain(&self) {
        self.events.lock().unwrap().push("drain".to_string());
    }

    async fn on_disconnected(&self, reason: DisconnectReason) {
        self.events.lock().unwrap().push("disconnected".to_string());
        self.disconnects.lock().unwrap().push(reason);
    }
}
