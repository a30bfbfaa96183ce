//! Minimal dedicated server driven by the watchdog lifecycle
//!
//! Startup is connect, initialize, then announce ready. Either the connect
//! or the ready failing aborts startup. After that the server serves until a
//! drain or a local stop runs the shutdown sequence.

use crate::config::WatchdogConfig;
use crate::dedicated::drain::{DrainCoordinator, ShutdownSequence};
use crate::error::{BrokerError, Result};
use crate::watchdog::{DisconnectReason, WatchdogClient, WatchdogHandler};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Disconnects the watchdog and ends the serving loop
struct ServerShutdown {
    watchdog: WatchdogClient,
    serving: CancellationToken,
}

#[async_trait]
impl ShutdownSequence for ServerShutdown {
    async fn shutdown(&self) {
        self.watchdog.disconnect().await;
        self.serving.cancel();
    }
}

/// Routes watchdog events into the drain coordinator
struct ServerHandler {
    coordinator: Arc<DrainCoordinator>,
}

#[async_trait]
impl WatchdogHandler for ServerHandler {
    async fn on_connected(&self) {
        info!("Watchdog channel open");
    }

    async fn on_drain(&self) {
        self.coordinator.on_drain().await;
    }

    async fn on_disconnected(&self, reason: DisconnectReason) {
        if reason.is_unexpected() {
            // No reconnect; the supervisor restarts the process
            warn!(reason = %reason, "Lost watchdog connection");
        } else {
            debug!("Watchdog channel closed");
        }
    }
}

pub struct DedicatedServer {
    port: u16,
    init_delay: Duration,
    watchdog: WatchdogClient,
    coordinator: Arc<DrainCoordinator>,
    serving: CancellationToken,
}

impl DedicatedServer {
    pub fn new(config: WatchdogConfig, port: u16) -> Self {
        let watchdog = WatchdogClient::new(config);
        let serving = CancellationToken::new();
        let coordinator = Arc::new(DrainCoordinator::new(Arc::new(ServerShutdown {
            watchdog: watchdog.clone(),
            serving: serving.clone(),
        })));

        Self {
            port,
            init_delay: Duration::from_secs(1),
            watchdog,
            coordinator,
            serving,
        }
    }

    /// Time spent in simulated initialization before ready is sent
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn server_id(&self) -> &str {
        &self.watchdog.config().server_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn watchdog(&self) -> &WatchdogClient {
        &self.watchdog
    }

    pub fn coordinator(&self) -> Arc<DrainCoordinator> {
        self.coordinator.clone()
    }

    pub fn is_serving(&self) -> bool {
        !self.serving.is_cancelled()
    }

    /// Connect, initialize, send ready, then serve until shut down
    pub async fn start(&self) -> Result<()> {
        info!(server_id = %self.server_id(), port = self.port, "Starting dedicated server");

        let handler = Arc::new(ServerHandler {
            coordinator: self.coordinator.clone(),
        });
        self.watchdog.connect(handler).await.map_err(|e| {
            BrokerError::StartupFailure {
                message: format!("Failed to connect to watchdog: {}", e),
            }
        })?;

        self.initialize().await;

        if self.coordinator.is_shutdown_initiated() {
            info!("Shut down during initialization, not sending ready");
            return Ok(());
        }

        if let Err(e) = self.watchdog.send_ready().await {
            // A drain can land between the check above and the send
            if self.coordinator.is_shutdown_initiated() || self.watchdog.drain_received().await {
                info!(error = %e, "Drained before ready was sent, not serving");
                self.serving.cancelled().await;
                return Ok(());
            }
            self.watchdog.disconnect().await;
            return Err(BrokerError::StartupFailure {
                message: format!("Failed to send ready: {}", e),
            }
            .into());
        }

        self.serve().await;
        info!(server_id = %self.server_id(), "Dedicated server stopped");
        Ok(())
    }

    async fn initialize(&self) {
        info!(port = self.port, "Initializing server resources");
        tokio::time::sleep(self.init_delay).await;
        info!("Server initialization complete");
    }

    async fn serve(&self) {
        info!("Server is ready and running");
        let mut status = tokio::time::interval(Duration::from_secs(30));
        status.tick().await;

        loop {
            tokio::select! {
                () = self.serving.cancelled() => break,
                _ = status.tick() => {
                    debug!(
                        session_active = self.coordinator.is_session_active(),
                        drain_pending = self.coordinator.is_drain_pending(),
                        heartbeats = self.watchdog.heartbeats_sent(),
                        "Server status"
                    );
                }
            }
        }
    }

    /// Stop immediately, as on SIGINT or SIGTERM
    pub async fn stop(&self) {
        info!("Stopping dedicated server");
        self.coordinator.shutdown_now().await;
    }
}
