//! Main application state and service coordination
//!
//! `AppState` wires the registry, the claim path, the matchmaker and metrics
//! together and owns the background tasks and the shutdown token.

use crate::claim::{
    AllocationRequestor, AmsClaimClient, ClaimMode, ClientCredentialsAuthenticator,
    DIAGNOSTIC_SESSION_ID,
};
use crate::config::AppConfig;
use crate::matchmaking::{ConnectionRegistry, Matchmaker, MatchmakerStats};
use crate::metrics::MetricsCollector;
use crate::types::ClaimResult;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    registry: Arc<ConnectionRegistry>,
    requestor: AllocationRequestor,
    matchmaker: Arc<Matchmaker>,
    metrics: Arc<MetricsCollector>,
    shutdown: CancellationToken,
    /// Closes client sessions; fired after the matchmaker has stopped
    sessions: CancellationToken,
    started_at: Instant,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    /// Initialize the broker, logging in to the platform unless an override
    /// address is configured
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing match broker");

        let requestor = match &config.claim.override_address {
            Some(address) => {
                info!(address = %address, "Claim override set, skipping login");
                AllocationRequestor::new(ClaimMode::Override(address.clone()), &config.claim.port_name)
            }
            None => Self::initialize_claim_client(&config).await?,
        };

        Self::with_requestor(config, requestor)
    }

    /// Build the state around an existing requestor
    pub fn with_requestor(
        config: AppConfig,
        requestor: AllocationRequestor,
    ) -> Result<Self, ServiceError> {
        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        let requestor = requestor.with_metrics(metrics.clone());
        let registry = Arc::new(ConnectionRegistry::new());
        let matchmaker = Arc::new(
            Matchmaker::new(registry.clone(), requestor.clone(), &config)
                .with_metrics(metrics.clone()),
        );

        Ok(Self {
            config,
            registry,
            requestor,
            matchmaker,
            metrics,
            shutdown: CancellationToken::new(),
            sessions: CancellationToken::new(),
            started_at: Instant::now(),
            background_tasks: Mutex::new(Vec::new()),
        })
    }

    async fn initialize_claim_client(config: &AppConfig) -> Result<AllocationRequestor, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.claim_timeout())
            .build()
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        info!(
            base_url = %config.claim.base_url,
            namespace = %config.claim.namespace,
            "Logging in to platform"
        );
        let token = ClientCredentialsAuthenticator::new(http.clone(), &config.claim)
            .login()
            .await
            .map_err(|e| ServiceError::Authentication {
                message: e.to_string(),
            })?;

        let client = AmsClaimClient::new(http, &config.claim, token);
        Ok(AllocationRequestor::new(
            ClaimMode::Remote(Arc::new(client)),
            &config.claim.port_name,
        ))
    }

    /// Start the matchmaker and maintenance tasks
    pub async fn start(&self) {
        info!("Starting match broker background tasks");

        let matchmaker_task = {
            let matchmaker = self.matchmaker.clone();
            let cancel = self.shutdown.child_token();
            tokio::spawn(async move { matchmaker.run(cancel).await })
        };

        let stats_task = {
            let registry = self.registry.clone();
            let matchmaker = self.matchmaker.clone();
            let metrics = self.metrics.clone();
            let cancel = self.shutdown.child_token();
            let started_at = self.started_at;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = interval.tick() => {}
                    }

                    metrics.update_uptime(started_at.elapsed());
                    metrics.update_health_status(1);

                    let stats = matchmaker.stats();
                    let connections = registry.len().await;
                    let waiting = registry.waiting().await;
                    info!(
                        connections,
                        waiting,
                        matches_formed = stats.matches_formed,
                        matches_claimed = stats.matches_claimed,
                        matches_failed = stats.matches_failed,
                        "Broker stats"
                    );
                }
                debug!("Stats task stopped");
            })
        };

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(matchmaker_task);
        tasks.push(stats_task);
        info!("{} background tasks started", tasks.len());
    }

    /// Stop accepting work and wait for background tasks to finish.
    ///
    /// An in-flight match is allowed to finish its claim and broadcast
    /// before the remaining client sessions are closed.
    pub async fn shutdown(&self) {
        info!("Starting graceful shutdown of match broker");
        self.shutdown.cancel();
        self.metrics.update_health_status(0);

        let tasks: Vec<_> = self.background_tasks.lock().await.drain(..).collect();
        let count = tasks.len();
        let aborts: Vec<_> = tasks.iter().map(|task| task.abort_handle()).collect();

        match tokio::time::timeout(
            self.config.shutdown_timeout(),
            futures::future::join_all(tasks),
        )
        .await
        {
            Ok(_) => info!("{} background tasks stopped", count),
            Err(_) => {
                warn!("Background tasks did not stop in time, aborting");
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        self.sessions.cancel();

        let stats = self.matchmaker.stats();
        info!(
            matches_formed = stats.matches_formed,
            matches_claimed = stats.matches_claimed,
            matches_failed = stats.matches_failed,
            "Match broker shutdown completed"
        );
    }

    /// One claim with default keys and regions, outside any match
    pub async fn diagnostic_claim(&self) -> Option<ClaimResult> {
        self.requestor
            .claim(
                &self.config.claim.claim_keys,
                &self.config.claim.regions,
                DIAGNOSTIC_SESSION_ID,
            )
            .await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn matchmaker(&self) -> Arc<Matchmaker> {
        self.matchmaker.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn matchmaker_stats(&self) -> MatchmakerStats {
        self.matchmaker.stats()
    }

    /// Token cancelled when the broker begins shutting down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Token cancelled once no match can still be delivered to its members
    pub fn session_token(&self) -> CancellationToken {
        self.sessions.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
