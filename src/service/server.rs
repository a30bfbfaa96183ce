//! HTTP front door of the broker
//!
//! Probe and monitoring paths are routed explicitly and never register a
//! matchmaking connection. Everything else is treated as a client that
//! wants to join the pool and must be a WebSocket upgrade.

use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use crate::service::socket::run_client_session;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Broker server configuration
#[derive(Debug, Clone)]
pub struct BrokerServerConfig {
    pub port: u16,
    /// Host to bind to (typically "0.0.0.0" for all interfaces)
    pub host: String,
}

impl Default for BrokerServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Serves client WebSockets, probes and metrics on one port
pub struct BrokerServer {
    config: BrokerServerConfig,
    state: Arc<AppState>,
}

impl BrokerServer {
    pub fn new(config: BrokerServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Bind the configured address and serve until shutdown
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid broker server address")?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until the broker shuts down
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!("Broker listening on http://{}", local);

        let shutdown = self.state.shutdown_token();
        axum::serve(listener, self.create_router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Broker server shutdown signal received");
            })
            .await?;

        info!("Broker server stopped");
        Ok(())
    }

    pub fn create_router(&self) -> Router {
        router(self.state.clone())
    }
}

/// Router with every broker endpoint
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/test-claim", get(test_claim_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats", get(stats_handler))
        .fallback(client_handler)
        .with_state(state)
}

/// Liveness: success until shutdown starts
async fn healthz_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("Liveness check requested");
    let healthy = HealthCheck::liveness_check(&state) == HealthStatus::Healthy;
    state.metrics().record_probe("healthz", healthy);

    if healthy {
        (StatusCode::OK, "OK\n")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Shutting down\n")
    }
}

/// Diagnostic: one claim with the default keys and regions
async fn test_claim_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("Diagnostic claim requested");
    let result = state.diagnostic_claim().await;
    state.metrics().record_probe("test-claim", result.is_some());

    match result {
        Some(claimed) => (
            StatusCode::OK,
            format!("server available at: {}\n", claimed.address),
        ),
        None => (StatusCode::NOT_FOUND, "No servers available\n".to_string()),
    }
}

/// Prometheus metrics endpoint handler
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let metrics = state.metrics();
    metrics.update_uptime(state.uptime());

    let metric_families = metrics.registry().gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&metric_families) {
        Ok(body) => {
            debug!("Serving {} metric families", metric_families.len());
            ([(header::CONTENT_TYPE, encoder.format_type().to_string())], body).into_response()
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Service statistics for humans
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match HealthCheck::check(state).await {
        Ok(health) => (StatusCode::OK, Json(json!(health))),
        Err(e) => {
            error!("Failed to get stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "Failed to get service stats",
                    "timestamp": chrono::Utc::now()
                })),
            )
        }
    }
}

/// Any other path: join the matchmaking pool
async fn client_handler(
    State(state): State<Arc<AppState>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !state.is_running() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down\n").into_response();
    }

    match upgrade {
        Ok(upgrade) => upgrade
            .on_upgrade(move |socket| run_client_session(socket, state))
            .into_response(),
        Err(rejection) => {
            debug!(error = %rejection, "Rejected non-WebSocket request");
            (
                StatusCode::UPGRADE_REQUIRED,
                "Expected a WebSocket upgrade\n",
            )
                .into_response()
        }
    }
}
