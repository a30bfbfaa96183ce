//! Health checks and service statistics
//!
//! Liveness only reflects whether shutdown has begun. The richer check
//! backs `/stats` and the periodic stats log.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub stats: ServiceStats,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Open client connections
    pub connections: usize,
    /// Connections not yet placed in a match
    pub waiting: usize,
    pub group_size: usize,
    pub matches_formed: u64,
    pub matches_claimed: u64,
    pub matches_failed: u64,
    /// "override" or "remote"
    pub claim_mode: String,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Full health check including statistics
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let status = Self::liveness_check(&app_state);
        let stats = Self::gather_service_stats(&app_state).await;

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            stats,
        })
    }

    /// Healthy until shutdown begins
    pub fn liveness_check(app_state: &AppState) -> HealthStatus {
        if app_state.is_running() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    async fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let registry = app_state.registry();
        let matchmaker = app_state.matchmaker();
        let stats = matchmaker.stats();

        ServiceStats {
            connections: registry.len().await,
            waiting: registry.waiting().await,
            group_size: matchmaker.group_size(),
            matches_formed: stats.matches_formed,
            matches_claimed: stats.matches_claimed,
            matches_failed: stats.matches_failed,
            claim_mode: if app_state.config().uses_claim_override() {
                "override".to_string()
            } else {
                "remote".to_string()
            },
            uptime_seconds: app_state.uptime().as_secs(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
