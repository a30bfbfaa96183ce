//! Turns a formed group into a claim and interprets the result
//!
//! Whether claims go to the fleet or resolve to a fixed override address is
//! decided once, when the requestor is built. The two are never mixed.

use crate::claim::service::ClaimService;
use crate::metrics::MetricsCollector;
use crate::types::{ClaimRequest, ClaimResponse, ClaimResult};
use crate::utils::format_address;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Session id used for claims that do not belong to a match
pub const DIAGNOSTIC_SESSION_ID: &str = "none";

/// Where claims are resolved
#[derive(Clone)]
pub enum ClaimMode {
    /// Every claim resolves to this address without any external call
    Override(String),
    /// Claims go to the external claim service
    Remote(Arc<dyn ClaimService>),
}

/// Issues one claim per match and reduces failures to absence
#[derive(Clone)]
pub struct AllocationRequestor {
    mode: ClaimMode,
    port_name: String,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AllocationRequestor {
    pub fn new(mode: ClaimMode, port_name: impl Into<String>) -> Self {
        Self {
            mode,
            port_name: port_name.into(),
            metrics: None,
        }
    }

    pub fn override_address(address: impl Into<String>) -> Self {
        Self::new(ClaimMode::Override(address.into()), "default")
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_override(&self) -> bool {
        matches!(self.mode, ClaimMode::Override(_))
    }

    /// Claim a server; `None` covers no capacity and every failure
    pub async fn claim(
        &self,
        keys: &[String],
        regions: &[String],
        session_id: &str,
    ) -> Option<ClaimResult> {
        let started = Instant::now();
        let result = match &self.mode {
            ClaimMode::Override(address) => {
                debug!(session_id, address = %address, "Using override address");
                Some(ClaimResult {
                    address: address.clone(),
                    ports: HashMap::new(),
                })
            }
            ClaimMode::Remote(service) => {
                let request = ClaimRequest {
                    claim_keys: keys.to_vec(),
                    regions: regions.to_vec(),
                    session_id: session_id.to_string(),
                };
                match service.claim(&request).await {
                    Ok(Some(response)) => self.interpret(session_id, response),
                    Ok(None) => {
                        info!(session_id, "No server available");
                        None
                    }
                    Err(e) => {
                        warn!(session_id, error = %e, "Claim failed");
                        None
                    }
                }
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_claim(result.is_some(), started.elapsed());
        }
        result
    }

    fn interpret(&self, session_id: &str, response: ClaimResponse) -> Option<ClaimResult> {
        let Some(port) = response.ports.get(&self.port_name).copied() else {
            warn!(
                session_id,
                port_name = %self.port_name,
                ports = ?response.ports,
                "Claimed server does not expose the configured port"
            );
            return None;
        };

        let address = format_address(&response.ip, port);
        info!(
            session_id,
            address = %address,
            region = ?response.region,
            server_id = ?response.server_id,
            "Server claimed"
        );
        Some(ClaimResult {
            address,
            ports: response.ports,
        })
    }
}
