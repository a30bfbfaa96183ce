//! External claim service interface and its HTTP implementation

use crate::claim::auth::AccessToken;
use crate::config::ClaimSettings;
use crate::error::{BrokerError, Result};
use crate::types::{ClaimRequest, ClaimResponse};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

/// Claims a dedicated server from a fleet
///
/// `Ok(None)` means the service answered but had no capacity. Transport and
/// protocol problems are errors. Callers decide how to treat either.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClaimService: Send + Sync {
    async fn claim(&self, request: &ClaimRequest) -> Result<Option<ClaimResponse>>;
}

/// Claim client for the platform's fleet API
pub struct AmsClaimClient {
    http: Client,
    base_url: String,
    namespace: String,
    token: AccessToken,
}

impl AmsClaimClient {
    pub fn new(http: Client, settings: &ClaimSettings, token: AccessToken) -> Self {
        Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            namespace: settings.namespace.clone(),
            token,
        }
    }

    fn claim_url(&self) -> String {
        format!(
            "{}/ams/v1/namespaces/{}/servers/claim",
            self.base_url, self.namespace
        )
    }
}

#[async_trait]
impl ClaimService for AmsClaimClient {
    async fn claim(&self, request: &ClaimRequest) -> Result<Option<ClaimResponse>> {
        debug!(
            session_id = %request.session_id,
            claim_keys = ?request.claim_keys,
            regions = ?request.regions,
            "Sending claim request"
        );

        let response = self
            .http
            .put(self.claim_url())
            .bearer_auth(self.token.secret())
            .json(request)
            .send()
            .await
            .map_err(|e| BrokerError::ClaimRequestFailed {
                message: format!("Claim request failed: {}", e),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(session_id = %request.session_id, "Fleet reported no capacity");
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Claim rejected");
            return Err(BrokerError::ClaimRequestFailed {
                message: format!("Claim rejected with status {}", status),
            }
            .into());
        }

        let claimed: ClaimResponse =
            response
                .json()
                .await
                .map_err(|e| BrokerError::ClaimRequestFailed {
                    message: format!("Invalid claim response: {}", e),
                })?;

        Ok(Some(claimed))
    }
}
