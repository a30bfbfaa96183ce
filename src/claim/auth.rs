//! Client-credentials login against the platform IAM service
//!
//! The broker logs in once at startup. A failed login is a startup failure.

use crate::config::ClaimSettings;
use crate::error::{BrokerError, Result};
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info};

/// Bearer token returned by the IAM service
#[derive(Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl AccessToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: None,
            expires_in: None,
        }
    }

    pub fn secret(&self) -> &str {
        &self.access_token
    }
}

// Never print the token itself
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Logs in with the OAuth client-credentials grant
pub struct ClientCredentialsAuthenticator {
    http: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl ClientCredentialsAuthenticator {
    pub fn new(http: Client, settings: &ClaimSettings) -> Self {
        Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
        }
    }

    fn token_url(&self) -> String {
        format!("{}/iam/v3/oauth/token", self.base_url)
    }

    /// Exchange the client credentials for an access token
    pub async fn login(&self) -> Result<AccessToken> {
        debug!(url = %self.token_url(), client_id = %self.client_id, "Logging in");

        let response = self
            .http
            .post(self.token_url())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| BrokerError::AuthenticationFailed {
                message: format!("Login request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::AuthenticationFailed {
                message: format!("Login rejected with status {}: {}", status, body),
            }
            .into());
        }

        let token: AccessToken =
            response
                .json()
                .await
                .map_err(|e| BrokerError::AuthenticationFailed {
                    message: format!("Invalid login response: {}", e),
                })?;

        info!(
            client_id = %self.client_id,
            expires_in = ?token.expires_in,
            "Logged in with client credentials"
        );
        Ok(token)
    }
}
