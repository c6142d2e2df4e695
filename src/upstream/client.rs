//! Authenticated client for the quota control plane.

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{LimiterSettings, UpstreamConfig};
use crate::error::{Result, TollgateError};

/// Cap on upstream response bodies.
const MAX_RESPONSE_BYTES: usize = 1024 * 1024; // 1MiB

/// Access-token exchange response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// A per-client quota assignment from the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaAssignment {
    /// The client the quota applies to
    pub client_id: String,
    /// Admissions allowed per window
    pub requests_per_window: u64,
    /// Window length in seconds
    pub window_secs: u64,
}

impl From<&QuotaAssignment> for LimiterSettings {
    fn from(assignment: &QuotaAssignment) -> Self {
        Self {
            requests_per_window: assignment.requests_per_window,
            window_secs: assignment.window_secs,
        }
    }
}

/// Search filter sent to the quota endpoint.
#[derive(Debug, Serialize)]
struct QuotaQuery<'a> {
    filter: QuotaFilter<'a>,
    max_results: u32,
}

#[derive(Debug, Serialize)]
struct QuotaFilter<'a> {
    route: &'a str,
}

/// Client for the quota control plane.
///
/// Exchanges the configured API key for a bearer token on first use and
/// reuses that token for subsequent calls.
pub struct ControlPlaneClient {
    base_url: String,
    http_client: reqwest::Client,
    api_key: String,
    access_token: Mutex<Option<String>>,
}

impl ControlPlaneClient {
    /// Create a client from upstream configuration.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(TollgateError::Config(
                "upstream.base_url must be set".to_string(),
            ));
        }
        if config.api_key.is_empty() {
            return Err(TollgateError::Config(
                "upstream.api_key must be set".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
            api_key: config.api_key.clone(),
            access_token: Mutex::new(None),
        })
    }

    /// The bearer token for control-plane calls, fetched on first use.
    ///
    /// The lock is held across the exchange, so concurrent callers wait
    /// for a single refresh instead of racing their own.
    pub async fn access_token(&self) -> Result<String> {
        let mut token = self.access_token.lock().await;
        if let Some(token) = token.as_ref() {
            return Ok(token.clone());
        }

        debug!("Exchanging API key for access token");
        let response = self
            .http_client
            .post(format!("{}/auth/token", self.base_url))
            .json(&serde_json::json!({ "api_key": self.api_key }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TollgateError::Auth(format!(
                "token exchange failed with status {}",
                response.status()
            )));
        }

        let decoded: TokenResponse = response.json().await?;
        if decoded.access_token.is_empty() {
            return Err(TollgateError::Auth(
                "token exchange returned an empty token".to_string(),
            ));
        }
        debug!(expires_in = decoded.expires_in, "Obtained access token");

        *token = Some(decoded.access_token.clone());
        Ok(decoded.access_token)
    }

    /// Fetch the quota assignments configured for `route`.
    pub async fn fetch_quota_assignments(
        &self,
        route: &str,
        max_results: u32,
    ) -> Result<Vec<QuotaAssignment>> {
        let token = self.access_token().await?;
        let query = QuotaQuery {
            filter: QuotaFilter { route },
            max_results,
        };

        let mut response = self
            .http_client
            .post(format!("{}/quotas/search", self.base_url))
            .bearer_auth(&token)
            .json(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TollgateError::UpstreamStatus(status));
        }

        // Cap the body by bytes actually read; Content-Length is
        // peer-controlled and cannot be trusted.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
                return Err(TollgateError::ResponseTooLarge {
                    limit: MAX_RESPONSE_BYTES,
                });
            }
            body.extend_from_slice(&chunk);
        }

        let assignments: Vec<QuotaAssignment> = serde_json::from_slice(&body)?;
        debug!(route = %route, count = assignments.len(), "Fetched quota assignments");
        Ok(assignments)
    }
}
