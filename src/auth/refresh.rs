//! Token refresh client for `POST {api_url}/token/refresh/`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::CredentialError;
use crate::config::RefreshTimeouts;

/// Exchanges a refresh token for a new access token.
#[async_trait::async_trait]
pub trait TokenRefresher: Send + Sync {
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the exchange fails for any reason.
    async fn refresh(&self, refresh_token: &str) -> Result<String, CredentialError>;
}

pub struct HttpTokenRefresher {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTokenRefresher {
    /// # Errors
    ///
    /// Returns [`CredentialError::HttpClientBuild`] if the HTTP client cannot be constructed.
    pub fn new(api_url: &str, timeouts: RefreshTimeouts) -> Result<Self, CredentialError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| CredentialError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, endpoint: refresh_endpoint(api_url) })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<String, CredentialError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&RefreshRequest { refresh: refresh_token })
            .send()
            .await
            .map_err(|e| CredentialError::RefreshRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::RefreshRejected { status: status.as_u16() });
        }

        let text = response
            .text()
            .await
            .map_err(|e| CredentialError::RefreshRequest(e.to_string()))?;
        parse_refresh_response(&text)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: Option<String>,
}

fn refresh_endpoint(api_url: &str) -> String {
    format!("{}/token/refresh/", api_url.trim_end_matches('/'))
}

fn parse_refresh_response(body: &str) -> Result<String, CredentialError> {
    let parsed: RefreshResponse =
        serde_json::from_str(body).map_err(|e| CredentialError::RefreshParse(e.to_string()))?;
    parsed
        .access
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CredentialError::RefreshParse("response has no access token".to_owned()))
}

#[cfg(test)]
#[path = "refresh_test.rs"]
mod tests;
