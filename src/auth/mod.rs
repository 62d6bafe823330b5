//! Credential gate: guarantees connection attempts use a live access token.
//!
//! DESIGN
//! ======
//! Tokens live in a [`store::CredentialStore`] owned by the wider
//! application. Before each connection attempt the gate decodes the stored
//! access token's `exp`; if it is expired (or unreadable) and a refresh
//! token exists, it exchanges it through a [`refresh::TokenRefresher`] and
//! persists the result.
//!
//! ERROR HANDLING
//! ==============
//! "No valid credential" is `Err(CredentialError)`. Callers must not open a
//! connection in that case and must not retry on their own; the user has to
//! re-authenticate first.

pub mod claims;
pub mod refresh;
pub mod store;

use std::sync::Arc;

use time::OffsetDateTime;

use self::refresh::TokenRefresher;
use self::store::{CredentialStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no access token stored")]
    MissingAccessToken,
    #[error("access token expired and no refresh token stored")]
    MissingRefreshToken,
    #[error("token refresh rejected: status {status}")]
    RefreshRejected { status: u16 },
    #[error("token refresh request failed: {0}")]
    RefreshRequest(String),
    #[error("token refresh response unreadable: {0}")]
    RefreshParse(String),
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct CredentialGate {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
}

impl CredentialGate {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { store, refresher }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Return a non-expired access token, refreshing it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when no usable token can be produced.
    pub async fn ensure_valid_access_token(&self) -> Result<String, CredentialError> {
        self.ensure_valid_access_token_at(OffsetDateTime::now_utc()).await
    }

    pub(crate) async fn ensure_valid_access_token_at(&self, now: OffsetDateTime) -> Result<String, CredentialError> {
        let access = self.store.access_token()?;
        if let Some(token) = access.as_deref()
            && !claims::is_expired(token, now)
        {
            return Ok(token.to_owned());
        }

        let Some(refresh_token) = self.store.refresh_token()? else {
            return Err(if access.is_some() {
                CredentialError::MissingRefreshToken
            } else {
                CredentialError::MissingAccessToken
            });
        };

        tracing::info!("access token missing or expired; refreshing");
        let token = match self.refresher.refresh(&refresh_token).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                return Err(e);
            }
        };
        self.store.set_access_token(&token)?;
        tracing::debug!(token = %token_prefix(&token), "access token refreshed");
        Ok(token)
    }
}

/// First few characters of a token, for logs.
#[must_use]
pub fn token_prefix(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{prefix}…")
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
