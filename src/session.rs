//! Token lifecycle facade used by the CLI commands.

use crate::config::CloudConfig;
use crate::credentials::{expiry_from_now, CloudToken, CredentialStore};
use crate::error::AuthError;
use crate::exchange::TokenClient;
use crate::fingerprint::{self, HostProbe, SystemProbe};
use crate::flow::{AuthFlow, BrowserLauncher, SystemBrowser};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Summary of the stored login, read without touching the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStatus {
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
    pub scope: String,
    pub token_type: String,
}

/// One instance per CLI invocation.
///
/// The credential store is opened on first use (which is also when the
/// machine key is derived) and never needs closing.
pub struct CloudAuth {
    config: CloudConfig,
    client: TokenClient,
    flow: AuthFlow,
    probe: Arc<dyn HostProbe>,
    store: OnceCell<Arc<CredentialStore>>,
}

impl CloudAuth {
    /// Live host probe and the desktop browser.
    pub fn new(config: CloudConfig) -> Self {
        Self::with_collaborators(config, Arc::new(SystemProbe), Arc::new(SystemBrowser))
    }

    pub fn with_collaborators(
        config: CloudConfig,
        probe: Arc<dyn HostProbe>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let client = TokenClient::new(&config);
        let flow = AuthFlow::new(config.clone(), client.clone(), browser);
        Self {
            config,
            client,
            flow,
            probe,
            store: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    async fn store(&self) -> Result<Arc<CredentialStore>, AuthError> {
        let store = self
            .store
            .get_or_try_init(|| async {
                let key = fingerprint::derive_key(self.probe.as_ref()).await?;
                let path = self.config.resolve_store_path()?;
                Ok::<_, AuthError>(Arc::new(CredentialStore::open(path, key)))
            })
            .await?;
        Ok(Arc::clone(store))
    }

    /// True iff an access token is stored. Expiry is not checked.
    pub async fn has_token(&self) -> Result<bool, AuthError> {
        Ok(self.store().await?.has("rcc.token.access_token"))
    }

    /// A usable access token, refreshing it when expired.
    ///
    /// Returns an empty string when nobody is logged in, or when the refresh
    /// grant answered without an access token. Callers must treat empty as
    /// "log in first".
    pub async fn get_token(&self) -> Result<String, AuthError> {
        let store = self.store().await?;
        let record = match store.auth_record() {
            Some(record) => record,
            None => return Ok(String::new()),
        };

        if !record.is_expired() {
            return Ok(record.token.access_token);
        }

        debug!(expired_at = %record.expires_at, "Access token expired, refreshing");
        let refreshed = self
            .client
            .refresh(&record.token.refresh_token, &record.token.scope)
            .await
            .map_err(|e| {
                warn!(
                    status = ?e.status(),
                    error_code = ?e.error_code(),
                    request_id = ?e.request_id(),
                    "Token refresh failed"
                );
                e
            })?;

        if refreshed.access_token.is_empty() {
            warn!("Refresh returned no access token");
            return Ok(String::new());
        }

        // Servers that do not rotate refresh tokens omit them
        let token = CloudToken {
            refresh_token: non_empty_or(refreshed.refresh_token, record.token.refresh_token),
            scope: non_empty_or(refreshed.scope, record.token.scope),
            ..refreshed
        };
        let expires_at = expiry_from_now(token.expires_in);
        store.update_token(&token, expires_at)?;

        info!(expires_at = %expires_at, "Refreshed cloud access token");
        Ok(token.access_token)
    }

    /// Runs the browser login; the record is persisted before this returns.
    pub async fn execute_auth_flow(&self) -> Result<String, AuthError> {
        let store = self.store().await?;
        let token = self.flow.execute(store).await?;
        info!("Cloud login complete");
        Ok(token)
    }

    /// Revokes the stored refresh token and deletes the record.
    ///
    /// A 401 from the revoke endpoint means the token was already invalid and
    /// counts as success.
    pub async fn revoke_token(&self) -> Result<(), AuthError> {
        let store = self.store().await?;
        let record = store.auth_record().ok_or(AuthError::NoAuthRecord)?;

        match self.client.revoke(&record.token.refresh_token).await {
            Ok(()) => info!("Revoked cloud token"),
            Err(e) if e.is_unauthorized() => {
                info!(
                    error_code = ?e.error_code(),
                    request_id = ?e.request_id(),
                    "Token already invalid, clearing local record"
                );
            }
            Err(e) => return Err(e),
        }

        store.clear_auth_record()
    }

    /// Stored login summary; None when logged out.
    pub async fn status(&self) -> Result<Option<TokenStatus>, AuthError> {
        let store = self.store().await?;
        Ok(store.auth_record().map(|record| TokenStatus {
            expired: record.is_expired(),
            expires_at: record.expires_at,
            scope: record.token.scope,
            token_type: record.token.token_type,
        }))
    }
}

fn non_empty_or(value: String, fallback: String) -> String {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}
