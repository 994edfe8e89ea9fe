//! Authorization Code + PKCE login orchestration.
//!
//! Ordering matters: the loopback listener is bound before the browser is
//! opened, so a fast redirect can never arrive at a closed port.

use crate::callback::{CallbackContext, CallbackServer};
use crate::config::CloudConfig;
use crate::credentials::CredentialStore;
use crate::error::AuthError;
use crate::exchange::TokenClient;
use crate::pkce::PkcePair;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opens a URL for the user.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open(&self, url: &str) -> Result<(), AuthError>;
}

/// The desktop default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

#[async_trait]
impl BrowserLauncher for SystemBrowser {
    async fn open(&self, url: &str) -> Result<(), AuthError> {
        let url = url.to_string();
        tokio::task::spawn_blocking(move || webbrowser::open(&url))
            .await
            .map_err(|e| AuthError::Browser(std::io::Error::other(e)))?
            .map_err(AuthError::Browser)
    }
}

/// Authorization request parameters, in the order they are sent.
pub struct AuthorizeRequest<'a> {
    pub client_id: &'a str,
    pub scope: &'a str,
    pub redirect_uri: &'a str,
    pub state: &'a str,
    pub code_challenge: &'a str,
}

impl AuthorizeRequest<'_> {
    /// `{authorize_url}?client_id=..&response_type=code&...&code_challenge=..`
    pub fn url(&self, authorize_url: &str) -> String {
        format!(
            "{}?client_id={}&response_type=code&scope={}&redirect_uri={}&state={}&code_challenge_method=S256&code_challenge={}",
            authorize_url,
            urlencoding::encode(self.client_id),
            urlencoding::encode(self.scope),
            urlencoding::encode(self.redirect_uri),
            urlencoding::encode(self.state),
            urlencoding::encode(self.code_challenge)
        )
    }
}

/// Runs the browser login. One flow at a time per instance.
pub struct AuthFlow {
    config: CloudConfig,
    client: TokenClient,
    browser: Arc<dyn BrowserLauncher>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AuthFlow {
    pub fn new(config: CloudConfig, client: TokenClient, browser: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            config,
            client,
            browser,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Logs the user in and returns the new access token.
    ///
    /// On success the record is already persisted in `store` by the callback
    /// handler. The listener is torn down before this returns, whatever the
    /// outcome.
    pub async fn execute(&self, store: Arc<CredentialStore>) -> Result<String, AuthError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AuthError::FlowInProgress);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let pkce = PkcePair::generate(self.config.pkce_method);
        let state = Uuid::new_v4().to_string();

        let ctx = CallbackContext {
            client: self.client.clone(),
            store,
            verifier: pkce.verifier,
            expected_state: state.clone(),
        };
        let (server, mut outcome) = CallbackServer::start(self.config.callback_port, ctx).await?;

        let authorize_url = AuthorizeRequest {
            client_id: &self.config.client_id,
            scope: &self.config.scope,
            redirect_uri: server.redirect_uri(),
            state: &state,
            code_challenge: &pkce.challenge,
        }
        .url(&self.config.authorize_url());

        info!("Opening browser for cloud login");
        debug!(url = %authorize_url, "Authorization URL");

        if let Err(e) = self.browser.open(&authorize_url).await {
            warn!(error = %e, "Browser launch failed");
            server.fail(e);
        }

        // Whichever path settled first is what comes out of the receiver
        let received = match self.wait_timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut outcome).await {
                Ok(received) => received,
                Err(_) => {
                    server.fail(AuthError::CallbackTimeout(limit.as_secs()));
                    outcome.await
                }
            },
            None => outcome.await,
        };

        server.stop().await;

        received.unwrap_or_else(|_| {
            Err(AuthError::Server(
                "listener stopped before the callback arrived".to_string(),
            ))
        })
    }

    fn wait_timeout(&self) -> Option<Duration> {
        match self.config.callback_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
