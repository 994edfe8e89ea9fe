//! One-shot loopback listener for the OAuth redirect.
//!
//! Lifecycle:
//! 1. `CallbackServer::start` binds `127.0.0.1:{port}` → `Listening`
//! 2. The browser hits `GET /callback?code=...&state=...`
//! 3. The handler exchanges the code, persists the record, answers with a
//!    short HTML page and settles the flow → `CallbackReceived`
//! 4. The server is stopped on every exit path (`stop` or `Drop`) → `Stopped`
//!
//! Any other path returns 404. A listener failure settles the flow with
//! `AuthError::Server` → `ServerError`. Only the first settlement counts.
//!
//! The redirect must echo the `state` sent in the authorization URL. A
//! missing or different value fails the flow before any other parameter is
//! looked at.

mod settlement;

pub use settlement::Settlement;

use crate::credentials::{AuthRecord, CredentialStore};
use crate::error::AuthError;
use crate::exchange::TokenClient;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome delivered to the waiting flow: the new access token.
pub type FlowOutcome = Result<String, AuthError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening,
    CallbackReceived,
    ServerError,
    Stopped,
}

/// Redirect query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// What the handler needs to finish the login mid-request.
pub struct CallbackContext {
    pub client: TokenClient,
    pub store: Arc<CredentialStore>,
    pub verifier: String,
    pub expected_state: String,
}

struct Shared {
    ctx: CallbackContext,
    redirect_uri: String,
    settlement: Settlement<FlowOutcome>,
    /// Set once this listener's own callback settled the flow with a token
    signed_in: AtomicBool,
    state: Mutex<ServerState>,
}

impl Shared {
    fn set_state(&self, next: ServerState) {
        if let Ok(mut state) = self.state.lock() {
            // Stopped is terminal
            if *state != ServerState::Stopped {
                *state = next;
            }
        }
    }

    fn state(&self) -> ServerState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ServerState::ServerError)
    }
}

/// Running loopback listener. Dropping it shuts the listener down.
pub struct CallbackServer {
    port: u16,
    shared: Arc<Shared>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Binds the listener and starts serving.
    ///
    /// Returns once the socket is bound, so the caller may open the browser
    /// immediately. The receiver yields the flow outcome exactly once.
    pub async fn start(
        port: u16,
        ctx: CallbackContext,
    ) -> Result<(Self, oneshot::Receiver<FlowOutcome>), AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| AuthError::Bind { port, source })?;
        let port = listener
            .local_addr()
            .map_err(|source| AuthError::Bind { port, source })?
            .port();

        let (settlement, outcome) = Settlement::new();
        let shared = Arc::new(Shared {
            ctx,
            redirect_uri: format!("http://localhost:{}/callback", port),
            settlement,
            signed_in: AtomicBool::new(false),
            state: Mutex::new(ServerState::Idle),
        });

        let router = Router::new()
            .route("/callback", get(handle_callback))
            .fallback(not_found)
            .with_state(Arc::clone(&shared));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serve_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;

            if let Err(e) = result {
                error!(error = %e, "Callback listener failed");
                serve_shared.set_state(ServerState::ServerError);
                if !serve_shared
                    .settlement
                    .settle(Err(AuthError::Server(e.to_string())))
                {
                    debug!("Listener error after flow already settled, ignoring");
                }
            }
        });

        shared.set_state(ServerState::Listening);
        info!(port, "Callback listener ready");

        Ok((
            Self {
                port,
                shared,
                shutdown: Some(shutdown_tx),
                task: Some(task),
            },
            outcome,
        ))
    }

    /// Bound port (differs from the requested one only when 0 was requested).
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    /// Redirect URI pointing at this listener.
    pub fn redirect_uri(&self) -> &str {
        &self.shared.redirect_uri
    }

    /// Settles the flow with a failure unless it already settled.
    ///
    /// Used by the controller for failures outside the listener (browser
    /// launch, timeout). Returns whether this call won.
    pub fn fail(&self, err: AuthError) -> bool {
        self.shared.settlement.settle(Err(err))
    }

    /// Graceful stop; waits for in-flight responses to be written.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Callback listener task did not exit cleanly");
            }
        }
        self.shared.set_state(ServerState::Stopped);
        debug!(port = self.port, "Callback listener stopped");
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.shared.set_state(ServerState::Stopped);
    }
}

/// GET /callback
async fn handle_callback(
    State(shared): State<Arc<Shared>>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<String>) {
    if shared.settlement.is_settled() {
        debug!("Callback hit after the flow settled");
        return late_page(shared.signed_in.load(Ordering::Acquire));
    }

    shared.set_state(ServerState::CallbackReceived);
    let result = complete(&shared.ctx, &shared.redirect_uri, params).await;

    let response = match &result {
        Ok(_) => page(
            StatusCode::OK,
            "Login successful",
            "You are now signed in. You can close this window and return to the terminal.",
        ),
        Err(e) => {
            warn!(error = %e, "Callback failed");
            page(
                StatusCode::BAD_REQUEST,
                "Login failed",
                &format!("{}. Close this window and run the login again.", e),
            )
        }
    };

    let succeeded = result.is_ok();
    if !shared.settlement.settle(result) {
        debug!("Callback completed after the flow settled, outcome discarded");
    } else if succeeded {
        shared.signed_in.store(true, Ordering::Release);
    }
    response
}

/// Page for a callback that arrives once the flow is already over.
fn late_page(signed_in: bool) -> (StatusCode, Html<String>) {
    if signed_in {
        page(
            StatusCode::OK,
            "Already signed in",
            "This login has already completed. You can close this window.",
        )
    } else {
        page(
            StatusCode::GONE,
            "Login attempt ended",
            "This login attempt has ended. Run the login again from the terminal.",
        )
    }
}

/// Validates the redirect, exchanges the code and stores the new record.
async fn complete(ctx: &CallbackContext, redirect_uri: &str, params: CallbackParams) -> FlowOutcome {
    match params.state.as_deref() {
        Some(state) if state == ctx.expected_state => {}
        Some(_) => {
            warn!("Callback state mismatch");
            return Err(AuthError::StateMismatch);
        }
        None => {
            warn!("Callback carries no state");
            return Err(AuthError::StateMismatch);
        }
    }

    if let Some(error) = params.error {
        return Err(AuthError::Authorization {
            error,
            description: params.error_description,
        });
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(AuthError::MissingCode)?;

    let token = ctx
        .client
        .exchange_code(&code, &ctx.verifier, redirect_uri)
        .await
        .map_err(|e| {
            error!(
                status = ?e.status(),
                error_code = ?e.error_code(),
                request_id = ?e.request_id(),
                "Authorization code exchange failed"
            );
            e
        })?;

    let record = AuthRecord::issued_now(token);
    ctx.store.set_auth_record(&record)?;

    info!(expires_at = %record.expires_at, "Stored new cloud credentials");
    Ok(record.token.access_token)
}

async fn not_found() -> (StatusCode, Html<String>) {
    page(StatusCode::NOT_FOUND, "Not found", "Nothing to see here.")
}

fn page(status: StatusCode, title: &str, message: &str) -> (StatusCode, Html<String>) {
    (
        status,
        Html(format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
             <body><h1>{title}</h1><p>{message}</p></body></html>",
            title = escape(title),
            message = escape(message),
        )),
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
