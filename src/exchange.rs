//! Form-encoded calls to the cloud token and revoke endpoints.

use crate::config::CloudConfig;
use crate::credentials::CloudToken;
use crate::error::AuthError;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Authorization code grant body
#[derive(Serialize)]
struct CodeGrant<'a> {
    grant_type: &'static str,
    redirect_uri: &'a str,
    client_id: &'a str,
    code: &'a str,
    code_verifier: &'a str,
}

/// Refresh token grant body
#[derive(Serialize)]
struct RefreshGrant<'a> {
    client_id: &'a str,
    refresh_token: &'a str,
    scope: &'a str,
    grant_type: &'static str,
    redirect_uri: &'a str,
}

#[derive(Serialize)]
struct RevokeRequest<'a> {
    client_id: &'a str,
    token: &'a str,
    token_type_hint: &'static str,
}

/// Client for the cloud OAuth endpoints.
#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    redirect_uri: String,
    token_path: &'static str,
    revoke_path: &'static str,
}

impl TokenClient {
    pub fn new(config: &CloudConfig) -> Self {
        Self::with_http(config, reqwest::Client::new())
    }

    pub fn with_http(config: &CloudConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri(),
            token_path: config.token_path(),
            revoke_path: config.revoke_path(),
        }
    }

    /// POSTs `payload` as `application/x-www-form-urlencoded` to
    /// `{base_url}{path}`.
    ///
    /// # Returns
    /// * `Ok(Value)` - Parsed JSON body; raw text as a string; `Null` if empty
    /// * `Err(AuthError::Http)` - Non-2xx, carrying status and body
    pub async fn post_form<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<Value, AuthError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST form");

        let response = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .form(payload)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body = parse_body(&text);

        if !status.is_success() {
            let err = AuthError::Http {
                status: status.as_u16(),
                body,
            };
            warn!(
                url = %url,
                status = status.as_u16(),
                error_code = ?err.error_code(),
                request_id = ?err.request_id(),
                "Cloud request failed"
            );
            return Err(err);
        }

        Ok(body)
    }

    /// Exchanges an authorization code (plus PKCE verifier) for tokens.
    ///
    /// `redirect_uri` must be the exact value sent in the authorization request.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<CloudToken, AuthError> {
        let payload = CodeGrant {
            grant_type: "authorization_code",
            redirect_uri,
            client_id: &self.client_id,
            code,
            code_verifier: verifier,
        };

        let body = self.post_form(self.token_path, &payload).await?;
        let token = parse_token(body)?;

        debug!(
            expires_in = token.expires_in,
            has_refresh_token = !token.refresh_token.is_empty(),
            "Authorization code exchanged"
        );
        Ok(token)
    }

    pub async fn refresh(&self, refresh_token: &str, scope: &str) -> Result<CloudToken, AuthError> {
        let payload = RefreshGrant {
            client_id: &self.client_id,
            refresh_token,
            scope,
            grant_type: "refresh_token",
            redirect_uri: &self.redirect_uri,
        };

        let body = self.post_form(self.token_path, &payload).await?;
        parse_token(body)
    }

    /// Revokes a refresh token. The success body is ignored.
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), AuthError> {
        let payload = RevokeRequest {
            client_id: &self.client_id,
            token: refresh_token,
            token_type_hint: "refresh_token",
        };

        self.post_form(self.revoke_path, &payload).await?;
        Ok(())
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// A 2xx body that is not a token object yields an empty token.
fn parse_token(body: Value) -> Result<CloudToken, AuthError> {
    match body {
        Value::Object(_) => serde_json::from_value(body).map_err(|e| AuthError::Http {
            status: 200,
            body: Value::String(format!("unparseable token response: {}", e)),
        }),
        _ => Ok(CloudToken::default()),
    }
}
