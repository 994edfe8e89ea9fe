//! Error taxonomy for the credential lifecycle.

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the login, refresh and revoke operations.
///
/// Store corruption has no variant: an undecryptable store reads as empty.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Non-2xx response from the token or revoke endpoint.
    #[error("cloud request failed with status {status}: {body}")]
    Http { status: u16, body: Value },

    /// The request never produced a response (DNS, TLS, connection reset).
    #[error("cloud request could not be sent: {0}")]
    Transport(#[from] reqwest::Error),

    /// A host attribute needed for the store key could not be read.
    #[error("machine fingerprint unavailable: {0}")]
    FingerprintUnavailable(String),

    #[error("no stored cloud credentials (record \"rcc\" is missing)")]
    NoAuthRecord,

    /// Writing the credential file failed.
    #[error("credential store error: {0}")]
    Store(String),

    #[error("failed to bind callback listener on localhost:{port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open browser: {0}")]
    Browser(#[source] std::io::Error),

    /// The authorization server redirected back with `error=...`.
    #[error("authorization denied: {error}{}", describe(.description))]
    Authorization {
        error: String,
        description: Option<String>,
    },

    #[error("callback state is missing or does not match the authorization request")]
    StateMismatch,

    #[error("callback is missing the authorization code")]
    MissingCode,

    #[error("timed out after {0} seconds waiting for the browser redirect")]
    CallbackTimeout(u64),

    #[error("an authorization flow is already in progress")]
    FlowInProgress,

    /// The loopback listener failed after it was bound.
    #[error("callback listener failed: {0}")]
    Server(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

fn describe(description: &Option<String>) -> String {
    match description {
        Some(d) => format!(" ({d})"),
        None => String::new(),
    }
}

impl AuthError {
    /// HTTP status for `Http` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// OAuth `error` code from an `Http` error body, if the body was JSON.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            AuthError::Http { body, .. } => body.get("error").and_then(Value::as_str),
            _ => None,
        }
    }

    /// `requestId` the cloud attaches to failed responses.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            AuthError::Http { body, .. } => body.get("requestId").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_error_accessors() {
        let err = AuthError::Http {
            status: 400,
            body: json!({"error": "invalid_grant", "requestId": "req-42"}),
        };

        assert_eq!(err.status(), Some(400));
        assert_eq!(err.error_code(), Some("invalid_grant"));
        assert_eq!(err.request_id(), Some("req-42"));
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_raw_text_body_has_no_error_code() {
        let err = AuthError::Http {
            status: 502,
            body: Value::String("Bad Gateway".to_string()),
        };

        assert_eq!(err.error_code(), None);
        assert_eq!(err.request_id(), None);
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_authorization_display() {
        let err = AuthError::Authorization {
            error: "access_denied".to_string(),
            description: Some("User cancelled".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "authorization denied: access_denied (User cancelled)"
        );

        let err = AuthError::Authorization {
            error: "access_denied".to_string(),
            description: None,
        };
        assert_eq!(err.to_string(), "authorization denied: access_denied");
    }

    #[test]
    fn test_unauthorized_detection() {
        let err = AuthError::Http {
            status: 401,
            body: json!({}),
        };
        assert!(err.is_unauthorized());
        assert!(!AuthError::NoAuthRecord.is_unauthorized());
    }
}
