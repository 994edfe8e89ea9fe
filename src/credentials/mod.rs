//! Encrypted credential storage for the cloud login.
//!
//! The store is a single file holding one JSON object, sealed with
//! AES-256-GCM under the machine-derived key.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - key-path get/set/has/delete           │
//! │  - typed AuthRecord accessors            │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!     (seal)               (open)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Encryption Module                  │
//! │  - AES-256-GCM, fresh nonce per write    │
//! │  - nonce || tag || ciphertext, base64    │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Store file (0600)                  │
//! │  - atomic replace on every write         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use rcc_auth::credentials::{AuthRecord, CloudToken, CredentialStore};
//!
//! # fn main() -> Result<(), rcc_auth::AuthError> {
//! let key = [0u8; 32]; // normally rcc_auth::fingerprint::derive_key
//! let store = CredentialStore::open("/tmp/rcc/credentials", key);
//!
//! let token = CloudToken {
//!     access_token: "at".to_string(),
//!     expires_in: 3600,
//!     scope: "offline_access".to_string(),
//!     refresh_token: "rt".to_string(),
//!     token_type: "Bearer".to_string(),
//! };
//! store.set_auth_record(&AuthRecord::issued_now(token))?;
//!
//! assert!(store.has("rcc.token.access_token"));
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - The key never touches disk; it is recomputed from host attributes
//! - A store that fails to decrypt or parse reads as empty
//! - No cross-process locking: concurrent writers race, last one wins

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod storage;

pub use storage::CredentialStore;

// Re-export encryption functions for testing/utilities
pub use encryption::{open, seal, KEY_SIZE};

/// Store key reserved for the [`AuthRecord`].
pub const RECORD_KEY: &str = "rcc";

/// Key path of the record's expiry timestamp.
pub const EXPIRES_AT_KEY: &str = "rcc.expiresAt";

/// Token set returned by the cloud token endpoint.
///
/// Every field defaults so a sparse refresh response still parses; an empty
/// `access_token` means the endpoint yielded nothing usable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudToken {
    #[serde(default)]
    pub access_token: String,

    /// Lifetime in seconds from the moment of issue
    #[serde(default)]
    pub expires_in: i64,

    #[serde(default)]
    pub scope: String,

    #[serde(default)]
    pub refresh_token: String,

    #[serde(default)]
    pub token_type: String,
}

/// The persisted login: current tokens plus their absolute expiry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    pub token: CloudToken,

    /// Issue time + `expires_in`, stored as an RFC 3339 string
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

impl AuthRecord {
    pub fn issued_now(token: CloudToken) -> Self {
        Self {
            expires_at: expiry_from_now(token.expires_in),
            token,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Upper bound on a token lifetime taken from the server (ten years).
pub const MAX_LIFETIME_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// Absolute expiry for a lifetime in seconds.
///
/// `expires_in` comes straight from the token endpoint, so it is clamped to
/// `±MAX_LIFETIME_SECONDS` and never panics.
pub fn expiry_from_now(expires_in: i64) -> DateTime<Utc> {
    let now = Utc::now();
    let lifetime = expires_in.clamp(-MAX_LIFETIME_SECONDS, MAX_LIFETIME_SECONDS);
    Duration::try_seconds(lifetime)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now)
}
