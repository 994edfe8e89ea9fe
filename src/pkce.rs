//! PKCE verifier/challenge generation for the authorization code flow.

use crate::config::PkceMethod;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Verifier/challenge pair scoped to one authorization attempt. Never persisted.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate(method: PkceMethod) -> Self {
        let verifier = new_verifier();
        let challenge = match method {
            PkceMethod::S256 => challenge(&verifier),
            PkceMethod::Legacy => legacy_challenge(&verifier),
        };
        Self { verifier, challenge }
    }
}

/// Two concatenated v4 UUIDs: 72 characters from the unreserved set.
pub fn new_verifier() -> String {
    format!("{}{}", Uuid::new_v4(), Uuid::new_v4())
}

/// S256 challenge: base64url(sha256(verifier)) without padding.
pub fn challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Challenge as computed by the older CLI, which hashed the base64 form of
/// the verifier instead of its bytes.
pub fn legacy_challenge(verifier: &str) -> String {
    let encoded = STANDARD.encode(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(Sha256::digest(encoded.as_bytes()))
}
