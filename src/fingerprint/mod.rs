//! Machine-bound key derivation for the credential store.
//!
//! The store key is never written anywhere. It is SHA-256 over a string of
//! host attributes, recomputed on every run:
//!
//! ```text
//! manufacturer | uuid | logical cpus | cpu vendor | total memory | platform | release
//! ```
//!
//! Identical hardware/OS state yields the identical key. Any change to these
//! attributes (new motherboard, RAM upgrade, kernel update) makes the existing
//! store unreadable, which the store treats as "not logged in".

mod probe;

pub use probe::SystemProbe;

use crate::error::AuthError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Separator between attributes in the fingerprint string.
const DELIMITER: &str = "|";

/// Host attributes that feed the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAttributes {
    pub manufacturer: String,
    pub uuid: String,
    pub logical_cpus: usize,
    pub cpu_vendor: String,
    pub total_memory: u64,
    pub platform: String,
    pub release: String,
}

impl HostAttributes {
    /// Deterministic fingerprint string, attributes in fixed order.
    pub fn fingerprint(&self) -> String {
        [
            self.manufacturer.clone(),
            self.uuid.clone(),
            self.logical_cpus.to_string(),
            self.cpu_vendor.clone(),
            self.total_memory.to_string(),
            self.platform.clone(),
            self.release.clone(),
        ]
        .join(DELIMITER)
    }
}

/// Source of host attributes.
#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn attributes(&self) -> Result<HostAttributes, AuthError>;
}

/// 32-byte AES key for this machine.
///
/// Fails with `FingerprintUnavailable` when the probe cannot read the host;
/// there is no fallback key.
pub async fn derive_key(probe: &dyn HostProbe) -> Result<[u8; 32], AuthError> {
    let attributes = probe.attributes().await?;
    tracing::debug!(
        platform = %attributes.platform,
        logical_cpus = attributes.logical_cpus,
        "Derived machine fingerprint"
    );
    Ok(key_from_attributes(&attributes))
}

pub fn key_from_attributes(attributes: &HostAttributes) -> [u8; 32] {
    Sha256::digest(attributes.fingerprint().as_bytes()).into()
}
