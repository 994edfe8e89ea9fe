// Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use rcc_auth::credentials::{AuthRecord, CloudToken, CredentialStore};
use rcc_auth::fingerprint::{key_from_attributes, HostAttributes, HostProbe};
use rcc_auth::flow::BrowserLauncher;
use rcc_auth::{AuthError, CloudAuth, CloudConfig};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn host() -> HostAttributes {
    HostAttributes {
        manufacturer: "Framework".to_string(),
        uuid: "0b2f4c3e-8a1d-4e55-9f0e-1c2d3e4f5a6b".to_string(),
        logical_cpus: 16,
        cpu_vendor: "AuthenticAMD".to_string(),
        total_memory: 33_554_432_000,
        platform: "linux".to_string(),
        release: "6.9.3".to_string(),
    }
}

/// Probe that always reports the same machine.
pub struct FixedProbe(pub HostAttributes);

#[async_trait]
impl HostProbe for FixedProbe {
    async fn attributes(&self) -> Result<HostAttributes, AuthError> {
        Ok(self.0.clone())
    }
}

/// Browser that never navigates anywhere.
pub struct IdleBrowser {
    pub opened: Mutex<Vec<String>>,
}

impl IdleBrowser {
    pub fn new() -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BrowserLauncher for IdleBrowser {
    async fn open(&self, url: &str) -> Result<(), AuthError> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join("rcc").join("credentials")
    }

    pub fn config(&self, cloud_url: &str) -> CloudConfig {
        CloudConfig {
            base_url: cloud_url.to_string(),
            client_id: "test-client".to_string(),
            scope: "offline_access".to_string(),
            callback_port: 0,
            store_path: Some(self.store_path()),
            callback_timeout_seconds: 5,
            ..CloudConfig::default()
        }
    }

    pub fn auth(&self, cloud_url: &str, browser: Arc<dyn BrowserLauncher>) -> CloudAuth {
        CloudAuth::with_collaborators(self.config(cloud_url), Arc::new(FixedProbe(host())), browser)
    }

    /// The store as the CLI would see it on this machine.
    pub fn store(&self) -> CredentialStore {
        CredentialStore::open(self.store_path(), key_from_attributes(&host()))
    }

    pub fn seed(&self, expires_in: i64) -> AuthRecord {
        let record = AuthRecord::issued_now(CloudToken {
            access_token: "cached-access".to_string(),
            expires_in,
            scope: "offline_access".to_string(),
            refresh_token: "stored-refresh".to_string(),
            token_type: "Bearer".to_string(),
        });
        self.store().set_auth_record(&record).unwrap();
        record
    }
}
