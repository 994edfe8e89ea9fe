//! File-backed encrypted key/value store.
//!
//! Holds one JSON object in memory and rewrites the whole sealed file on
//! every mutation. Keys are dotted paths into nested objects
//! (`"rcc.token.access_token"`).

use super::{encryption, AuthRecord, CloudToken, RECORD_KEY};
use crate::error::AuthError;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Encrypted credential store backed by a single file.
///
/// # Failure policy
/// Reading never fails. A missing file, a file sealed under another key, a
/// truncated or tampered file and a blob that is not a JSON object all load
/// as an empty store. Writes do fail, with [`AuthError::Store`].
///
/// # Thread Safety
/// - The map is wrapped in a Mutex; each mutation persists while holding it
/// - No cross-process lock (last writer wins)
pub struct CredentialStore {
    path: PathBuf,
    key: [u8; 32],
    data: Mutex<Map<String, Value>>,
}

impl CredentialStore {
    /// Opens the store at `path`, loading whatever is readable.
    ///
    /// No file handle is kept open after this returns.
    pub fn open<P: AsRef<Path>>(path: P, key: [u8; 32]) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = load(&path, &key);

        tracing::debug!(
            path = %path.display(),
            entries = data.len(),
            "Opened credential store"
        );

        Self {
            path,
            key,
            data: Mutex::new(data),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value at a key path, or None.
    pub fn get(&self, key_path: &str) -> Option<Value> {
        let data = self.lock().ok()?;
        lookup(&data, key_path).cloned()
    }

    pub fn has(&self, key_path: &str) -> bool {
        self.get(key_path).is_some()
    }

    /// Sets a value at a key path, creating intermediate objects.
    pub fn set(&self, key_path: &str, value: Value) -> Result<(), AuthError> {
        self.mutate(|data| insert(data, key_path, value))
    }

    /// Removes a key path. Removing an absent path still rewrites the file.
    pub fn delete(&self, key_path: &str) -> Result<(), AuthError> {
        self.mutate(|data| {
            remove(data, key_path);
        })
    }

    /// Timestamp stored as an RFC 3339 string at `key_path`.
    pub fn get_date(&self, key_path: &str) -> Option<DateTime<Utc>> {
        match self.get(key_path)? {
            Value::String(s) => DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// The stored login, if present and well-formed.
    pub fn auth_record(&self) -> Option<AuthRecord> {
        let value = self.get(RECORD_KEY)?;
        match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, "Stored auth record is malformed, ignoring it");
                None
            }
        }
    }

    /// Replaces the whole record.
    pub fn set_auth_record(&self, record: &AuthRecord) -> Result<(), AuthError> {
        let value = serde_json::to_value(record)
            .map_err(|e| AuthError::Store(format!("Failed to serialize auth record: {}", e)))?;
        self.set(RECORD_KEY, value)
    }

    /// Partial update after a refresh: the four rotating token fields and the
    /// expiry, in one write. `token_type` is left as stored.
    pub fn update_token(
        &self,
        token: &CloudToken,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        self.mutate(|data| {
            insert(data, "rcc.token.access_token", Value::from(token.access_token.as_str()));
            insert(data, "rcc.token.expires_in", Value::from(token.expires_in));
            insert(data, "rcc.token.scope", Value::from(token.scope.as_str()));
            insert(data, "rcc.token.refresh_token", Value::from(token.refresh_token.as_str()));
            insert(data, super::EXPIRES_AT_KEY, Value::from(expires_at.to_rfc3339()));
        })
    }

    pub fn clear_auth_record(&self) -> Result<(), AuthError> {
        self.delete(RECORD_KEY)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Map<String, Value>>, AuthError> {
        self.data
            .lock()
            .map_err(|_| AuthError::Store("credential store lock poisoned".to_string()))
    }

    fn mutate<F>(&self, f: F) -> Result<(), AuthError>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let mut data = self.lock()?;
        f(&mut data);
        self.persist(&data)
    }

    /// Seals the map and atomically replaces the file (0600 on unix).
    fn persist(&self, data: &Map<String, Value>) -> Result<(), AuthError> {
        let json = serde_json::to_vec(data)
            .map_err(|e| AuthError::Store(format!("Failed to serialize store: {}", e)))?;
        let sealed = encryption::seal(&json, &self.key)
            .map_err(|e| AuthError::Store(format!("Failed to encrypt store: {}", e)))?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| {
            AuthError::Store(format!("Failed to create {}: {}", parent.display(), e))
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| AuthError::Store(format!("Failed to create temp file: {}", e)))?;
        restrict_permissions(tmp.path())?;
        tmp.write_all(sealed.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| AuthError::Store(format!("Failed to write store: {}", e)))?;
        tmp.persist(&self.path).map_err(|e| {
            AuthError::Store(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        tracing::debug!(path = %self.path.display(), entries = data.len(), "Persisted credential store");
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), AuthError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| AuthError::Store(format!("Failed to set permissions: {}", e)))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), AuthError> {
    // Per-user profile directories are already owner-only on Windows
    Ok(())
}

/// Reads and unseals the store file; anything unreadable is an empty map.
fn load(path: &Path, key: &[u8; 32]) -> Map<String, Value> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Credential store unreadable, starting empty");
            return Map::new();
        }
    };

    let plaintext = match encryption::open(&contents, key) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Credential store could not be decrypted, starting empty");
            return Map::new();
        }
    };

    match serde_json::from_slice::<Value>(&plaintext) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            tracing::warn!(path = %path.display(), "Credential store is not a JSON object, starting empty");
            Map::new()
        }
    }
}

fn lookup<'a>(data: &'a Map<String, Value>, key_path: &str) -> Option<&'a Value> {
    let mut segments = key_path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn insert(data: &mut Map<String, Value>, key_path: &str, value: Value) {
    let segments: Vec<&str> = key_path.split('.').collect();
    let (leaf, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = data;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(leaf.to_string(), value);
}

fn remove(data: &mut Map<String, Value>, key_path: &str) {
    let segments: Vec<&str> = key_path.split('.').collect();
    let (leaf, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = data;
    for segment in parents {
        current = match current.get_mut(*segment) {
            Some(Value::Object(map)) => map,
            _ => return,
        };
    }
    current.remove(*leaf);
}
