//! Persisted client state: access token, refresh token, display name.
//!
//! The store is shared process-wide. The credential gate writes the access
//! token; everything else only reads. Writes are last-write-wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub const ACCESS_KEY: &str = "access";
pub const REFRESH_KEY: &str = "refresh";
pub const USERNAME_KEY: &str = "username";
pub const DEFAULT_USERNAME: &str = "Guest";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("credential store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential store is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

pub trait CredentialStore: Send + Sync {
    /// Read `key`. Missing keys are `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backing storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backing storage cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Propagates [`CredentialStore::get`] failures.
    fn access_token(&self) -> Result<Option<String>, StoreError> {
        Ok(self.get(ACCESS_KEY)?.filter(|t| !t.is_empty()))
    }

    /// # Errors
    ///
    /// Propagates [`CredentialStore::get`] failures.
    fn refresh_token(&self) -> Result<Option<String>, StoreError> {
        Ok(self.get(REFRESH_KEY)?.filter(|t| !t.is_empty()))
    }

    /// # Errors
    ///
    /// Propagates [`CredentialStore::set`] failures.
    fn set_access_token(&self, token: &str) -> Result<(), StoreError> {
        self.set(ACCESS_KEY, token)
    }

    /// Display name for outbound messages; [`DEFAULT_USERNAME`] when unset,
    /// empty, or unreadable.
    fn username(&self) -> String {
        match self.get(USERNAME_KEY) {
            Ok(Some(name)) if !name.is_empty() => name,
            Ok(_) => DEFAULT_USERNAME.to_owned(),
            Err(e) => {
                tracing::warn!(error = %e, "username unreadable; using default");
                DEFAULT_USERNAME.to_owned()
            }
        }
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = values.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { values: RwLock::new(values) }
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

// =============================================================================
// FILE STORE
// =============================================================================

/// JSON object on disk, re-read on every access so other processes' writes
/// are picked up. A missing file reads as empty.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: std::sync::Mutex<()>,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: std::sync::Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(HashMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut values = self.load()?;
        values.insert(key.to_owned(), value.to_owned());

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
