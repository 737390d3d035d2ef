//! Secret storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for secret storage backends
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`FileStore`] - JSON file in the platform data directory
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select a backend from configuration
//!
//! # Storage Key Convention
//!
//! Keys follow the pattern: `dropkeep/{target}/{entry}`
//!
//! # Example
//!
//! ```rust,ignore
//! use dropkeep_core::store::{Secret, SecretStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.set("dropkeep/default/token", &Secret::new("{...}")).await.unwrap();
//!
//! let retrieved = store.get("dropkeep/default/token").await.unwrap();
//! assert_eq!(retrieved.unwrap().expose(), "{...}");
//! ```

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Whether the wrapped value is empty.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for secret store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O error reading or writing a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Abstraction over secret storage backends.
///
/// Implementations include:
/// - [`MemoryStore`] - In-memory storage for testing
/// - [`FileStore`] - JSON file that survives restarts on headless hosts
/// - [`KeyringStore`] (with `keyring-store` feature) - OS keyring
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete a secret by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List all keys matching a prefix.
    ///
    /// Returns an empty vec if no keys match.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Which backend [`create_store`] should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// JSON file under the data directory.
    #[default]
    File,
    /// OS keyring, falling back to the file store when unavailable.
    Keyring,
    /// Process-local, lost on exit.
    Memory,
}

/// Create a secret store for the requested backend.
///
/// # Backend Selection Logic
///
/// - `File`: a [`FileStore`] at `{data_dir}/secrets.json`
/// - `Keyring`: a [`KeyringStore`] if the feature is enabled and the platform
///   keyring is reachable, otherwise the `File` store with a warning
/// - `Memory`: [`MemoryStore`]
pub fn create_store(
    backend: StoreBackend,
    data_dir: &Path,
) -> Result<Box<dyn SecretStore>, StoreError> {
    match backend {
        StoreBackend::File => open_file_store(data_dir),
        StoreBackend::Keyring => {
            #[cfg(feature = "keyring-store")]
            let keyring = KeyringStore::try_new("dropkeep");
            #[cfg(not(feature = "keyring-store"))]
            let keyring: Result<MemoryStore, StoreError> = Err(StoreError::KeyringUnavailable {
                message: "keyring-store feature not enabled".to_string(),
            });

            keyring_or_file(keyring, data_dir)
        }
        StoreBackend::Memory => {
            tracing::debug!("Using in-memory secret storage");
            Ok(Box::new(MemoryStore::new()))
        }
    }
}

fn open_file_store(data_dir: &Path) -> Result<Box<dyn SecretStore>, StoreError> {
    let path = data_dir.join("secrets.json");
    tracing::debug!("Using file secret storage at {:?}", path);
    Ok(Box::new(FileStore::open(path)?))
}

/// Use the keyring if it opened, otherwise the durable file store.
///
/// Never falls back to memory; the refresh token has to outlive the process.
fn keyring_or_file<K: SecretStore + 'static>(
    keyring: Result<K, StoreError>,
    data_dir: &Path,
) -> Result<Box<dyn SecretStore>, StoreError> {
    match keyring {
        Ok(store) => {
            tracing::info!("Using OS keyring for secret storage");
            Ok(Box::new(store))
        }
        Err(e) => {
            tracing::warn!("Keyring unavailable ({}), falling back to file store", e);
            open_file_store(data_dir)
        }
    }
}

#[async_trait]
impl<T: SecretStore + ?Sized> SecretStore for Box<T> {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        (**self).set(key, secret).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).list_keys(prefix).await
    }
}
