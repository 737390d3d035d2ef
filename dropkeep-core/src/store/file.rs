//! File-backed secret storage.
//!
//! Secrets live in a single JSON map. The file is rewritten in full on every
//! change: the new contents go to a sibling temp file which is then renamed
//! over the old one, so readers only ever see a complete map. Every operation
//! reads the file again, so handles opened on the same path see each other's
//! writes.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{Secret, SecretStore, StoreError};

type Entries = BTreeMap<String, Secret>;

/// Secret store persisted as a JSON file.
///
/// Intended for headless hosts without a keyring daemon. The file is created
/// with owner-only permissions on Unix.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// Fails if an existing file is not a valid secret map.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if path.exists() {
            parse(&std::fs::read_to_string(&path)?)?;
        }

        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Entries, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => parse(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, data: &Entries) -> Result<(), StoreError> {
        let contents = serde_json::to_vec_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");

        tokio::fs::write(&tmp, contents).await?;
        restrict_permissions(&tmp).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        Ok(())
    }
}

fn parse(contents: &str) -> Result<Entries, StoreError> {
    if contents.trim().is_empty() {
        return Ok(Entries::new());
    }
    Ok(serde_json::from_str(contents)?)
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl SecretStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut data = self.load().await?;
        data.insert(key.to_string(), secret.clone());
        self.persist(&data).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut data = self.load().await?;
        if data.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&data).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load()
            .await?
            .into_keys()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}
