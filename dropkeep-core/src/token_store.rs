//! Durable storage of the current token for one credential target.

use async_trait::async_trait;

use crate::store::{Secret, SecretStore, StoreError};
use crate::token::Token;

/// Persistence for "the current token" of a single credential target.
///
/// `set` is a full overwrite with last-writer-wins semantics. Callers that
/// need read-check-write consistency must serialize themselves; the
/// [`CredentialManager`](crate::CredentialManager) does.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Read the stored token, if any.
    async fn get(&self) -> Result<Option<Token>, StoreError>;

    /// Replace the stored token.
    async fn set(&self, token: &Token) -> Result<(), StoreError>;
}

/// Storage key for a target's token entry.
pub fn token_key(target: &str) -> String {
    format!("dropkeep/{}/token", target)
}

/// [`TokenStore`] that keeps the token as JSON inside a [`SecretStore`].
pub struct SecretTokenStore<S> {
    store: S,
    key: String,
}

impl<S: SecretStore> SecretTokenStore<S> {
    /// Bind `store` to the entry for `target`.
    pub fn new(store: S, target: &str) -> Self {
        Self {
            store,
            key: token_key(target),
        }
    }

    /// The key this store reads and writes.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Access the underlying secret store.
    pub fn inner(&self) -> &S {
        &self.store
    }
}

impl<S> std::fmt::Debug for SecretTokenStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretTokenStore")
            .field("key", &self.key)
            .finish()
    }
}

#[async_trait]
impl<S: SecretStore> TokenStore for SecretTokenStore<S> {
    async fn get(&self) -> Result<Option<Token>, StoreError> {
        match self.store.get(&self.key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(raw.expose())?)),
            None => Ok(None),
        }
    }

    async fn set(&self, token: &Token) -> Result<(), StoreError> {
        let raw = serde_json::to_string(token)?;
        self.store.set(&self.key, &Secret::new(raw)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;

    #[tokio::test]
    async fn test_absent_until_set() {
        let store = SecretTokenStore::new(MemoryStore::new(), "default");
        assert!(store.get().await.unwrap().is_none());

        let token = Token::from_ttl("a", Duration::hours(4)).with_refresh_token("r");
        store.set(&token).await.unwrap();

        assert_eq!(store.get().await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn test_set_replaces_whole_entry() {
        let store = SecretTokenStore::new(MemoryStore::new(), "default");

        store
            .set(&Token::new("a").with_refresh_token("r"))
            .await
            .unwrap();
        store.set(&Token::new("b")).await.unwrap();

        let stored = store.get().await.unwrap().unwrap();
        assert_eq!(stored.access_token.expose(), "b");
        assert!(stored.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_targets_are_isolated() {
        let site = SecretTokenStore::new(MemoryStore::new(), "site");
        assert_eq!(site.key(), "dropkeep/site/token");

        site.set(&Token::new("a")).await.unwrap();
        let keys = site.inner().list_keys("dropkeep/").await.unwrap();
        assert_eq!(keys, vec!["dropkeep/site/token"]);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_an_error() {
        let secrets = MemoryStore::new();
        secrets
            .set(&token_key("default"), &Secret::new("not json"))
            .await
            .unwrap();

        let store = SecretTokenStore::new(secrets, "default");
        assert!(matches!(
            store.get().await,
            Err(StoreError::SerializationError(_))
        ));
    }
}
