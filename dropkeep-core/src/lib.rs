//! # Dropkeep Core
//!
//! Durable, auto-refreshing Dropbox OAuth2 credentials and a thin storage
//! adapter built on them.
//!
//! This crate provides:
//! - [`Token`] and the [`TokenStore`] that persists the current one
//! - [`ExchangeClient`] for authorization-code and refresh-token grants
//! - [`CredentialManager`], which hands out a usable token and owns refresh
//! - [`StorageFacade`], which turns file URIs into Dropbox calls or public links
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dropkeep_core::{Settings, MemoryStore, provider::ProviderConfig};
//!
//! let settings = Settings::load(None)?;
//! let exchange = Arc::new(settings.exchange_client(ProviderConfig::dropbox())?);
//! let manager = settings.credential_manager(MemoryStore::new(), exchange);
//!
//! let token = manager.acquire_token().await?;
//! ```

pub mod config;
pub mod credential_manager;
pub mod error;
pub mod exchange;
pub mod provider;
pub mod storage;
pub mod store;
pub mod token;
pub mod token_store;

pub use config::{ConfigError, Settings, StorageConfig};

pub use credential_manager::CredentialManager;

pub use error::{AuthError, DropkeepError, StorageError};

pub use exchange::{ExchangeClient, ExchangeError, Grant, OAuth2ExchangeClient};

pub use storage::{
    DropboxClient,
    FileAdapter,
    Location,
    Materializer,
    MissingAdapter,
    NoopMaterializer,
    Operation,
    OperationOutput,
    RemoteStorage,
    StorageFacade,
};

pub use store::{
    FileStore,
    MemoryStore,
    Secret,
    SecretStore,
    StoreBackend,
    StoreError,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use token::{Token, TokenSummary};

pub use token_store::{SecretTokenStore, TokenStore};
