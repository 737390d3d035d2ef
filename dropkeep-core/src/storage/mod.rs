//! Storage adapter facade.
//!
//! This module provides:
//! - [`RemoteStorage`] - Trait for the remote file API, called with an explicit token
//! - [`DropboxClient`] - Dropbox implementation of [`RemoteStorage`]
//! - [`StorageFacade`] - Resolves file URIs to remote operations or public links
//! - [`FileAdapter`] - What the facade hands to file-access code:
//!   [`RemoteAdapter`] when credentials work, [`MissingAdapter`] when they don't
//!
//! File URIs look like `dropbox://images/photo.jpg`. The part after the
//! scheme is the *target*; the remote path is the target under the
//! configured prefix.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::StorageConfig;
use crate::credential_manager::CredentialManager;
use crate::error::StorageError;
use crate::token::Token;

mod dropbox;
mod link;

pub use dropbox::{DEFAULT_API_BASE, DEFAULT_CONTENT_BASE, DropboxClient};
pub use link::{PUBLIC_CONTENT_HOST, REDIRECT_PARAM, normalize_shared_link};

/// A single remote file operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write { contents: Vec<u8> },
    Metadata,
    Delete,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Read => "download",
            Operation::Write { .. } => "upload",
            Operation::Metadata => "get metadata",
            Operation::Delete => "delete",
        }
    }
}

/// Result of an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    Contents(Vec<u8>),
    Metadata(FileMetadata),
    Done,
}

impl OperationOutput {
    fn kind(&self) -> &'static str {
        match self {
            OperationOutput::Contents(_) => "contents",
            OperationOutput::Metadata(_) => "metadata",
            OperationOutput::Done => "empty",
        }
    }
}

/// File or folder metadata as reported by Dropbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// `file`, `folder`, or `deleted`; absent on upload responses.
    #[serde(rename = ".tag", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub server_modified: Option<DateTime<Utc>>,
}

/// The account the token belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<AccountName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountName {
    pub display_name: String,
}

/// Remote storage API. Every call carries the token to use.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    async fn perform(
        &self,
        operation: &Operation,
        path: &str,
        token: &Token,
    ) -> Result<OperationOutput, StorageError>;

    /// Create a shared link for `path`, or return the one that already exists.
    async fn create_shareable_link(&self, path: &str, token: &Token) -> Result<String, StorageError>;

    async fn account_info(&self, token: &Token) -> Result<AccountInfo, StorageError>;
}

/// One-time generation of content that does not exist yet (image
/// derivatives and the like). Returns whether the target now exists.
#[async_trait]
pub trait Materializer: Send + Sync {
    async fn materialize(&self, target: &str) -> bool;
}

/// [`Materializer`] that never produces anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMaterializer;

#[async_trait]
impl Materializer for NoopMaterializer {
    async fn materialize(&self, _target: &str) -> bool {
        false
    }
}

/// Where a reader should fetch a file from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Direct public URL on the content host.
    Public(Url),
    /// Not served publicly; the host application streams `target` itself.
    Proxied { target: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A problem reported by [`StorageFacade::ensure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// File access handed out by [`StorageFacade::adapter`].
#[async_trait]
pub trait FileAdapter: Send + Sync {
    async fn perform(&self, operation: &Operation, uri: &str)
    -> Result<OperationOutput, StorageError>;

    async fn read(&self, uri: &str) -> Result<Vec<u8>, StorageError> {
        match self.perform(&Operation::Read, uri).await? {
            OperationOutput::Contents(bytes) => Ok(bytes),
            other => Err(unexpected(Operation::Read.name(), uri, &other)),
        }
    }

    async fn write(&self, uri: &str, contents: Vec<u8>) -> Result<FileMetadata, StorageError> {
        let operation = Operation::Write { contents };
        match self.perform(&operation, uri).await? {
            OperationOutput::Metadata(metadata) => Ok(metadata),
            other => Err(unexpected(operation.name(), uri, &other)),
        }
    }

    async fn metadata(&self, uri: &str) -> Result<FileMetadata, StorageError> {
        match self.perform(&Operation::Metadata, uri).await? {
            OperationOutput::Metadata(metadata) => Ok(metadata),
            other => Err(unexpected(Operation::Metadata.name(), uri, &other)),
        }
    }

    async fn delete(&self, uri: &str) -> Result<(), StorageError> {
        self.perform(&Operation::Delete, uri).await.map(|_| ())
    }
}

fn unexpected(operation: &str, uri: &str, output: &OperationOutput) -> StorageError {
    StorageError::Decode {
        operation: operation.to_string(),
        path: uri.to_string(),
        message: format!("unexpected {} output", output.kind()),
    }
}

/// Adapter used when no token can be obtained: every call fails fast.
#[derive(Debug, Clone)]
pub struct MissingAdapter {
    reason: String,
}

impl MissingAdapter {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl FileAdapter for MissingAdapter {
    async fn perform(
        &self,
        _operation: &Operation,
        _uri: &str,
    ) -> Result<OperationOutput, StorageError> {
        Err(StorageError::Unavailable {
            reason: self.reason.clone(),
        })
    }
}

/// Adapter that performs operations with a token from the manager.
pub struct RemoteAdapter {
    manager: Arc<CredentialManager>,
    remote: Arc<dyn RemoteStorage>,
    prefix: String,
}

impl RemoteAdapter {
    pub fn new(
        manager: Arc<CredentialManager>,
        remote: Arc<dyn RemoteStorage>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            remote,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl FileAdapter for RemoteAdapter {
    async fn perform(
        &self,
        operation: &Operation,
        uri: &str,
    ) -> Result<OperationOutput, StorageError> {
        let path = remote_path(&self.prefix, &target_of(uri));
        let remote = &self.remote;
        let path_ref = path.as_str();

        with_token(&self.manager, move |token| async move {
            remote.perform(operation, path_ref, &token).await
        })
        .await
    }
}

/// Run `call` with a token from `manager`.
///
/// If the remote rejects the token, one forced refresh and one retry are
/// made; a second rejection is returned as is. Failure to obtain a token at
/// all is reported as [`StorageError::Unavailable`].
pub async fn with_token<T, F, Fut>(manager: &CredentialManager, call: F) -> Result<T, StorageError>
where
    F: Fn(Token) -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let token = manager.acquire_token().await?;

    match call(token.clone()).await {
        Err(error) if error.is_unauthorized() => {
            warn!("{}; forcing one token refresh", error);
            let token = manager.force_refresh(&token).await?;
            call(token).await
        }
        other => other,
    }
}

/// Entry point for file-access code.
pub struct StorageFacade {
    manager: Arc<CredentialManager>,
    remote: Arc<dyn RemoteStorage>,
    materializer: Arc<dyn Materializer>,
    config: StorageConfig,
}

impl StorageFacade {
    pub fn new(
        manager: Arc<CredentialManager>,
        remote: Arc<dyn RemoteStorage>,
        materializer: Arc<dyn Materializer>,
        config: StorageConfig,
    ) -> Self {
        Self {
            manager,
            remote,
            materializer,
            config,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Hand out a file adapter.
    ///
    /// Obtains a token once up front; if that fails the returned adapter is a
    /// [`MissingAdapter`] so callers get a uniform `Unavailable` error
    /// instead of a crash.
    pub async fn adapter(&self) -> Box<dyn FileAdapter> {
        match self.manager.acquire_token().await {
            Ok(_) => Box::new(RemoteAdapter::new(
                self.manager.clone(),
                self.remote.clone(),
                self.config.prefix.clone(),
            )),
            Err(e) => {
                warn!(
                    "Dropbox credentials for {} unavailable, using missing adapter: {}",
                    self.manager.target(),
                    e
                );
                Box::new(MissingAdapter::new(e.to_string()))
            }
        }
    }

    /// Resolve where `uri` should be read from.
    ///
    /// With public serving enabled this is a shared link; if none can be
    /// produced the materializer gets one chance to create the file, followed
    /// by one more link attempt. `None` means no link yet.
    pub async fn resolve_read_location(&self, uri: &str) -> Option<Location> {
        let target = target_of(uri);

        if !self.config.public {
            return Some(Location::Proxied { target });
        }

        if let Some(url) = self.shareable_link(&target).await {
            return Some(Location::Public(url));
        }

        if self.materializer.materialize(&target).await {
            debug!("Materialized {}, retrying shared link", target);
            return self.shareable_link(&target).await.map(Location::Public);
        }

        None
    }

    /// Mint (or fetch) the shared link for `target` and normalize it.
    ///
    /// Any failure yields `None`: unpublished content has no link yet.
    pub async fn shareable_link(&self, target: &str) -> Option<Url> {
        let path = remote_path(&self.config.prefix, target);
        let remote = &self.remote;
        let path_ref = path.as_str();

        let raw = with_token(&self.manager, move |token| async move {
            remote.create_shareable_link(path_ref, &token).await
        })
        .await;

        match raw {
            Ok(raw) => {
                let url = normalize_shared_link(&raw);
                if url.is_none() {
                    warn!("Dropbox returned an unusable shared link for {}", path);
                }
                url
            }
            Err(e) => {
                debug!("No shared link for {}: {}", path, e);
                None
            }
        }
    }

    /// Check that the configured credentials can reach Dropbox.
    ///
    /// Reachable credentials whose token expires but cannot be refreshed
    /// produce a warning.
    pub async fn ensure(&self) -> Vec<Diagnostic> {
        let remote = &self.remote;
        let account = match with_token(&self.manager, move |token| async move {
            remote.account_info(&token).await
        })
        .await
        {
            Ok(account) => account,
            Err(e) => {
                return vec![Diagnostic {
                    severity: Severity::Error,
                    message: format!("The Dropbox client failed with: {}", e),
                }];
            }
        };
        info!("Dropbox reachable as account {}", account.account_id);

        match self.manager.current_token().await {
            Ok(Some(token)) if token.refresh_token.is_none() && token.expires_at.is_some() => {
                vec![Diagnostic {
                    severity: Severity::Warning,
                    message: "The stored token has no refresh token; access stops when it \
                              expires. Authorize again with offline access."
                        .to_string(),
                }]
            }
            _ => Vec::new(),
        }
    }
}

/// Target part of a file URI: everything after `scheme://`, without
/// leading slashes.
pub fn target_of(uri: &str) -> String {
    let rest = match uri.split_once("://") {
        Some((_, rest)) => rest,
        None => uri,
    };
    rest.trim_start_matches('/').to_string()
}

/// Dropbox path for `target` under `prefix`: `/prefix/target` with empty
/// segments removed.
pub fn remote_path(prefix: &str, target: &str) -> String {
    let segments: Vec<&str> = prefix
        .split('/')
        .chain(target.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}
