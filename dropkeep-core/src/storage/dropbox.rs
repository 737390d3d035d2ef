//! Dropbox HTTP API bindings.
//!
//! Only the handful of endpoints the adapter needs: download, upload,
//! metadata, delete, shared links, and the current account. Every response
//! is classified into [`StorageError`]; `reqwest` errors never escape.

use std::fmt::Write as _;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{AccountInfo, Operation, OperationOutput, RemoteStorage};
use crate::error::StorageError;
use crate::token::Token;

/// RPC endpoint host.
pub const DEFAULT_API_BASE: &str = "https://api.dropboxapi.com";

/// Content upload/download host.
pub const DEFAULT_CONTENT_BASE: &str = "https://content.dropboxapi.com";

/// Dropbox error envelope returned with HTTP 409.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error_summary: String,
    #[serde(default)]
    error: Value,
}

#[derive(Debug, Deserialize)]
struct SharedLink {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SharedLinkList {
    links: Vec<SharedLink>,
}

/// [`RemoteStorage`] over the Dropbox v2 HTTP API.
#[derive(Debug, Clone)]
pub struct DropboxClient {
    http: reqwest::Client,
    api_base: String,
    content_base: String,
}

impl DropboxClient {
    pub fn new() -> Self {
        Self::with_base_urls(DEFAULT_API_BASE, DEFAULT_CONTENT_BASE)
    }

    /// Point the client at other hosts (used by tests).
    pub fn with_base_urls(api_base: impl Into<String>, content_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            content_base: content_base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn rpc(
        &self,
        operation: &str,
        endpoint: &str,
        path: &str,
        body: &Value,
        token: &Token,
    ) -> Result<Response, StorageError> {
        let response = self
            .http
            .post(format!("{}/2/{}", self.api_base, endpoint))
            .bearer_auth(token.access_token.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| transport(operation, path, e))?;

        check(operation, path, response).await
    }

    async fn content(
        &self,
        operation: &str,
        endpoint: &str,
        path: &str,
        arg: &Value,
        upload: Option<Vec<u8>>,
        token: &Token,
    ) -> Result<Response, StorageError> {
        let mut request = self
            .http
            .post(format!("{}/2/{}", self.content_base, endpoint))
            .bearer_auth(token.access_token.expose())
            .header("Dropbox-API-Arg", header_safe_json(arg));

        // Download endpoints reject any Content-Type other than none.
        if let Some(body) = upload {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport(operation, path, e))?;

        check(operation, path, response).await
    }

    async fn existing_link(&self, path: &str, token: &Token) -> Result<String, StorageError> {
        let response = self
            .rpc(
                "list shared links",
                "sharing/list_shared_links",
                path,
                &json!({ "path": path, "direct_only": true }),
                token,
            )
            .await?;

        let list: SharedLinkList = decode("list shared links", path, response).await?;
        list.links
            .into_iter()
            .next()
            .map(|link| link.url)
            .ok_or_else(|| StorageError::NotFound {
                path: path.to_string(),
            })
    }
}

impl Default for DropboxClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStorage for DropboxClient {
    async fn perform(
        &self,
        operation: &Operation,
        path: &str,
        token: &Token,
    ) -> Result<OperationOutput, StorageError> {
        let name = operation.name();
        match operation {
            Operation::Read => {
                let response = self
                    .content(name, "files/download", path, &json!({ "path": path }), None, token)
                    .await?;
                let bytes = response.bytes().await.map_err(|e| transport(name, path, e))?;
                Ok(OperationOutput::Contents(bytes.to_vec()))
            }
            Operation::Write { contents } => {
                let arg = json!({ "path": path, "mode": "overwrite", "mute": true });
                let response = self
                    .content(name, "files/upload", path, &arg, Some(contents.clone()), token)
                    .await?;
                Ok(OperationOutput::Metadata(decode(name, path, response).await?))
            }
            Operation::Metadata => {
                let response = self
                    .rpc(name, "files/get_metadata", path, &json!({ "path": path }), token)
                    .await?;
                Ok(OperationOutput::Metadata(decode(name, path, response).await?))
            }
            Operation::Delete => {
                self.rpc(name, "files/delete_v2", path, &json!({ "path": path }), token)
                    .await?;
                Ok(OperationOutput::Done)
            }
        }
    }

    async fn create_shareable_link(&self, path: &str, token: &Token) -> Result<String, StorageError> {
        const OP: &str = "create shared link";

        let response = self
            .http
            .post(format!("{}/2/sharing/create_shared_link_with_settings", self.api_base))
            .bearer_auth(token.access_token.expose())
            .json(&json!({ "path": path }))
            .send()
            .await
            .map_err(|e| transport(OP, path, e))?;

        if response.status() == StatusCode::CONFLICT {
            let body = response.text().await.map_err(|e| transport(OP, path, e))?;
            let error: ApiErrorBody = serde_json::from_str(&body).map_err(|e| StorageError::Decode {
                operation: OP.to_string(),
                path: path.to_string(),
                message: e.to_string(),
            })?;

            if error.error_summary.starts_with("shared_link_already_exists") {
                let url = error
                    .error
                    .pointer("/shared_link_already_exists/metadata/url")
                    .and_then(Value::as_str);
                return match url {
                    Some(url) => Ok(url.to_string()),
                    None => self.existing_link(path, token).await,
                };
            }

            return Err(conflict(OP, path, error.error_summary));
        }

        let response = check(OP, path, response).await?;
        let link: SharedLink = decode(OP, path, response).await?;
        Ok(link.url)
    }

    async fn account_info(&self, token: &Token) -> Result<AccountInfo, StorageError> {
        let response = self
            .rpc("get account", "users/get_current_account", "", &Value::Null, token)
            .await?;
        decode("get account", "", response).await
    }
}

async fn check(operation: &str, path: &str, response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(StorageError::Unauthorized {
            operation: operation.to_string(),
            path: path.to_string(),
        });
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::CONFLICT {
        if let Ok(error) = serde_json::from_str::<ApiErrorBody>(&body) {
            return Err(conflict(operation, path, error.error_summary));
        }
    }

    Err(StorageError::Api {
        operation: operation.to_string(),
        path: path.to_string(),
        status: status.as_u16(),
        message: body,
    })
}

fn conflict(operation: &str, path: &str, summary: String) -> StorageError {
    if summary.contains("not_found") {
        StorageError::NotFound {
            path: path.to_string(),
        }
    } else {
        StorageError::Api {
            operation: operation.to_string(),
            path: path.to_string(),
            status: StatusCode::CONFLICT.as_u16(),
            message: summary,
        }
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    operation: &str,
    path: &str,
    response: Response,
) -> Result<T, StorageError> {
    let body = response.bytes().await.map_err(|e| transport(operation, path, e))?;
    serde_json::from_slice(&body).map_err(|e| StorageError::Decode {
        operation: operation.to_string(),
        path: path.to_string(),
        message: e.to_string(),
    })
}

fn transport(operation: &str, path: &str, error: reqwest::Error) -> StorageError {
    StorageError::Transport {
        operation: operation.to_string(),
        path: path.to_string(),
        message: error.to_string(),
    }
}

/// JSON for the `Dropbox-API-Arg` header, with non-ASCII escaped as `\uXXXX`.
fn header_safe_json(value: &Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(out, "\\u{:04x}", unit);
            }
        }
    }
    out
}
