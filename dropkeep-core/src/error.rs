//! Error types shared across Dropkeep.

use thiserror::Error;

use crate::config::ConfigError;
use crate::exchange::{ExchangeError, Grant};
use crate::store::StoreError;

/// Failure to obtain a usable token.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The bootstrap or refresh exchange failed. Not retried automatically.
    #[error("{grant} exchange failed: {source}")]
    ExchangeFailed {
        grant: Grant,
        #[source]
        source: ExchangeError,
    },

    /// Nothing is stored yet and no access code is configured.
    #[error("no stored token and no access code configured")]
    MissingAccessCode,

    /// The stored token is stale and carries no refresh value.
    #[error("stored token expired and has no refresh token")]
    NoRefreshToken,

    /// Reading or writing the persisted token failed.
    #[error("token store error: {0}")]
    Store(#[from] StoreError),
}

/// Failure of a remote storage operation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The remote service rejected the access token.
    #[error("{operation} {path}: access token rejected")]
    Unauthorized { operation: String, path: String },

    /// No valid token can be obtained; every operation fails fast.
    #[error("storage unavailable: {reason}")]
    Unavailable { reason: String },

    /// The path does not exist remotely.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// The remote API answered with an error.
    #[error("{operation} {path}: HTTP {status}: {message}")]
    Api {
        operation: String,
        path: String,
        status: u16,
        message: String,
    },

    /// The request never produced a response.
    #[error("{operation} {path}: transport error: {message}")]
    Transport {
        operation: String,
        path: String,
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("{operation} {path}: unexpected response: {message}")]
    Decode {
        operation: String,
        path: String,
        message: String,
    },
}

impl StorageError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, StorageError::Unauthorized { .. })
    }
}

impl From<AuthError> for StorageError {
    fn from(error: AuthError) -> Self {
        StorageError::Unavailable {
            reason: error.to_string(),
        }
    }
}

/// Top-level error type encompassing all Dropkeep errors.
#[derive(Debug, Error)]
pub enum DropkeepError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_failure_keeps_cause() {
        let error = AuthError::ExchangeFailed {
            grant: Grant::RefreshToken,
            source: ExchangeError::InvalidGrant {
                description: "refresh token is malformed".to_string(),
            },
        };

        assert_eq!(
            error.to_string(),
            "refresh_token exchange failed: invalid grant: refresh token is malformed"
        );
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_auth_error_degrades_to_unavailable() {
        let storage: StorageError = AuthError::MissingAccessCode.into();
        assert!(matches!(storage, StorageError::Unavailable { .. }));
        assert!(!storage.is_unauthorized());
    }
}
