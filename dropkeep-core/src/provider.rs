//! OAuth provider endpoints.
//!
//! Dropkeep talks to a single identity provider. [`ProviderConfig::dropbox`]
//! carries the production endpoints; tests point the same struct at a mock
//! server.

use serde::{Deserialize, Serialize};

/// Dropbox authorization endpoint.
pub const DROPBOX_AUTH_URL: &str = "https://www.dropbox.com/oauth2/authorize";

/// Dropbox token endpoint.
pub const DROPBOX_TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";

/// Endpoints and default scopes of an OAuth provider.
///
/// # Example
///
/// ```
/// use dropkeep_core::provider::ProviderConfig;
///
/// let dropbox = ProviderConfig::dropbox();
/// assert!(dropbox.default_scopes.contains(&"files.content.read".to_string()));
///
/// let local = ProviderConfig::dropbox().with_token_url("http://127.0.0.1:9000/token");
/// assert_eq!(local.token_url, "http://127.0.0.1:9000/token");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Human-readable name.
    pub name: String,

    /// OAuth authorization endpoint URL.
    pub auth_url: String,

    /// OAuth token endpoint URL.
    pub token_url: String,

    /// Scopes requested when building an authorization URL.
    pub default_scopes: Vec<String>,

    /// Extra query parameters appended to the authorization URL.
    pub extra_auth_params: Vec<(String, String)>,
}

impl ProviderConfig {
    /// Dropbox with offline access, so the first exchange yields a refresh token.
    pub fn dropbox() -> Self {
        Self {
            name: "Dropbox".to_string(),
            auth_url: DROPBOX_AUTH_URL.to_string(),
            token_url: DROPBOX_TOKEN_URL.to_string(),
            default_scopes: [
                "account_info.read",
                "files.metadata.read",
                "files.content.read",
                "files.content.write",
                "sharing.read",
                "sharing.write",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            extra_auth_params: vec![("token_access_type".to_string(), "offline".to_string())],
        }
    }

    /// Set the authorization URL.
    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = url.into();
        self
    }

    /// Set the token URL.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Set the default scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::dropbox()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropbox_requests_offline_access() {
        let config = ProviderConfig::dropbox();
        assert!(
            config
                .extra_auth_params
                .iter()
                .any(|(k, v)| k == "token_access_type" && v == "offline")
        );
        assert_eq!(config.token_url, DROPBOX_TOKEN_URL);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ProviderConfig::dropbox()
            .with_auth_url("http://localhost/auth")
            .with_scopes(vec!["files.content.read".to_string()]);

        assert_eq!(config.auth_url, "http://localhost/auth");
        assert_eq!(config.default_scopes, vec!["files.content.read"]);
    }
}
