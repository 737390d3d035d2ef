//! OAuth2 grant exchanges against the identity provider.
//!
//! The credential manager only sees the [`ExchangeClient`] trait.
//! [`OAuth2ExchangeClient`] is the production implementation built on the
//! `oauth2` crate.

use async_trait::async_trait;
use chrono::Utc;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RefreshToken,
    RequestTokenError, Scope, TokenResponse, TokenUrl,
    basic::{BasicClient, BasicErrorResponseType, BasicTokenResponse, BasicTokenType},
    reqwest::async_http_client,
};
use thiserror::Error;
use url::Url;

use crate::provider::ProviderConfig;
use crate::store::Secret;
use crate::token::Token;

/// Which grant an exchange used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl std::fmt::Display for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grant::AuthorizationCode => write!(f, "authorization_code"),
            Grant::RefreshToken => write!(f, "refresh_token"),
        }
    }
}

/// Failure of a single grant exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Transport failure or unparseable response.
    #[error("token request failed: {message}")]
    Request { message: String },

    /// The code or refresh value was rejected (expired, revoked, or reused).
    #[error("invalid grant: {description}")]
    InvalidGrant { description: String },

    /// The provider returned some other OAuth error.
    #[error("provider error {error}: {description}")]
    Provider { error: String, description: String },

    /// No response within the exchange deadline.
    #[error("token request timed out after {after:?}")]
    Timeout { after: std::time::Duration },

    /// Client or endpoint configuration is unusable.
    #[error("invalid OAuth configuration: {message}")]
    InvalidConfig { message: String },
}

/// Grant exchanges used by the credential manager.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Trade a one-time authorization code for the first token.
    async fn exchange_authorization_code(&self, code: &Secret) -> Result<Token, ExchangeError>;

    /// Trade a refresh value for a new token.
    ///
    /// The returned token carries a refresh value only if the provider
    /// rotated it.
    async fn exchange_refresh_token(&self, refresh_token: &Secret)
    -> Result<Token, ExchangeError>;

    /// URL the operator visits to obtain an authorization code.
    fn authorization_url(&self, scopes: &[String]) -> Result<Url, ExchangeError>;
}

/// Create an OAuth2 client from a provider configuration.
///
/// No redirect URI is set: Dropbox then shows the code on screen for the
/// operator to paste into configuration.
pub fn create_oauth_client(
    config: &ProviderConfig,
    client_id: &str,
    client_secret: &Secret,
) -> Result<BasicClient, ExchangeError> {
    let auth_url = AuthUrl::new(config.auth_url.clone()).map_err(|e| {
        ExchangeError::InvalidConfig {
            message: format!("invalid auth URL: {}", e),
        }
    })?;

    let token_url = TokenUrl::new(config.token_url.clone()).map_err(|e| {
        ExchangeError::InvalidConfig {
            message: format!("invalid token URL: {}", e),
        }
    })?;

    Ok(BasicClient::new(
        ClientId::new(client_id.to_string()),
        Some(ClientSecret::new(client_secret.expose().to_string())),
        auth_url,
        Some(token_url),
    ))
}

/// [`ExchangeClient`] backed by the `oauth2` crate.
pub struct OAuth2ExchangeClient {
    client: BasicClient,
    provider: ProviderConfig,
}

impl OAuth2ExchangeClient {
    pub fn new(
        provider: ProviderConfig,
        client_id: &str,
        client_secret: &Secret,
    ) -> Result<Self, ExchangeError> {
        let client = create_oauth_client(&provider, client_id, client_secret)?;
        Ok(Self { client, provider })
    }
}

impl std::fmt::Debug for OAuth2ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2ExchangeClient")
            .field("provider", &self.provider.name)
            .field("token_url", &self.provider.token_url)
            .finish()
    }
}

#[async_trait]
impl ExchangeClient for OAuth2ExchangeClient {
    async fn exchange_authorization_code(&self, code: &Secret) -> Result<Token, ExchangeError> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.expose().to_string()))
            .request_async(async_http_client)
            .await
            .map_err(classify_error)?;

        token_from_response(&response)
    }

    async fn exchange_refresh_token(
        &self,
        refresh_token: &Secret,
    ) -> Result<Token, ExchangeError> {
        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.expose().to_string()))
            .request_async(async_http_client)
            .await
            .map_err(classify_error)?;

        token_from_response(&response)
    }

    fn authorization_url(&self, scopes: &[String]) -> Result<Url, ExchangeError> {
        let scopes = if scopes.is_empty() {
            &self.provider.default_scopes
        } else {
            scopes
        };

        let mut request = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes.iter().map(|s| Scope::new(s.clone())));

        for (key, value) in &self.provider.extra_auth_params {
            request = request.add_extra_param(key.as_str(), value.as_str());
        }

        let (url, _state) = request.url();
        Ok(url)
    }
}

fn token_from_response(response: &BasicTokenResponse) -> Result<Token, ExchangeError> {
    let issued_at = Utc::now();
    let mut token = Token::new(response.access_token().secret().as_str());
    token.issued_at = issued_at;
    token.token_type = match response.token_type() {
        BasicTokenType::Bearer => "bearer".to_string(),
        BasicTokenType::Mac => "mac".to_string(),
        BasicTokenType::Extension(other) => other.to_lowercase(),
    };

    if let Some(ttl) = response.expires_in() {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| ExchangeError::Request {
            message: format!("invalid expires_in: {}", e),
        })?;
        token = token.with_expiry(issued_at + ttl);
    }

    if let Some(refresh) = response.refresh_token() {
        token = token.with_refresh_token(refresh.secret().as_str());
    }

    Ok(token)
}

fn classify_error<RE: std::error::Error + 'static>(
    error: RequestTokenError<RE, oauth2::basic::BasicErrorResponse>,
) -> ExchangeError {
    match error {
        RequestTokenError::ServerResponse(response) => {
            let description = response
                .error_description()
                .cloned()
                .unwrap_or_else(|| "no description".to_string());
            if *response.error() == BasicErrorResponseType::InvalidGrant {
                ExchangeError::InvalidGrant { description }
            } else {
                ExchangeError::Provider {
                    error: response.error().to_string(),
                    description,
                }
            }
        }
        RequestTokenError::Request(e) => ExchangeError::Request {
            message: e.to_string(),
        },
        RequestTokenError::Parse(e, _) => ExchangeError::Request {
            message: format!("malformed token response: {}", e),
        },
        RequestTokenError::Other(message) => ExchangeError::Request { message },
    }
}
