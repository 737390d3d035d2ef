//! Credential lifecycle management.
//!
//! [`CredentialManager`] hands out a usable access token for one credential
//! target. It decides between reusing the stored token, bootstrapping from
//! the configured access code, and refreshing a stale token, and writes every
//! newly obtained token back to the [`TokenStore`].
//!
//! # Concurrency
//!
//! The whole read-check-exchange-write sequence runs inside a per-target
//! async mutex. At most one exchange is in flight; callers queued behind it
//! re-read the store once they get the section and observe the token the
//! holder persisted. Dropbox may invalidate a refresh value once it has been
//! used, so it must never be sent twice in parallel.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use dropkeep_core::{
//!     CredentialManager, MemoryStore, OAuth2ExchangeClient, Secret, SecretTokenStore,
//!     provider::ProviderConfig,
//! };
//!
//! let store = Arc::new(SecretTokenStore::new(MemoryStore::new(), "default"));
//! let exchange = Arc::new(OAuth2ExchangeClient::new(
//!     ProviderConfig::dropbox(),
//!     "app-key",
//!     &Secret::new("app-secret"),
//! )?);
//!
//! let manager = CredentialManager::new("default", store, exchange)
//!     .with_access_code(Some(Secret::new("pasted-code")));
//!
//! let token = manager.acquire_token().await?;
//! println!("{}", token.summary());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock, PoisonError};

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::error::AuthError;
use crate::exchange::{ExchangeClient, ExchangeError, Grant};
use crate::store::Secret;
use crate::token::Token;
use crate::token_store::TokenStore;

/// Default upper bound on a single grant exchange.
pub const DEFAULT_EXCHANGE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Owns the stored token of one credential target.
///
/// Every manager built for the same target name in this process shares one
/// critical section, so independently constructed managers still never run
/// two exchanges for that target at once.
pub struct CredentialManager {
    target: String,
    store: Arc<dyn TokenStore>,
    exchange: Arc<dyn ExchangeClient>,
    access_code: Option<Secret>,
    section: Arc<Mutex<()>>,
    expiry_buffer: Duration,
    exchange_timeout: std::time::Duration,
}

impl CredentialManager {
    /// Create a manager with no access code, no expiry buffer, and the
    /// default exchange timeout.
    pub fn new(
        target: impl Into<String>,
        store: Arc<dyn TokenStore>,
        exchange: Arc<dyn ExchangeClient>,
    ) -> Self {
        let target = target.into();
        Self {
            section: section_for(&target),
            target,
            store,
            exchange,
            access_code: None,
            expiry_buffer: Duration::zero(),
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }

    /// One-time code used only when nothing is stored yet.
    pub fn with_access_code(mut self, access_code: Option<Secret>) -> Self {
        self.access_code = access_code.filter(|code| !code.is_empty());
        self
    }

    /// Treat tokens as stale this long before their actual expiry.
    ///
    /// Negative buffers are treated as zero.
    pub fn with_expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = buffer.max(Duration::zero());
        self
    }

    /// Deadline applied to every grant exchange.
    pub fn with_exchange_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Return a usable token, bootstrapping or refreshing as needed.
    ///
    /// - Nothing stored: exchange the access code, persist, return.
    /// - Stored and fresh: return it without any network call.
    /// - Stored and stale: exchange its refresh value, persist, return.
    ///
    /// A failed exchange leaves the stored token untouched so the next call
    /// can try again.
    #[instrument(skip(self), fields(target = %self.target))]
    pub async fn acquire_token(&self) -> Result<Token, AuthError> {
        let _section = self.section.lock().await;

        match self.store.get().await? {
            None => self.bootstrap().await,
            Some(token) if token.is_fresh_at(Utc::now(), self.expiry_buffer) => {
                debug!("Using stored token ({})", token.summary());
                Ok(token)
            }
            Some(stale) => self.refresh(&stale).await,
        }
    }

    /// Refresh after the remote service rejected `rejected`.
    ///
    /// If the stored token already differs from `rejected` and is still
    /// fresh, another caller refreshed in the meantime and it is returned
    /// as is.
    #[instrument(skip(self, rejected), fields(target = %self.target))]
    pub async fn force_refresh(&self, rejected: &Token) -> Result<Token, AuthError> {
        let _section = self.section.lock().await;

        match self.store.get().await? {
            None => self.bootstrap().await,
            Some(current)
                if current.access_token != rejected.access_token
                    && current.is_fresh_at(Utc::now(), self.expiry_buffer) =>
            {
                debug!("Token already replaced by another caller");
                Ok(current)
            }
            Some(current) => self.refresh(&current).await,
        }
    }

    /// Peek at the stored token without exchanging anything.
    pub async fn current_token(&self) -> Result<Option<Token>, AuthError> {
        Ok(self.store.get().await?)
    }

    async fn bootstrap(&self) -> Result<Token, AuthError> {
        let code = self.access_code.as_ref().ok_or_else(|| {
            warn!("No stored token and no access code configured");
            AuthError::MissingAccessCode
        })?;

        info!("No stored token, exchanging access code");
        let token = self
            .run_exchange(
                Grant::AuthorizationCode,
                self.exchange.exchange_authorization_code(code),
            )
            .await?;

        if token.refresh_token.is_none() {
            warn!("Provider issued no refresh token; offline access was probably not requested");
        }

        self.persist(&token).await?;
        info!("Bootstrapped token ({})", token.summary());
        Ok(token)
    }

    async fn refresh(&self, stale: &Token) -> Result<Token, AuthError> {
        let refresh_token = stale.refresh_token.clone().ok_or_else(|| {
            error!("Stored token expired and carries no refresh token");
            AuthError::NoRefreshToken
        })?;

        info!("Stored token is stale, refreshing");
        let mut token = self
            .run_exchange(
                Grant::RefreshToken,
                self.exchange.exchange_refresh_token(&refresh_token),
            )
            .await?;

        // Dropbox only sends a refresh value when it rotates it.
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token);
        }

        self.persist(&token).await?;
        info!("Refreshed token ({})", token.summary());
        Ok(token)
    }

    async fn run_exchange<F>(&self, grant: Grant, call: F) -> Result<Token, AuthError>
    where
        F: Future<Output = Result<Token, ExchangeError>>,
    {
        match tokio::time::timeout(self.exchange_timeout, call).await {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(source)) => {
                error!("{} exchange failed: {}", grant, source);
                Err(AuthError::ExchangeFailed { grant, source })
            }
            Err(_) => {
                error!("{} exchange timed out after {:?}", grant, self.exchange_timeout);
                Err(AuthError::ExchangeFailed {
                    grant,
                    source: ExchangeError::Timeout {
                        after: self.exchange_timeout,
                    },
                })
            }
        }
    }

    async fn persist(&self, token: &Token) -> Result<(), AuthError> {
        self.store.set(token).await.map_err(|e| {
            error!("Failed to persist new token: {}", e);
            AuthError::Store(e)
        })
    }
}

/// Critical section shared by all managers of `target`.
fn section_for(target: &str) -> Arc<Mutex<()>> {
    static SECTIONS: OnceLock<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>> =
        OnceLock::new();

    let mut sections = SECTIONS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    sections.entry(target.to_string()).or_default().clone()
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("target", &self.target)
            .field("has_access_code", &self.access_code.is_some())
            .field("expiry_buffer", &self.expiry_buffer)
            .field("exchange_timeout", &self.exchange_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::token_store::SecretTokenStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    #[derive(Default)]
    struct CountingExchange {
        codes: AtomicUsize,
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl ExchangeClient for CountingExchange {
        async fn exchange_authorization_code(&self, _code: &Secret) -> Result<Token, ExchangeError> {
            self.codes.fetch_add(1, Ordering::SeqCst);
            Ok(Token::from_ttl("boot", Duration::hours(4)).with_refresh_token("r1"))
        }

        async fn exchange_refresh_token(&self, _r: &Secret) -> Result<Token, ExchangeError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Token::from_ttl(format!("refreshed-{}", n), Duration::hours(4)))
        }

        fn authorization_url(&self, _scopes: &[String]) -> Result<Url, ExchangeError> {
            Ok(Url::parse("https://example.com/authorize").unwrap())
        }
    }

    fn manager(exchange: Arc<CountingExchange>) -> CredentialManager {
        let store = Arc::new(SecretTokenStore::new(MemoryStore::new(), "unit"));
        CredentialManager::new("unit", store, exchange)
            .with_access_code(Some(Secret::new("code")))
    }

    #[tokio::test]
    async fn test_force_refresh_skips_when_already_replaced() {
        let exchange = Arc::new(CountingExchange::default());
        let manager = manager(exchange.clone());

        let first = manager.acquire_token().await.unwrap();
        let second = manager.force_refresh(&first).await.unwrap();
        assert_eq!(second.access_token.expose(), "refreshed-1");

        // `first` is no longer stored, so no second exchange happens.
        let third = manager.force_refresh(&first).await.unwrap();
        assert_eq!(third, second);
        assert_eq!(exchange.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_carries_unrotated_refresh_value() {
        let exchange = Arc::new(CountingExchange::default());
        let manager = manager(exchange);

        let boot = manager.acquire_token().await.unwrap();
        let refreshed = manager.force_refresh(&boot).await.unwrap();

        assert_eq!(refreshed.refresh_token, Some(Secret::new("r1")));
        let stored = manager.current_token().await.unwrap().unwrap();
        assert_eq!(stored, refreshed);
    }

    #[tokio::test]
    async fn test_force_refresh_renews_stale_replacement() {
        let exchange = Arc::new(CountingExchange::default());
        let store = Arc::new(SecretTokenStore::new(MemoryStore::new(), "unit-stale"));
        let stale = Token::new("other")
            .with_refresh_token("r1")
            .with_expiry(Utc::now() - Duration::minutes(1));
        store.set(&stale).await.unwrap();
        let manager = CredentialManager::new("unit-stale", store, exchange.clone());

        let rejected = Token::new("rejected");
        let token = manager.force_refresh(&rejected).await.unwrap();

        assert_eq!(token.access_token.expose(), "refreshed-1");
        assert_eq!(exchange.refreshes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_managers_of_one_target_share_a_section() {
        let exchange = Arc::new(CountingExchange::default());
        let a = manager(exchange.clone());
        let b = manager(exchange.clone());
        let other = CredentialManager::new(
            "unit-other",
            Arc::new(SecretTokenStore::new(MemoryStore::new(), "unit-other")),
            exchange,
        );

        assert!(Arc::ptr_eq(&a.section, &b.section));
        assert!(!Arc::ptr_eq(&a.section, &other.section));
    }

    #[test]
    fn test_negative_expiry_buffer_is_zero() {
        let manager = manager(Arc::new(CountingExchange::default()))
            .with_expiry_buffer(Duration::hours(-1));
        assert_eq!(manager.expiry_buffer, Duration::zero());
    }

    #[tokio::test]
    async fn test_blank_access_code_counts_as_missing() {
        let store = Arc::new(SecretTokenStore::new(MemoryStore::new(), "unit"));
        let manager = CredentialManager::new("unit", store, Arc::new(CountingExchange::default()))
            .with_access_code(Some(Secret::new("  ")));

        assert!(matches!(
            manager.acquire_token().await,
            Err(AuthError::MissingAccessCode)
        ));
    }

    #[test]
    fn test_debug_hides_access_code() {
        let manager = manager(Arc::new(CountingExchange::default()));
        let printed = format!("{:?}", manager);
        assert!(printed.contains("has_access_code: true"));
        assert!(!printed.contains("\"code\""));
    }
}
