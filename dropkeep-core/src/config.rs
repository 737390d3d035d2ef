//! Configuration handling.
//!
//! Settings come from a TOML file, by default
//! `{config_dir}/dropkeep.toml` in the platform configuration directory.
//! Client credentials and the access code can also be supplied through
//! `DROPKEEP_CLIENT_ID`, `DROPKEEP_CLIENT_SECRET` and `DROPKEEP_ACCESS_CODE`,
//! which take precedence over the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credential_manager::{CredentialManager, DEFAULT_EXCHANGE_TIMEOUT};
use crate::exchange::OAuth2ExchangeClient;
use crate::provider::ProviderConfig;
use crate::store::{Secret, SecretStore, StoreBackend};
use crate::token_store::SecretTokenStore;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("platform configuration directory not available")]
    DirUnavailable,
}

/// Application credentials and the one-time access code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: Secret,

    /// Code pasted after visiting the authorization URL. Only consulted while
    /// no token is stored.
    #[serde(default)]
    pub access_code: Option<Secret>,
}

/// How files map onto the Dropbox account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Folder inside the app folder that holds all targets.
    #[serde(default)]
    pub prefix: String,

    /// Serve files through public shared links.
    #[serde(default)]
    pub public: bool,
}

/// Where tokens are persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Defaults to the platform data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Upper bound for `expiry_buffer_secs`: the lifetime of a Dropbox access
/// token. A larger buffer would treat every token as stale.
pub const MAX_EXPIRY_BUFFER_SECS: i64 = 4 * 60 * 60;

/// Credential manager tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "default_exchange_timeout_secs")]
    pub exchange_timeout_secs: u64,

    /// Refresh this many seconds before the token actually expires.
    #[serde(default)]
    pub expiry_buffer_secs: i64,
}

impl ManagerConfig {
    /// The buffer as a duration, clamped to `0..=MAX_EXPIRY_BUFFER_SECS`.
    pub fn expiry_buffer(&self) -> chrono::Duration {
        let secs = self.expiry_buffer_secs.clamp(0, MAX_EXPIRY_BUFFER_SECS);
        chrono::Duration::try_seconds(secs).unwrap_or_else(chrono::Duration::zero)
    }
}

fn default_exchange_timeout_secs() -> u64 {
    DEFAULT_EXCHANGE_TIMEOUT.as_secs()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_secs: default_exchange_timeout_secs(),
            expiry_buffer_secs: 0,
        }
    }
}

/// Complete Dropkeep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Name of the credential target; one stored token per target.
    #[serde(default = "default_target")]
    pub target: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub credentials: CredentialConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub manager: ManagerConfig,

    /// Path the settings were loaded from.
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_target() -> String {
    "default".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target: default_target(),
            log_level: default_log_level(),
            credentials: CredentialConfig::default(),
            storage: StorageConfig::default(),
            store: StoreConfig::default(),
            manager: ManagerConfig::default(),
            config_path: PathBuf::new(),
        }
    }
}

impl Settings {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields defaults; environment overrides are applied
    /// either way.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        let mut settings = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(|source| {
                ConfigError::Io {
                    path: config_path.clone(),
                    source,
                }
            })?;
            Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
                path: config_path.clone(),
                source,
            })?
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", config_path);
            Self::default()
        };

        settings.config_path = config_path;
        settings.apply_env(|name| std::env::var(name).ok());
        Ok(settings)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply `DROPKEEP_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("DROPKEEP_CLIENT_ID") {
            self.credentials.client_id = id;
        }
        if let Some(secret) = lookup("DROPKEEP_CLIENT_SECRET") {
            self.credentials.client_secret = Secret::new(secret);
        }
        if let Some(code) = lookup("DROPKEEP_ACCESS_CODE") {
            self.credentials.access_code = Some(Secret::new(code));
        }
    }

    /// Reject settings the manager cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "please enter a valid client ID".to_string(),
            });
        }
        if self.credentials.client_secret.is_empty() {
            return Err(ConfigError::Invalid {
                message: "please enter a valid client secret".to_string(),
            });
        }
        if self.target.is_empty() || self.target.contains('/') {
            return Err(ConfigError::Invalid {
                message: format!("target {:?} must be a non-empty name without '/'", self.target),
            });
        }
        if self.manager.exchange_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "exchange_timeout_secs must be positive".to_string(),
            });
        }
        if !(0..=MAX_EXPIRY_BUFFER_SECS).contains(&self.manager.expiry_buffer_secs) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "expiry_buffer_secs must be between 0 and {}, got {}",
                    MAX_EXPIRY_BUFFER_SECS, self.manager.expiry_buffer_secs
                ),
            });
        }
        Ok(())
    }

    /// Directory for file-backed state.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.store.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => project_dirs()
                .map(|d| d.data_dir().to_path_buf())
                .ok_or(ConfigError::DirUnavailable),
        }
    }

    /// Exchange client for these credentials.
    pub fn exchange_client(
        &self,
        provider: ProviderConfig,
    ) -> Result<OAuth2ExchangeClient, crate::exchange::ExchangeError> {
        OAuth2ExchangeClient::new(
            provider,
            &self.credentials.client_id,
            &self.credentials.client_secret,
        )
    }

    /// Wire a credential manager from these settings.
    ///
    /// Managers built for the same target share one critical section, so
    /// calling this repeatedly still yields a single exchange per expiry.
    pub fn credential_manager<S: SecretStore + 'static>(
        &self,
        secrets: S,
        exchange: Arc<dyn crate::exchange::ExchangeClient>,
    ) -> CredentialManager {
        let store = Arc::new(SecretTokenStore::new(secrets, &self.target));
        CredentialManager::new(self.target.clone(), store, exchange)
            .with_access_code(self.credentials.access_code.clone())
            .with_exchange_timeout(std::time::Duration::from_secs(
                self.manager.exchange_timeout_secs,
            ))
            .with_expiry_buffer(self.manager.expiry_buffer())
    }
}

/// Default configuration file location.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    project_dirs()
        .map(|d| d.config_dir().join("dropkeep.toml"))
        .ok_or(ConfigError::DirUnavailable)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "dropkeep", "dropkeep")
}
