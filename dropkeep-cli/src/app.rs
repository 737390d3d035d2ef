//! Wiring from settings to the core services.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use dropkeep_core::{
    CredentialManager, DropboxClient, NoopMaterializer, OAuth2ExchangeClient, SecretStore,
    Settings, StorageFacade, StoreBackend, create_store, provider::ProviderConfig,
    token_store::token_key,
};

/// Settings plus the choices made on the command line.
pub struct App {
    pub settings: Settings,
    ephemeral: bool,
}

impl App {
    pub fn load(config: Option<&Path>, ephemeral: bool) -> Result<Self> {
        let settings = Settings::load(config).context("Failed to load configuration")?;
        Ok(Self {
            settings,
            ephemeral,
        })
    }

    /// Backend actually used: `--ephemeral` forces memory.
    pub fn backend(&self) -> StoreBackend {
        if self.ephemeral {
            StoreBackend::Memory
        } else {
            self.settings.store.backend
        }
    }

    pub fn secret_store(&self) -> Result<Box<dyn SecretStore>> {
        let backend = self.backend();
        let data_dir = match backend {
            StoreBackend::Memory => PathBuf::new(),
            _ => self
                .settings
                .data_dir()
                .context("Failed to determine data directory")?,
        };

        create_store(backend, &data_dir)
            .with_context(|| format!("Failed to open {:?} secret store in {:?}", backend, data_dir))
    }

    pub fn exchange(&self) -> Result<OAuth2ExchangeClient> {
        if self.settings.credentials.client_id.trim().is_empty() {
            bail!(
                "No client ID configured; set credentials.client_id in {:?} or DROPKEEP_CLIENT_ID",
                self.settings.config_path
            );
        }

        self.settings
            .exchange_client(ProviderConfig::dropbox())
            .context("Failed to create OAuth client")
    }

    pub fn manager(&self) -> Result<Arc<CredentialManager>> {
        self.settings
            .validate()
            .with_context(|| format!("Invalid configuration in {:?}", self.settings.config_path))?;

        let exchange = Arc::new(self.exchange()?);
        let secrets = self.secret_store()?;
        Ok(Arc::new(self.settings.credential_manager(secrets, exchange)))
    }

    pub fn facade(&self) -> Result<StorageFacade> {
        Ok(StorageFacade::new(
            self.manager()?,
            Arc::new(DropboxClient::new()),
            Arc::new(NoopMaterializer),
            self.settings.storage.clone(),
        ))
    }

    /// Delete the stored token for the configured target.
    ///
    /// Returns whether a token was stored.
    pub async fn forget(&self) -> Result<bool> {
        let secrets = self.secret_store()?;
        let key = token_key(&self.settings.target);

        let existed = secrets
            .exists(&key)
            .await
            .with_context(|| format!("Failed to read {}", key))?;
        if existed {
            secrets
                .delete(&key)
                .await
                .with_context(|| format!("Failed to delete {}", key))?;
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropkeep_core::{SecretTokenStore, Token, TokenStore};

    fn app_in(dir: &Path) -> App {
        let config = dir.join("dropkeep.toml");
        std::fs::write(
            &config,
            format!(
                r#"
                target = "cli-test"

                [credentials]
                client_id = "app-key"
                client_secret = "app-secret"

                [store]
                backend = "file"
                data_dir = {:?}
                "#,
                dir.join("data")
            ),
        )
        .unwrap();

        let mut app = App::load(Some(&config), false).unwrap();
        // Keep the developer's environment out of the test.
        app.settings.credentials.client_id = "app-key".to_string();
        app
    }

    #[test]
    fn test_ephemeral_forces_memory() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::load(Some(&dir.path().join("none.toml")), true).unwrap();
        assert_eq!(app.settings.store.backend, StoreBackend::File);
        assert_eq!(app.backend(), StoreBackend::Memory);
    }

    #[tokio::test]
    async fn test_forget_removes_stored_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_in(dir.path());

        let tokens = SecretTokenStore::new(app.secret_store().unwrap(), "cli-test");
        tokens.set(&Token::new("stored")).await.unwrap();

        assert!(app.forget().await.unwrap());
        assert!(!app.forget().await.unwrap());

        let tokens = SecretTokenStore::new(app.secret_store().unwrap(), "cli-test");
        assert!(tokens.get().await.unwrap().is_none());
    }

    #[test]
    fn test_exchange_requires_client_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in(dir.path());
        app.settings.credentials.client_id.clear();

        assert!(app.exchange().is_err());
    }
}
