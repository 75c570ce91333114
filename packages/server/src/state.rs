use std::sync::Arc;

use anyhow::Context;
use common::storage::BlobStore;
use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::services::{DocumentRegistry, UserDirectory};
use crate::utils::hash::PasswordHasher;
use crate::utils::jwt::TokenService;
use crate::utils::oauth::{IdentityProvider, OAuthProvider};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub blob_store: Arc<dyn BlobStore>,
    pub tokens: TokenService,
    pub hasher: PasswordHasher,
    /// `None` when external login is not configured.
    pub identity_provider: Option<Arc<dyn IdentityProvider>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DatabaseConnection,
        blob_store: Arc<dyn BlobStore>,
    ) -> anyhow::Result<Self> {
        let hasher =
            PasswordHasher::new(config.auth.argon2).context("invalid auth.argon2 settings")?;
        let tokens = TokenService::new(
            &config.auth.jwt_secret,
            chrono::Duration::minutes(config.auth.token_ttl_minutes),
        );
        let identity_provider = match &config.oauth {
            Some(oauth) => Some(Arc::new(
                OAuthProvider::new(oauth.clone()).context("failed to build OAuth client")?,
            ) as Arc<dyn IdentityProvider>),
            None => None,
        };

        Ok(Self {
            db,
            config: Arc::new(config),
            blob_store,
            tokens,
            hasher,
            identity_provider,
        })
    }

    /// Swap the identity provider, e.g. for a stub in tests.
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    pub fn users(&self) -> UserDirectory<'_, DatabaseConnection> {
        UserDirectory::new(&self.db, self.hasher, &*self.blob_store)
    }

    pub fn documents(&self) -> DocumentRegistry<'_, DatabaseConnection> {
        DocumentRegistry::new(&self.db, &*self.blob_store, &self.config.storage)
    }
}
