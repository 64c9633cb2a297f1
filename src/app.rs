//! Wiring from a resolved configuration to a running server.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::ResolvedConfig;
use crate::credentials::ProviderCredentials;
use crate::market_data::{AdapterBuilder, CacheSettings, PriceCache};
use crate::rpc::{IdempotencyCache, QuotebookServer};
use crate::services::{AssetService, PricingService, UserService};
use crate::storage::{EntityStore, JsonFileBackend, MemoryBackend, StorageBackend, StoreOptions};

/// A fully wired quotebook instance.
///
/// Owns the process-wide provider credentials; call [`App::shutdown`] before
/// dropping it so cached secrets are cleared and the store pool closes.
pub struct App {
    store: EntityStore,
    cache: PriceCache,
    credentials: ProviderCredentials,
    server: QuotebookServer,
}

impl App {
    pub async fn open(config: &ResolvedConfig) -> Result<Self> {
        Self::open_with(config, Arc::new(SystemClock), None).await
    }

    /// Open with an explicit clock and, optionally, pre-built credentials
    /// that replace the ones configured per provider.
    pub async fn open_with(
        config: &ResolvedConfig,
        clock: Arc<dyn Clock>,
        credentials: Option<ProviderCredentials>,
    ) -> Result<Self> {
        let settings = &config.config;
        settings.validate().context("Invalid configuration")?;

        let backend: Arc<dyn StorageBackend> = match &config.data_dir {
            Some(dir) => Arc::new(JsonFileBackend::new(dir)),
            None => Arc::new(MemoryBackend::new()),
        };
        let store = EntityStore::builder(backend)
            .with_options(StoreOptions {
                retain_empty_holdings: settings.store.retain_empty_holdings,
                gc_orphan_tags: settings.store.gc_orphan_tags,
            })
            .with_max_connections(settings.store.max_connections)
            .with_clock(clock.clone())
            .open()
            .await?;

        let mut builder = AdapterBuilder::from_config(settings).with_clock(clock.clone());
        if let Some(credentials) = credentials {
            builder = builder.with_credentials(credentials);
        }
        let (adapter, credentials) = builder.build()?;

        let cache = PriceCache::with_clock(
            Arc::new(adapter),
            CacheSettings::from_config(&settings.pricing),
            clock.clone(),
        );
        let pricing = PricingService::new(store.clone(), cache.clone(), &settings.default_currency);
        let server = QuotebookServer::with_idempotency(
            UserService::new(store.clone()),
            AssetService::new(store.clone()),
            pricing,
            IdempotencyCache::with_clock(settings.rpc.idempotency_window, clock),
        );

        info!(
            data_dir = ?config.data_dir,
            default_currency = %settings.default_currency,
            providers = settings.providers.len(),
            "quotebook ready"
        );
        Ok(Self {
            store,
            cache,
            credentials,
            server,
        })
    }

    pub fn server(&self) -> &QuotebookServer {
        &self.server
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    pub fn credentials(&self) -> &ProviderCredentials {
        &self.credentials
    }

    pub async fn shutdown(self) {
        self.credentials.shutdown().await;
        self.store.pool().close();
        info!(cached_quotes = self.cache.len(), "quotebook shut down");
    }
}
