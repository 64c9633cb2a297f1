use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use super::providers::{IdentityProvider, StaticPriceProvider};
use super::{PriceSourceAdapter, ProviderConfig, ProviderType, QuoteProvider, RetryPolicy};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::credentials::{CredentialStore, ProviderCredentials};
use crate::models::AssetKind;

/// Builds a [`PriceSourceAdapter`] from configured providers.
///
/// Enabled providers are routed by kind in priority order. Fiat falls back
/// to the identity provider when nothing else covers it.
pub struct AdapterBuilder {
    providers: Vec<ProviderConfig>,
    retry: RetryPolicy,
    default_currency: String,
    credentials: Option<ProviderCredentials>,
    clock: Arc<dyn Clock>,
    #[cfg(feature = "http-providers")]
    client: Option<reqwest::Client>,
}

impl AdapterBuilder {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self {
            providers,
            retry: RetryPolicy::default(),
            default_currency: "USD".to_string(),
            credentials: None,
            clock: Arc::new(SystemClock),
            #[cfg(feature = "http-providers")]
            client: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.providers.clone())
            .with_retry(RetryPolicy::from_config(&config.pricing))
            .with_default_currency(config.default_currency.clone())
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Quote currency for providers that don't name one.
    pub fn with_default_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into();
        self
    }

    /// Use an existing credential cache instead of one built from the
    /// provider entries.
    pub fn with_credentials(mut self, credentials: ProviderCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[cfg(feature = "http-providers")]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Credential cache covering every enabled provider with a
    /// `credentials` table.
    pub fn credentials_for(providers: &[ProviderConfig]) -> ProviderCredentials {
        let stores: HashMap<String, Arc<dyn CredentialStore>> = providers
            .iter()
            .filter(|p| p.enabled)
            .filter_map(|p| Some((p.name.clone(), p.credentials.as_ref()?.build())))
            .collect();
        ProviderCredentials::new(stores)
    }

    /// Returns the adapter and the credential cache its providers read from.
    pub fn build(self) -> Result<(PriceSourceAdapter, ProviderCredentials)> {
        let credentials = match &self.credentials {
            Some(credentials) => credentials.clone(),
            None => Self::credentials_for(&self.providers),
        };

        let mut enabled: Vec<&ProviderConfig> =
            self.providers.iter().filter(|p| p.enabled).collect();
        enabled.sort_by_key(|p| p.priority);

        let mut adapter = PriceSourceAdapter::new(self.retry).with_clock(Arc::clone(&self.clock));
        let mut fiat_routed = false;
        for config in enabled {
            config.validate()?;
            let provider = self.provider(config, &credentials)?;
            for kind in config.effective_kinds() {
                fiat_routed |= kind == AssetKind::Fiat;
                debug!(provider = %config.name, kind = %kind, priority = config.priority, "routing provider");
                adapter = adapter.with_provider(kind, Arc::clone(&provider));
            }
        }
        if !fiat_routed {
            adapter = adapter.with_provider(
                AssetKind::Fiat,
                Arc::new(IdentityProvider::new().with_clock(Arc::clone(&self.clock))),
            );
        }

        info!(
            fiat = ?adapter.route(AssetKind::Fiat),
            equity = ?adapter.route(AssetKind::Equity),
            crypto = ?adapter.route(AssetKind::Crypto),
            other = ?adapter.route(AssetKind::Other),
            "quote providers configured"
        );
        Ok((adapter, credentials))
    }

    fn provider(
        &self,
        config: &ProviderConfig,
        credentials: &ProviderCredentials,
    ) -> Result<Arc<dyn QuoteProvider>> {
        let currency = config
            .quote_currency
            .clone()
            .unwrap_or_else(|| self.default_currency.clone());
        let provider: Arc<dyn QuoteProvider> = match config.provider_type {
            ProviderType::Identity => Arc::new(
                IdentityProvider::new()
                    .with_name(config.name.clone())
                    .with_clock(Arc::clone(&self.clock)),
            ),
            ProviderType::Static => Arc::new(
                StaticPriceProvider::new(config.name.clone(), currency)
                    .with_prices(&config.prices)
                    .with_clock(Arc::clone(&self.clock)),
            ),
            #[cfg(feature = "http-providers")]
            ProviderType::Coingecko => {
                let mut provider = super::providers::CoinGeckoProvider::with_client(self.http_client())
                    .with_name(config.name.clone())
                    .with_quote_currency(currency)
                    .with_coin_ids(&config.coin_ids)
                    .with_clock(Arc::clone(&self.clock));
                if let Some(base_url) = &config.base_url {
                    provider = provider.with_base_url(base_url.clone());
                }
                Arc::new(provider)
            }
            #[cfg(feature = "http-providers")]
            ProviderType::AlphaVantage => {
                let mut provider = super::providers::AlphaVantageProvider::with_client(
                    credentials.clone(),
                    self.http_client(),
                )
                .with_name(config.name.clone())
                .with_quote_currency(currency);
                if let Some(base_url) = &config.base_url {
                    provider = provider.with_base_url(base_url.clone());
                }
                Arc::new(provider)
            }
            #[cfg(not(feature = "http-providers"))]
            ProviderType::Coingecko | ProviderType::AlphaVantage => {
                let _ = credentials;
                anyhow::bail!(
                    "Provider {} needs the http-providers feature",
                    config.name
                )
            }
        };
        Ok(provider)
    }

    #[cfg(feature = "http-providers")]
    fn http_client(&self) -> reqwest::Client {
        self.client.clone().unwrap_or_default()
    }
}
