//! Quote provider configuration.
//!
//! Each `[[providers]]` entry in the config file declares one provider.

use std::collections::BTreeMap;

use anyhow::{bail, ensure, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialConfig;
use crate::models::AssetKind;

/// Known provider implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Fiat assets priced at 1 in their own currency.
    Identity,
    /// Fixed price table from the config.
    Static,
    /// CoinGecko crypto prices
    Coingecko,
    /// Alpha Vantage equity prices
    AlphaVantage,
}

impl ProviderType {
    /// Whether this provider type requires credentials.
    pub fn requires_credentials(&self) -> bool {
        matches!(self, Self::AlphaVantage)
    }

    pub fn is_http(&self) -> bool {
        matches!(self, Self::Coingecko | Self::AlphaVantage)
    }

    /// Kinds routed to this provider when the entry doesn't say.
    pub fn default_kinds(&self) -> &'static [AssetKind] {
        match self {
            Self::Identity => &[AssetKind::Fiat],
            Self::Static => &AssetKind::ALL,
            Self::Coingecko => &[AssetKind::Crypto],
            Self::AlphaVantage => &[AssetKind::Equity],
        }
    }
}

/// Declared quote provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Identifier used as the quote `source` and for credential lookup.
    pub name: String,

    /// Which provider implementation to use.
    #[serde(rename = "type")]
    pub provider_type: ProviderType,

    /// Asset kinds routed to this provider. Empty means the type's defaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<AssetKind>,

    /// Whether this provider is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Route ordering (lower = higher priority). The first provider of a
    /// route is its primary.
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Override the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Currency the provider quotes in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_currency: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialConfig>,

    /// Symbol to price, for `static` providers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prices: BTreeMap<String, Decimal>,

    /// Symbol to CoinGecko coin id overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub coin_ids: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> u32 {
    100
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            name: name.into(),
            provider_type,
            kinds: Vec::new(),
            enabled: true,
            priority: default_priority(),
            base_url: None,
            quote_currency: None,
            credentials: None,
            prices: BTreeMap::new(),
            coin_ids: BTreeMap::new(),
        }
    }

    pub fn effective_kinds(&self) -> Vec<AssetKind> {
        if self.kinds.is_empty() {
            self.provider_type.default_kinds().to_vec()
        } else {
            self.kinds.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.name.trim().is_empty(), "provider name must not be empty");
        if self.provider_type.requires_credentials() && self.credentials.is_none() {
            bail!(
                "Provider type {:?} requires credentials, but none configured",
                self.provider_type
            );
        }
        if self.provider_type == ProviderType::Static {
            ensure!(!self.prices.is_empty(), "static provider needs a prices table");
            for (symbol, price) in &self.prices {
                ensure!(
                    *price > Decimal::ZERO,
                    "static price for {symbol} must be positive"
                );
            }
        }
        if let Some(currency) = &self.quote_currency {
            ensure!(!currency.trim().is_empty(), "quote_currency must not be empty");
        }
        if self.provider_type.is_http() && !cfg!(feature = "http-providers") {
            bail!(
                "Provider type {:?} needs the http-providers feature",
                self.provider_type
            );
        }
        Ok(())
    }
}
