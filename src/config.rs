use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::duration::{deserialize_duration, serialize_duration};
use crate::market_data::ProviderConfig;

/// Default currency for valuations when the caller doesn't name one.
fn default_currency() -> String {
    "USD".to_string()
}

fn default_fresh_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_stale_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_cache_shards() -> usize {
    16
}

fn default_provider_attempts() -> u32 {
    3
}

fn default_provider_backoff_base() -> Duration {
    Duration::from_millis(200)
}

fn default_provider_backoff_max() -> Duration {
    Duration::from_secs(5)
}

fn default_max_connections() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_idempotency_window() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

/// Quote cache and provider retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Quotes younger than this are served without refreshing.
    #[serde(
        default = "default_fresh_ttl",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub fresh_ttl: Duration,

    /// Quotes older than this are evicted.
    #[serde(
        default = "default_stale_ttl",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub stale_ttl: Duration,

    /// Maximum number of cached assets before LRU eviction kicks in.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Number of independently locked cache shards.
    #[serde(default = "default_cache_shards")]
    pub cache_shards: usize,

    /// Attempts per provider for transient failures (first try included).
    #[serde(default = "default_provider_attempts")]
    pub provider_attempts: u32,

    #[serde(
        default = "default_provider_backoff_base",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub provider_backoff_base: Duration,

    #[serde(
        default = "default_provider_backoff_max",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub provider_backoff_max: Duration,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            fresh_ttl: default_fresh_ttl(),
            stale_ttl: default_stale_ttl(),
            cache_capacity: default_cache_capacity(),
            cache_shards: default_cache_shards(),
            provider_attempts: default_provider_attempts(),
            provider_backoff_base: default_provider_backoff_base(),
            provider_backoff_max: default_provider_backoff_max(),
        }
    }
}

/// Entity store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Keep holdings whose quantity drops to zero instead of deleting them.
    pub retain_empty_holdings: bool,

    /// Remove tags that no longer label any asset.
    #[serde(default = "default_true")]
    pub gc_orphan_tags: bool,

    /// Concurrent store operations allowed at once.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Directory for the JSON file backend. If relative, resolved from the
    /// config file location. Unset means an in-memory store.
    pub data_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retain_empty_holdings: false,
            gc_orphan_tags: default_true(),
            max_connections: default_max_connections(),
            data_dir: None,
        }
    }
}

/// RPC surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// How long a response is replayed for a repeated idempotency key.
    #[serde(
        default = "default_idempotency_window",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub idempotency_window: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            idempotency_window: default_idempotency_window(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Currency for valuations (e.g., "USD").
    #[serde(default = "default_currency")]
    pub default_currency: String,

    #[serde(default)]
    pub pricing: PricingConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub rpc: RpcConfig,

    /// Quote providers. When empty, fiat assets are still priced by the
    /// built-in identity source.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_currency: default_currency(),
            pricing: PricingConfig::default(),
            store: StoreConfig::default(),
            rpc: RpcConfig::default(),
            providers: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.default_currency = config.default_currency.trim().to_uppercase();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.default_currency.trim().is_empty(),
            "default_currency must not be empty"
        );
        ensure!(
            self.pricing.fresh_ttl <= self.pricing.stale_ttl,
            "pricing.fresh_ttl must not exceed pricing.stale_ttl"
        );
        ensure!(
            self.pricing.cache_capacity >= 1,
            "pricing.cache_capacity must be at least 1"
        );
        ensure!(
            self.pricing.cache_shards >= 1,
            "pricing.cache_shards must be at least 1"
        );
        ensure!(
            self.pricing.provider_attempts >= 1,
            "pricing.provider_attempts must be at least 1"
        );
        ensure!(
            self.store.max_connections >= 1,
            "store.max_connections must be at least 1"
        );
        for provider in &self.providers {
            provider
                .validate()
                .with_context(|| format!("Invalid provider {:?}", provider.name))?;
        }
        Ok(())
    }

    /// Resolve the data directory path relative to `config_dir`.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> Option<PathBuf> {
        self.store.data_dir.as_ref().map(|data_dir| {
            if data_dir.is_absolute() {
                data_dir.clone()
            } else {
                config_dir.join(data_dir)
            }
        })
    }
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The resolved data directory, `None` for an in-memory store.
    pub data_dir: Option<PathBuf>,

    pub config: Config,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./quotebook.toml` if it exists in current directory
/// 2. `~/.config/quotebook/quotebook.toml` (XDG config directory)
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("quotebook.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("quotebook").join("quotebook.toml");
    }

    local_config
}

impl ResolvedConfig {
    /// Load and resolve config from a file path.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let config = Config::load(&config_path)?;
        Ok(Self {
            data_dir: config.resolve_data_dir(config_dir),
            config,
        })
    }

    /// Defaults only; in-memory store.
    pub fn in_memory(config: Config) -> Self {
        Self {
            data_dir: None,
            config,
        }
    }
}
