//! Quotes: provider plumbing, the source adapter and the price cache.

mod adapter;
mod builder;
mod cache;
mod models;
mod provider;
pub mod providers;
mod retry;
mod source_config;

pub use adapter::{PriceSourceAdapter, QuoteFetcher};
pub use builder::AdapterBuilder;
pub use cache::{CacheSettings, CacheStats, Lookup, MaxStaleness, PriceCache};
pub use models::{ProviderQuote, Quote};
pub use provider::{ProviderError, QuoteProvider, RetryClass};
pub use retry::{Backoff, RetryPolicy};
pub use source_config::{ProviderConfig, ProviderType};
