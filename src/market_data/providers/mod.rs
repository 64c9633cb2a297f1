//! Built-in quote providers.

mod identity;
mod static_table;

#[cfg(feature = "http-providers")]
pub mod alpha_vantage;
#[cfg(feature = "http-providers")]
pub mod coingecko;

pub use identity::IdentityProvider;
pub use static_table::StaticPriceProvider;

#[cfg(feature = "http-providers")]
pub use alpha_vantage::AlphaVantageProvider;
#[cfg(feature = "http-providers")]
pub use coingecko::CoinGeckoProvider;
