//! CoinGecko crypto price provider.
//!
//! Uses the free `/simple/price` endpoint. No API key is required, though
//! rate limits apply.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use chrono::DateTime;
use reqwest::Client;
use rust_decimal::Decimal;

use crate::clock::{Clock, SystemClock};
use crate::market_data::{ProviderError, ProviderQuote, QuoteProvider};
use crate::models::{Asset, AssetKind};

const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";

/// `/simple/price` answers `{ "<coin id>": { "<currency>": price, "last_updated_at": secs } }`.
type SimplePriceResponse = HashMap<String, HashMap<String, serde_json::Number>>;

pub struct CoinGeckoProvider {
    name: String,
    client: Client,
    base_url: String,
    /// Lower-case, as CoinGecko expects it.
    quote_currency: String,
    /// Symbol overrides, keyed upper-case.
    coin_ids: HashMap<String, String>,
    clock: Arc<dyn Clock>,
}

impl CoinGeckoProvider {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            name: "coingecko".to_string(),
            client,
            base_url: COINGECKO_API_BASE.to_string(),
            quote_currency: "usd".to_string(),
            coin_ids: HashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_quote_currency(mut self, currency: impl Into<String>) -> Self {
        self.quote_currency = currency.into().trim().to_lowercase();
        self
    }

    pub fn with_coin_ids(mut self, coin_ids: &BTreeMap<String, String>) -> Self {
        for (symbol, id) in coin_ids {
            self.coin_ids.insert(symbol.to_uppercase(), id.clone());
        }
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Overrides first, then the built-in table, then the lower-cased
    /// symbol itself.
    fn coin_id(&self, symbol: &str) -> String {
        let symbol = symbol.to_uppercase();
        if let Some(id) = self.coin_ids.get(&symbol) {
            return id.clone();
        }
        let id = match symbol.as_str() {
            "BTC" => "bitcoin",
            "ETH" => "ethereum",
            "USDT" => "tether",
            "USDC" => "usd-coin",
            "BNB" => "binancecoin",
            "XRP" => "ripple",
            "ADA" => "cardano",
            "DOGE" => "dogecoin",
            "SOL" => "solana",
            "DOT" => "polkadot",
            "MATIC" | "POL" => "matic-network",
            "LTC" => "litecoin",
            "TRX" => "tron",
            "AVAX" => "avalanche-2",
            "DAI" => "dai",
            "LINK" => "chainlink",
            "ATOM" => "cosmos",
            "UNI" => "uniswap",
            "XLM" => "stellar",
            "BCH" => "bitcoin-cash",
            "ARB" => "arbitrum",
            "OP" => "optimism",
            "XMR" => "monero",
            "WBTC" => "wrapped-bitcoin",
            "WETH" => "weth",
            "STETH" => "staked-ether",
            _ => return symbol.to_lowercase(),
        };
        id.to_string()
    }

    async fn request(&self, coin_id: &str) -> Result<SimplePriceResponse, ProviderError> {
        let url = format!("{}/simple/price", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("ids", coin_id),
                ("vs_currencies", self.quote_currency.as_str()),
                ("include_last_updated_at", "true"),
            ])
            .header("Accept", "application/json")
            .header("User-Agent", concat!("quotebook/", env!("CARGO_PKG_VERSION")))
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&self.name, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(&self.name, status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::rejected(&self.name, format!("malformed response: {e}")))
    }
}

impl Default for CoinGeckoProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_decimal(number: &serde_json::Number) -> Option<Decimal> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

#[async_trait::async_trait]
impl QuoteProvider for CoinGeckoProvider {
    async fn fetch_quote(&self, asset: &Asset) -> Result<ProviderQuote, ProviderError> {
        if asset.kind != AssetKind::Crypto {
            return Err(ProviderError::not_covered(&self.name, &asset.symbol));
        }
        let coin_id = self.coin_id(&asset.symbol);
        let data = self.request(&coin_id).await?;

        let Some(fields) = data.get(&coin_id) else {
            return Err(ProviderError::not_covered(&self.name, &asset.symbol));
        };
        let price = fields
            .get(&self.quote_currency)
            .ok_or_else(|| {
                ProviderError::rejected(
                    &self.name,
                    format!("no {} price for {coin_id}", self.quote_currency),
                )
            })
            .and_then(|n| {
                parse_decimal(n).ok_or_else(|| {
                    ProviderError::rejected(&self.name, format!("unparseable price {n}"))
                })
            })?;
        let as_of = fields
            .get("last_updated_at")
            .and_then(serde_json::Number::as_i64)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(|| self.clock.now());

        Ok(ProviderQuote::new(price, self.quote_currency.to_uppercase(), as_of))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coin_id_common_symbols() {
        let provider = CoinGeckoProvider::new();
        assert_eq!(provider.coin_id("BTC"), "bitcoin");
        assert_eq!(provider.coin_id("btc"), "bitcoin");
        assert_eq!(provider.coin_id("AVAX"), "avalanche-2");
        assert_eq!(provider.coin_id("UNKNOWN123"), "unknown123");
    }

    #[test]
    fn test_override_beats_builtin() {
        let overrides = BTreeMap::from([("btc".to_string(), "wrapped-bitcoin".to_string())]);
        let provider = CoinGeckoProvider::new().with_coin_ids(&overrides);
        assert_eq!(provider.coin_id("BTC"), "wrapped-bitcoin");
        assert_eq!(provider.coin_id("ETH"), "ethereum");
    }

    #[test]
    fn test_parse_simple_price_payload() {
        let payload: SimplePriceResponse = serde_json::from_str(
            r#"{"bitcoin":{"usd":64123.5,"last_updated_at":1767225600}}"#,
        )
        .unwrap();
        let fields = &payload["bitcoin"];
        assert_eq!(parse_decimal(&fields["usd"]), Decimal::from_str("64123.5").ok());
        assert_eq!(fields["last_updated_at"].as_i64(), Some(1_767_225_600));
    }

    #[test]
    fn test_quote_currency_lowercased() {
        let provider = CoinGeckoProvider::new().with_quote_currency(" EUR ");
        assert_eq!(provider.quote_currency, "eur");
    }
}
