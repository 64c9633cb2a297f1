//! Alpha Vantage equity price provider.
//!
//! Uses the `GLOBAL_QUOTE` endpoint for the latest trade price.
//! Note: Free tier is limited to 25 requests/day.

use std::str::FromStr;

use chrono::{NaiveDate, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::credentials::ProviderCredentials;
use crate::market_data::{ProviderError, ProviderQuote, QuoteProvider};
use crate::models::{Asset, AssetKind};

const BASE_URL: &str = "https://www.alphavantage.co/query";

/// Credential key holding the API key.
pub const API_KEY: &str = "api_key";

pub struct AlphaVantageProvider {
    name: String,
    client: Client,
    base_url: String,
    quote_currency: String,
    credentials: ProviderCredentials,
}

impl AlphaVantageProvider {
    /// The API key is read through `credentials` under this provider's name.
    pub fn new(credentials: ProviderCredentials) -> Self {
        Self::with_client(credentials, Client::new())
    }

    pub fn with_client(credentials: ProviderCredentials, client: Client) -> Self {
        Self {
            name: "alpha_vantage".to_string(),
            client,
            base_url: BASE_URL.to_string(),
            quote_currency: "USD".to_string(),
            credentials,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_quote_currency(mut self, currency: impl Into<String>) -> Self {
        self.quote_currency = currency.into().trim().to_uppercase();
        self
    }

    fn parse(&self, symbol: &str, text: &str) -> Result<ProviderQuote, ProviderError> {
        let body: QuoteResponse = serde_json::from_str(text)
            .map_err(|e| ProviderError::rejected(&self.name, format!("malformed response: {e}")))?;

        if let Some(msg) = body.error_message {
            return Err(ProviderError::rejected(&self.name, msg));
        }
        // Rate limiting comes back as 200 with a note.
        if let Some(note) = body.note.or(body.information) {
            return Err(ProviderError::transient(&self.name, note));
        }

        let quote = match body.global_quote {
            Some(quote) if quote.price.is_some() => quote,
            _ => return Err(ProviderError::not_covered(&self.name, symbol)),
        };
        let raw_price = quote.price.unwrap_or_default();
        let price = Decimal::from_str(raw_price.trim()).map_err(|_| {
            ProviderError::rejected(&self.name, format!("unparseable price {raw_price:?}"))
        })?;
        let trading_day = quote
            .latest_trading_day
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .ok_or_else(|| ProviderError::rejected(&self.name, "missing latest trading day"))?;
        let as_of = Utc.from_utc_datetime(&trading_day.and_hms_opt(0, 0, 0).unwrap_or_default());

        Ok(ProviderQuote::new(price, self.quote_currency.clone(), as_of))
    }
}

#[async_trait::async_trait]
impl QuoteProvider for AlphaVantageProvider {
    async fn fetch_quote(&self, asset: &Asset) -> Result<ProviderQuote, ProviderError> {
        if asset.kind != AssetKind::Equity {
            return Err(ProviderError::not_covered(&self.name, &asset.symbol));
        }
        let api_key = self
            .credentials
            .get(&self.name, API_KEY)
            .await
            .map_err(|e| ProviderError::rejected(&self.name, format!("{e:#}")))?;

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", asset.symbol.as_str()),
                ("apikey", api_key.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&self.name, &e))?;

        let status = response.status();
        if !status.is_success() {
            if matches!(status.as_u16(), 401 | 403) {
                self.credentials.refresh(&self.name).await;
            }
            return Err(ProviderError::from_status(&self.name, status.as_u16()));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::from_reqwest(&self.name, &e))?;
        self.parse(&asset.symbol, &text)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,

    #[serde(rename = "Error Message")]
    error_message: Option<String>,

    #[serde(rename = "Note")]
    note: Option<String>,

    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "05. price")]
    price: Option<String>,

    #[serde(rename = "07. latest trading day")]
    latest_trading_day: Option<String>,
}
