use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::clock::{Clock, SystemClock};
use crate::market_data::{ProviderError, ProviderQuote, QuoteProvider};
use crate::models::Asset;

/// Serves prices from a fixed symbol table.
///
/// Every quote carries the same `as_of`: the moment the table was loaded,
/// unless overridden.
pub struct StaticPriceProvider {
    name: String,
    prices: HashMap<String, Decimal>,
    currency: String,
    as_of: Option<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl StaticPriceProvider {
    pub fn new(name: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prices: HashMap::new(),
            currency: currency.into().trim().to_uppercase(),
            as_of: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_price(mut self, symbol: &str, price: Decimal) -> Self {
        self.prices.insert(symbol.trim().to_uppercase(), price);
        self
    }

    pub fn with_prices<'a>(mut self, prices: impl IntoIterator<Item = (&'a String, &'a Decimal)>) -> Self {
        for (symbol, price) in prices {
            self.prices.insert(symbol.trim().to_uppercase(), *price);
        }
        self
    }

    pub fn with_as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait::async_trait]
impl QuoteProvider for StaticPriceProvider {
    async fn fetch_quote(&self, asset: &Asset) -> Result<ProviderQuote, ProviderError> {
        let Some(price) = self.prices.get(&asset.symbol) else {
            return Err(ProviderError::not_covered(&self.name, &asset.symbol));
        };
        let as_of = self.as_of.unwrap_or_else(|| self.clock.now());
        Ok(ProviderQuote::new(*price, self.currency.clone(), as_of))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
