use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::{ProviderError, ProviderQuote, Quote, QuoteProvider, RetryClass, RetryPolicy};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::models::{Asset, AssetKind};

/// Anything that can produce a fresh quote for an asset.
///
/// The price cache refreshes through this seam.
#[async_trait::async_trait]
pub trait QuoteFetcher: Send + Sync {
    async fn fetch_quote(&self, asset: &Asset) -> Result<Quote>;
}

/// Fans a quote request out to the providers routed for the asset's kind
/// and merges their answers into one [`Quote`].
///
/// Routes are ordered; the first provider of a route is its primary.
pub struct PriceSourceAdapter {
    routes: HashMap<AssetKind, Vec<Arc<dyn QuoteProvider>>>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl PriceSourceAdapter {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            routes: HashMap::new(),
            retry,
            clock: Arc::new(SystemClock),
        }
    }

    /// Append `provider` to the route for `kind`.
    pub fn with_provider(mut self, kind: AssetKind, provider: Arc<dyn QuoteProvider>) -> Self {
        self.routes.entry(kind).or_default().push(provider);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn route(&self, kind: AssetKind) -> Vec<&str> {
        self.routes
            .get(&kind)
            .map(|providers| providers.iter().map(|p| p.name()).collect())
            .unwrap_or_default()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Query every routed provider concurrently and merge.
    ///
    /// The most recent `as_of` wins; ties go to the provider earliest in the
    /// route. `NOT_FOUND` only when every provider reports no coverage,
    /// `UNAVAILABLE` for any other total failure.
    pub async fn fetch(&self, asset: &Asset) -> Result<Quote> {
        let providers = match self.routes.get(&asset.kind) {
            Some(providers) if !providers.is_empty() => providers,
            _ => {
                return Err(Error::not_found(format!(
                    "no quote provider configured for {} assets",
                    asset.kind
                )))
            }
        };

        debug!(
            asset_id = %asset.id,
            symbol = %asset.symbol,
            providers = providers.len(),
            "fetching quote"
        );

        let outcomes = join_all(
            providers
                .iter()
                .map(|provider| self.fetch_with_retry(provider.as_ref(), asset)),
        )
        .await;

        let mut best: Option<(usize, ProviderQuote)> = None;
        let mut errors = Vec::new();
        for (rank, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(quote) => {
                    let better = match &best {
                        None => true,
                        Some((_, current)) => quote.as_of > current.as_of,
                    };
                    if better {
                        best = Some((rank, quote));
                    }
                }
                Err(err) => errors.push(err),
            }
        }

        if let Some((rank, quote)) = best {
            let source = providers[rank].name().to_string();
            info!(
                asset_id = %asset.id,
                symbol = %asset.symbol,
                price = %quote.price,
                currency = %quote.currency,
                as_of = %quote.as_of,
                source = %source,
                "quote fetched"
            );
            return Ok(Quote {
                asset_id: asset.id.clone(),
                price: quote.price,
                currency: quote.currency,
                as_of: quote.as_of,
                received_at: self.clock.now(),
                source,
            });
        }

        let summary = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        if errors.iter().all(ProviderError::is_not_covered) {
            Err(Error::not_found(format!(
                "no provider covers {}: {summary}",
                asset.symbol
            )))
        } else {
            Err(Error::unavailable(format!(
                "no quote for {}: {summary}",
                asset.symbol
            )))
        }
    }

    async fn fetch_with_retry(
        &self,
        provider: &dyn QuoteProvider,
        asset: &Asset,
    ) -> std::result::Result<ProviderQuote, ProviderError> {
        let attempts = self.retry.attempts.max(1);
        let mut retry = 0;
        loop {
            let err = match provider.fetch_quote(asset).await {
                Ok(quote) => return normalize(provider.name(), quote),
                Err(err) => err,
            };
            if err.retry_class() == RetryClass::Never || retry + 1 >= attempts {
                debug!(
                    provider = provider.name(),
                    symbol = %asset.symbol,
                    error = %err,
                    "provider gave up"
                );
                return Err(err);
            }
            let delay = self.retry.backoff.delay(retry);
            warn!(
                provider = provider.name(),
                symbol = %asset.symbol,
                attempt = retry + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient provider failure, retrying"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

fn normalize(
    provider: &str,
    mut quote: ProviderQuote,
) -> std::result::Result<ProviderQuote, ProviderError> {
    if quote.price <= Decimal::ZERO {
        return Err(ProviderError::rejected(
            provider,
            format!("non-positive price {}", quote.price),
        ));
    }
    quote.currency = quote.currency.trim().to_uppercase();
    if quote.currency.is_empty() {
        return Err(ProviderError::rejected(provider, "missing quote currency"));
    }
    Ok(quote)
}

#[async_trait::async_trait]
impl QuoteFetcher for PriceSourceAdapter {
    async fn fetch_quote(&self, asset: &Asset) -> Result<Quote> {
        self.fetch(asset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::Id;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted outcomes, repeating the last one.
    struct Scripted {
        name: &'static str,
        outcomes: Mutex<Vec<std::result::Result<ProviderQuote, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(
            name: &'static str,
            outcomes: Vec<std::result::Result<ProviderQuote, ProviderError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl QuoteProvider for Scripted {
        async fn fetch_quote(
            &self,
            _asset: &Asset,
        ) -> std::result::Result<ProviderQuote, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.remove(0)
            } else {
                outcomes[0].clone()
            }
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_780_000_000 + secs, 0).unwrap()
    }

    fn btc() -> Asset {
        Asset::new(Id::from("btc"), "BTC", AssetKind::Crypto, at(0)).unwrap()
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(1), attempts)
    }

    #[tokio::test]
    async fn test_latest_as_of_wins() {
        let primary = Scripted::new("primary", vec![Ok(ProviderQuote::new(dec!(100), "usd", at(10)))]);
        let secondary = Scripted::new("secondary", vec![Ok(ProviderQuote::new(dec!(101), "USD", at(20)))]);
        let adapter = PriceSourceAdapter::new(fast_retry(1))
            .with_provider(AssetKind::Crypto, primary)
            .with_provider(AssetKind::Crypto, secondary);

        let quote = adapter.fetch(&btc()).await.unwrap();
        assert_eq!(quote.price, dec!(101));
        assert_eq!(quote.source, "secondary");
        assert_eq!(quote.asset_id, Id::from("btc"));
    }

    #[tokio::test]
    async fn test_tie_prefers_primary() {
        let primary = Scripted::new("primary", vec![Ok(ProviderQuote::new(dec!(100), "usd", at(10)))]);
        let secondary = Scripted::new("secondary", vec![Ok(ProviderQuote::new(dec!(101), "USD", at(10)))]);
        let adapter = PriceSourceAdapter::new(fast_retry(1))
            .with_provider(AssetKind::Crypto, primary)
            .with_provider(AssetKind::Crypto, secondary);

        let quote = adapter.fetch(&btc()).await.unwrap();
        assert_eq!(quote.source, "primary");
        assert_eq!(quote.currency, "USD");
    }

    #[tokio::test]
    async fn test_transient_errors_retried_up_to_attempts() {
        let flaky = Scripted::new(
            "flaky",
            vec![
                Err(ProviderError::transient("flaky", "timeout")),
                Err(ProviderError::transient("flaky", "timeout")),
                Ok(ProviderQuote::new(dec!(5), "USD", at(1))),
            ],
        );
        let adapter =
            PriceSourceAdapter::new(fast_retry(3)).with_provider(AssetKind::Crypto, flaky.clone());
        let quote = adapter.fetch(&btc()).await.unwrap();
        assert_eq!(quote.price, dec!(5));
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_is_unavailable() {
        let down = Scripted::new("down", vec![Err(ProviderError::transient("down", "503"))]);
        let adapter =
            PriceSourceAdapter::new(fast_retry(2)).with_provider(AssetKind::Crypto, down.clone());
        let err = adapter.fetch(&btc()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(down.calls(), 2);
    }

    #[tokio::test]
    async fn test_not_covered_is_not_retried() {
        let nope = Scripted::new("nope", vec![Err(ProviderError::not_covered("nope", "BTC"))]);
        let adapter =
            PriceSourceAdapter::new(fast_retry(5)).with_provider(AssetKind::Crypto, nope.clone());
        let err = adapter.fetch(&btc()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(nope.calls(), 1);
    }

    #[tokio::test]
    async fn test_mixed_not_covered_and_transport_is_unavailable() {
        let nope = Scripted::new("nope", vec![Err(ProviderError::not_covered("nope", "BTC"))]);
        let down = Scripted::new("down", vec![Err(ProviderError::transient("down", "503"))]);
        let adapter = PriceSourceAdapter::new(fast_retry(1))
            .with_provider(AssetKind::Crypto, nope)
            .with_provider(AssetKind::Crypto, down);
        let err = adapter.fetch(&btc()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_unrouted_kind_is_not_found() {
        let adapter = PriceSourceAdapter::new(fast_retry(1));
        let err = adapter.fetch(&btc()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_non_positive_price_rejected() {
        let zero = Scripted::new("zero", vec![Ok(ProviderQuote::new(dec!(0), "USD", at(1)))]);
        let adapter = PriceSourceAdapter::new(fast_retry(3)).with_provider(AssetKind::Crypto, zero.clone());
        let err = adapter.fetch(&btc()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(zero.calls(), 1);
    }
}
