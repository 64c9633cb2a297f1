#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use quotebook::clock::MockClock;
use quotebook::context::RequestContext;
use quotebook::market_data::providers::IdentityProvider;
use quotebook::market_data::{
    CacheSettings, PriceCache, PriceSourceAdapter, ProviderError, ProviderQuote, QuoteProvider,
    RetryPolicy,
};
use quotebook::models::{Asset, AssetKind};
use quotebook::rpc::QuotebookServer;
use quotebook::services::{AssetService, PricingService, UserService};
use quotebook::storage::{EntityStore, StoreOptions};
use rust_decimal::Decimal;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 14, 30, 0).unwrap()
}

pub fn ctx() -> RequestContext {
    RequestContext::background()
}

/// Scriptable quote provider that counts calls.
#[derive(Default)]
pub struct MockQuoteProvider {
    name: String,
    prices: Mutex<HashMap<String, (Decimal, String, DateTime<Utc>)>>,
    failures: Mutex<VecDeque<ProviderError>>,
    fail_always: Mutex<Option<ProviderError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockQuoteProvider {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_price(self, symbol: &str, price: Decimal, currency: &str) -> Self {
        self.set_price(symbol, price, currency, t0());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next call with `err`, then behave normally.
    pub fn fail_next(&self, err: ProviderError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn fail_always(&self, err: Option<ProviderError>) {
        *self.fail_always.lock().unwrap() = err;
    }

    pub fn set_price(&self, symbol: &str, price: Decimal, currency: &str, as_of: DateTime<Utc>) {
        self.prices
            .lock()
            .unwrap()
            .insert(symbol.to_string(), (price, currency.to_string(), as_of));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteProvider for MockQuoteProvider {
    async fn fetch_quote(&self, asset: &Asset) -> Result<ProviderQuote, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some(err) = self.fail_always.lock().unwrap().clone() {
            return Err(err);
        }
        let prices = self.prices.lock().unwrap();
        match prices.get(&asset.symbol) {
            Some((price, currency, as_of)) => Ok(ProviderQuote::new(*price, currency.clone(), *as_of)),
            None => Err(ProviderError::not_covered(&self.name, &asset.symbol)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A wired store, cache and service set around one mock provider.
pub struct Harness {
    pub store: EntityStore,
    pub cache: PriceCache,
    pub users: UserService,
    pub assets: AssetService,
    pub pricing: PricingService,
    pub clock: Arc<MockClock>,
    pub provider: Arc<MockQuoteProvider>,
}

impl Harness {
    pub fn new(provider: MockQuoteProvider) -> Self {
        Self::with_settings(provider, CacheSettings::default(), StoreOptions::default())
    }

    pub fn with_settings(
        provider: MockQuoteProvider,
        settings: CacheSettings,
        options: StoreOptions,
    ) -> Self {
        let clock = Arc::new(MockClock::new(t0()));
        let provider = Arc::new(provider);
        let adapter = PriceSourceAdapter::new(RetryPolicy::no_retry())
            .with_clock(clock.clone())
            .with_provider(AssetKind::Equity, provider.clone())
            .with_provider(AssetKind::Crypto, provider.clone())
            .with_provider(AssetKind::Other, provider.clone())
            .with_provider(
                AssetKind::Fiat,
                Arc::new(IdentityProvider::new().with_clock(clock.clone())),
            );
        let cache = PriceCache::with_clock(Arc::new(adapter), settings, clock.clone());
        let store = EntityStore::in_memory(options);
        Self {
            users: UserService::new(store.clone()),
            assets: AssetService::new(store.clone()),
            pricing: PricingService::new(store.clone(), cache.clone(), "USD"),
            store,
            cache,
            clock,
            provider,
        }
    }

    pub fn server(&self, idempotency_window: Duration) -> QuotebookServer {
        QuotebookServer::new(
            self.users.clone(),
            self.assets.clone(),
            self.pricing.clone(),
            idempotency_window,
        )
    }
}
