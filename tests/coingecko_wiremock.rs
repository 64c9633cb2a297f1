use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use quotebook::market_data::providers::CoinGeckoProvider;
use quotebook::market_data::{ProviderError, QuoteProvider};
use quotebook::models::{Asset, AssetKind, Id};
use rust_decimal_macros::dec;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn asset(symbol: &str, kind: AssetKind) -> Asset {
    Asset::new(Id::from_string(symbol.to_lowercase()), symbol, kind, Utc::now()).unwrap()
}

#[tokio::test]
async fn coingecko_simple_price_hits_mock_server() -> Result<()> {
    let server = MockServer::start().await;
    let provider = CoinGeckoProvider::new().with_base_url(server.uri());

    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .and(query_param("ids", "bitcoin"))
        .and(query_param("vs_currencies", "usd"))
        .and(query_param("include_last_updated_at", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"bitcoin": {"usd": 64123.45, "last_updated_at": 1717425000}}"#,
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let quote = provider.fetch_quote(&asset("BTC", AssetKind::Crypto)).await?;
    assert_eq!(quote.price, dec!(64123.45));
    assert_eq!(quote.currency, "USD");
    assert_eq!(quote.as_of, Utc.timestamp_opt(1717425000, 0).unwrap());
    Ok(())
}

#[tokio::test]
async fn coingecko_uses_configured_coin_ids_and_currency() -> Result<()> {
    let server = MockServer::start().await;
    let provider = CoinGeckoProvider::new()
        .with_base_url(server.uri())
        .with_quote_currency("EUR")
        .with_coin_ids(&BTreeMap::from([("wif".to_string(), "dogwifcoin".to_string())]));

    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .and(query_param("ids", "dogwifcoin"))
        .and(query_param("vs_currencies", "eur"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"dogwifcoin": {"eur": 1.5e-3}}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let quote = provider.fetch_quote(&asset("WIF", AssetKind::Crypto)).await?;
    assert_eq!(quote.price, dec!(0.0015));
    assert_eq!(quote.currency, "EUR");
    Ok(())
}

#[tokio::test]
async fn coingecko_unknown_coin_is_not_covered() -> Result<()> {
    let server = MockServer::start().await;
    let provider = CoinGeckoProvider::new().with_base_url(server.uri());

    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .mount(&server)
        .await;

    let err = provider
        .fetch_quote(&asset("NOTACOIN", AssetKind::Crypto))
        .await
        .unwrap_err();
    assert!(err.is_not_covered());
    Ok(())
}

#[tokio::test]
async fn coingecko_rate_limit_is_transient() -> Result<()> {
    let server = MockServer::start().await;
    let provider = CoinGeckoProvider::new().with_base_url(server.uri());

    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = provider
        .fetch_quote(&asset("ETH", AssetKind::Crypto))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Transient { .. }));
    Ok(())
}

#[tokio::test]
async fn coingecko_skips_non_crypto_without_http() -> Result<()> {
    let server = MockServer::start().await;
    let provider = CoinGeckoProvider::new().with_base_url(server.uri());

    let err = provider
        .fetch_quote(&asset("AAPL", AssetKind::Equity))
        .await
        .unwrap_err();
    assert!(err.is_not_covered());

    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.is_empty(), "expected no HTTP requests");
    Ok(())
}
