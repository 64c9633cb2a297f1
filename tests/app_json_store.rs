use std::fs;

use anyhow::Result;
use quotebook::config::ResolvedConfig;
use quotebook::context::RequestContext;
use quotebook::models::AssetKind;
use quotebook::rpc::messages::*;
use quotebook::rpc::Code;
use quotebook::services::{AssetSelector, AssetSpec};
use quotebook::App;
use rust_decimal_macros::dec;
use tempfile::TempDir;

const CONFIG: &str = r#"
default_currency = "usd"

[store]
data_dir = "data"

[pricing]
fresh_ttl = "30s"
stale_ttl = "5m"

[[providers]]
name = "fixed"
type = "static"
kinds = ["equity", "crypto"]

[providers.prices]
BTC = "60000"
AAPL = "200"
"#;

fn write_config(dir: &TempDir) -> Result<ResolvedConfig> {
    let path = dir.path().join("quotebook.toml");
    fs::write(&path, CONFIG)?;
    ResolvedConfig::load(&path)
}

#[tokio::test]
async fn app_values_account_and_persists_entities() -> Result<()> {
    let dir = TempDir::new()?;
    let config = write_config(&dir)?;
    let ctx = RequestContext::background();

    let app = App::open(&config).await?;
    let server = app.server();
    let user = server.create_user(&ctx, CreateUserRequest::default()).await?.user;
    let account = server
        .create_account(
            &ctx,
            CreateAccountRequest {
                user_id: user.id.clone(),
                idempotency_key: None,
            },
        )
        .await?
        .account;
    for (symbol, kind, quantity) in [
        ("btc", AssetKind::Crypto, dec!(0.5)),
        ("aapl", AssetKind::Equity, dec!(10)),
        ("usd", AssetKind::Fiat, dec!(250)),
    ] {
        let asset = server
            .set_asset(
                &ctx,
                SetAssetRequest {
                    asset: AssetSpec {
                        id: None,
                        symbol: symbol.to_string(),
                        kind,
                        tags: vec!["core".to_string()],
                    },
                    idempotency_key: None,
                },
            )
            .await?
            .asset;
        server
            .upsert_holding(
                &ctx,
                UpsertHoldingRequest {
                    account_id: account.id.clone(),
                    asset_id: asset.asset.id,
                    quantity,
                    idempotency_key: None,
                },
            )
            .await?;
    }

    let value = server
        .value_account(
            &ctx,
            ValueAccountRequest {
                account_id: account.id.clone(),
                max_staleness_ms: None,
                currency: None,
                scale: Some(2),
                idempotency_key: None,
            },
        )
        .await?;
    assert_eq!(value.display_total, "32250.00");
    let value = value.value;
    assert_eq!(value.currency, "USD");
    assert_eq!(value.display_total(2), "32250.00");
    assert!(!value.partial);
    app.shutdown().await;

    assert!(dir.path().join("data").join("entities.json").exists());

    let reopened = App::open(&config).await?;
    let holdings = reopened
        .server()
        .list_holdings(
            &ctx,
            AccountRequest {
                account_id: account.id.clone(),
                idempotency_key: None,
            },
        )
        .await?
        .holdings;
    assert_eq!(holdings.len(), 3);
    let tagged = reopened
        .server()
        .list_assets(
            &ctx,
            ListAssetsRequest {
                tag: Some("core".to_string()),
                idempotency_key: None,
            },
        )
        .await?
        .assets;
    let symbols: Vec<&str> = tagged.iter().map(|a| a.asset.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["AAPL", "BTC", "USD"]);
    reopened.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn idempotent_requests_replay_across_calls() -> Result<()> {
    let dir = TempDir::new()?;
    let app = App::open(&write_config(&dir)?).await?;
    let server = app.server();
    let ctx = RequestContext::background();

    let create = CreateAssetRequest {
        symbol: "ETH".to_string(),
        kind: AssetKind::Crypto,
        idempotency_key: Some("create-eth".to_string()),
    };
    let first = server.create_asset(&ctx, create.clone()).await?;
    let replay = server.create_asset(&ctx, create.clone()).await?;
    assert_eq!(first, replay);

    // Without the key the same request hits the uniqueness check.
    let status = server
        .create_asset(
            &ctx,
            CreateAssetRequest {
                idempotency_key: None,
                ..create
            },
        )
        .await
        .unwrap_err();
    assert_eq!(status.code, Code::AlreadyExists);

    // Errors replay too: ETH has no configured price.
    let price = GetPriceRequest {
        asset: AssetSelector::symbol("eth"),
        max_staleness_ms: Some(0),
        idempotency_key: Some("eth-price".to_string()),
    };
    let err = server.get_price(&ctx, price.clone()).await.unwrap_err();
    assert_eq!(err.code, Code::NotFound);
    assert_eq!(server.get_price(&ctx, price).await.unwrap_err(), err);

    app.shutdown().await;
    Ok(())
}
