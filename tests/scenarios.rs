mod support;

use anyhow::Result;
use quotebook::market_data::{MaxStaleness, ProviderError, Quote};
use quotebook::models::{Asset, AssetKind};
use quotebook::ErrorKind;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use support::{ctx, t0, Harness, MockQuoteProvider};

fn cached(asset: &Asset, price: Decimal) -> Quote {
    Quote {
        asset_id: asset.id.clone(),
        price,
        currency: "USD".to_string(),
        as_of: t0(),
        received_at: t0(),
        source: "seed".to_string(),
    }
}

struct Portfolio {
    account: quotebook::models::Account,
    btc: Asset,
    aapl: Asset,
}

async fn portfolio(h: &Harness) -> Result<Portfolio> {
    let ctx = ctx();
    let user = h.users.create_user(&ctx).await?;
    let account = h.users.create_account(&ctx, &user.id).await?;
    let btc = h.assets.create_asset(&ctx, "BTC", AssetKind::Crypto).await?;
    let aapl = h.assets.create_asset(&ctx, "AAPL", AssetKind::Equity).await?;
    h.users.upsert_holding(&ctx, &account.id, &btc.id, dec!(0.5)).await?;
    h.users.upsert_holding(&ctx, &account.id, &aapl.id, dec!(10)).await?;
    Ok(Portfolio { account, btc, aapl })
}

#[tokio::test]
async fn account_value_from_cached_quotes() -> Result<()> {
    let h = Harness::new(MockQuoteProvider::new());
    let p = portfolio(&h).await?;
    h.cache.insert(cached(&p.btc, dec!(60000)), false);
    h.cache.insert(cached(&p.aapl, dec!(200)), false);

    let value = h
        .pricing
        .value_account(&ctx(), &p.account.id, MaxStaleness::Unbounded, Some("USD"))
        .await?;

    assert_eq!(value.display_total(2), "32000.00");
    assert!(!value.partial);
    assert!(value.errors.is_empty());
    assert_eq!(value.items.len(), 2);
    assert_eq!(h.provider.calls(), 0, "cached quotes must not hit the provider");
    Ok(())
}

#[tokio::test]
async fn unavailable_quote_leaves_partial_total() -> Result<()> {
    let h = Harness::new(MockQuoteProvider::new());
    h.provider
        .fail_always(Some(ProviderError::transient("mock", "HTTP 503")));
    let p = portfolio(&h).await?;
    h.cache.insert(cached(&p.btc, dec!(60000)), false);

    let value = h
        .pricing
        .value_account(&ctx(), &p.account.id, MaxStaleness::Unbounded, Some("USD"))
        .await?;

    assert_eq!(value.display_total(2), "30000.00");
    assert!(value.partial);
    assert_eq!(value.errors.len(), 1);
    assert_eq!(value.errors[0].symbol, "AAPL");
    assert_eq!(value.errors[0].kind, ErrorKind::Unavailable);
    Ok(())
}

#[tokio::test]
async fn delete_asset_waits_for_empty_holding() -> Result<()> {
    let h = Harness::new(MockQuoteProvider::new());
    let p = portfolio(&h).await?;
    let ctx = ctx();

    let err = h.assets.delete_asset(&ctx, &p.btc.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let removed = h
        .users
        .upsert_holding(&ctx, &p.account.id, &p.btc.id, dec!(0))
        .await?;
    assert!(removed.is_none(), "zero quantity is collected by default");

    h.assets.delete_asset(&ctx, &p.btc.id).await?;
    let holdings = h.users.list_holdings(&ctx, &p.account.id).await?;
    assert_eq!(holdings.len(), 1);
    assert_eq!(holdings[0].asset_id, p.aapl.id);
    Ok(())
}

#[tokio::test]
async fn symbols_are_unique_after_normalization() -> Result<()> {
    let h = Harness::new(MockQuoteProvider::new());
    let ctx = ctx();

    let first = h.assets.create_asset(&ctx, "btc", AssetKind::Crypto).await?;
    assert_eq!(first.symbol, "BTC");

    let err = h
        .assets
        .create_asset(&ctx, "BTC", AssetKind::Crypto)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    Ok(())
}

#[tokio::test]
async fn negative_quantity_is_rejected_without_changes() -> Result<()> {
    let h = Harness::new(MockQuoteProvider::new());
    let p = portfolio(&h).await?;
    let before = h.store.snapshot().to_snapshot();

    let err = h
        .users
        .upsert_holding(&ctx(), &p.account.id, &p.btc.id, dec!(-1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    assert_eq!(h.store.snapshot().to_snapshot(), before);
    h.store.check_invariants()?;
    Ok(())
}

#[tokio::test]
async fn fiat_is_priced_by_identity() -> Result<()> {
    let h = Harness::new(MockQuoteProvider::new());
    let ctx = ctx();
    let user = h.users.create_user(&ctx).await?;
    let account = h.users.create_account(&ctx, &user.id).await?;
    let usd = h.assets.create_asset(&ctx, "usd", AssetKind::Fiat).await?;
    h.users.upsert_holding(&ctx, &account.id, &usd.id, dec!(1234.5)).await?;

    let value = h
        .pricing
        .value_account(&ctx, &account.id, MaxStaleness::Unbounded, None)
        .await?;
    assert_eq!(value.currency, "USD");
    assert_eq!(value.display_total(2), "1234.50");
    assert_eq!(h.provider.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn user_value_sums_accounts() -> Result<()> {
    let h = Harness::new(
        MockQuoteProvider::new()
            .with_price("BTC", dec!(60000), "USD")
            .with_price("AAPL", dec!(200), "USD"),
    );
    let p = portfolio(&h).await?;
    let ctx = ctx();
    let owner = h.users.get_account(&ctx, &p.account.id).await?.owner_id;
    let second = h.users.create_account(&ctx, &owner).await?;
    h.users.upsert_holding(&ctx, &second.id, &p.aapl.id, dec!(5)).await?;

    let value = h
        .pricing
        .value_user(&ctx, &owner, MaxStaleness::Unbounded, Some("usd"))
        .await?;

    assert_eq!(value.accounts.len(), 2);
    assert_eq!(value.display_total(2), "33000.00");
    assert!(!value.partial);
    // One fetch per asset; the second account reuses the cached AAPL quote.
    assert_eq!(h.provider.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn mismatched_quote_currency_is_unimplemented() -> Result<()> {
    let h = Harness::new(MockQuoteProvider::new().with_price("BTC", dec!(55000), "EUR"));
    let p = portfolio(&h).await?;
    let ctx = ctx();
    let holding = h
        .users
        .list_holdings(&ctx, &p.account.id)
        .await?
        .into_iter()
        .find(|holding| holding.asset_id == p.btc.id)
        .expect("btc holding");

    let err = h
        .pricing
        .value_holding(&ctx, &holding.id, MaxStaleness::Unbounded, Some("USD"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unimplemented);
    Ok(())
}
