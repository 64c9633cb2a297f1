//! Prices and valuations.
//!
//! Valuation only reads the entity store. Every quote goes through the price
//! cache; no store snapshot or lock is held while waiting on it.

use std::fmt;

use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{AssetSelector, AssetService};
use crate::context::RequestContext;
use crate::error::{Error, ErrorKind, Result};
use crate::format::{format_amount, format_quantity, DEFAULT_DISPLAY_SCALE};
use crate::market_data::{CacheStats, MaxStaleness, PriceCache, Quote};
use crate::models::{Asset, Holding, Id};
use crate::storage::EntityStore;

/// Value of one holding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub holding_id: Id,
    pub asset_id: Id,
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub currency: String,
    /// `quantity * price`, unrounded.
    pub amount: Decimal,
    pub quote: Quote,
}

impl Value {
    pub fn display(&self, scale: u32) -> String {
        format_amount(self.amount, scale)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {} {} = {}",
            format_quantity(self.quantity),
            self.symbol,
            self.price.normalize(),
            self.currency,
            self.display(DEFAULT_DISPLAY_SCALE)
        )
    }
}

/// Why one holding of an account couldn't be valued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationError {
    pub holding_id: Id,
    pub asset_id: Id,
    pub symbol: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountValue {
    pub account_id: Id,
    pub currency: String,
    pub items: Vec<Value>,
    /// Sum of the items that could be valued.
    pub total: Decimal,
    /// True when any holding is missing from `total`.
    pub partial: bool,
    pub errors: Vec<ValuationError>,
}

impl AccountValue {
    pub fn display_total(&self, scale: u32) -> String {
        format_amount(self.total, scale)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserValue {
    pub user_id: Id,
    pub currency: String,
    pub accounts: Vec<AccountValue>,
    pub total: Decimal,
    pub partial: bool,
}

impl UserValue {
    pub fn display_total(&self, scale: u32) -> String {
        format_amount(self.total, scale)
    }
}

#[derive(Clone)]
pub struct PricingService {
    store: EntityStore,
    assets: AssetService,
    cache: PriceCache,
    default_currency: String,
}

impl PricingService {
    pub fn new(store: EntityStore, cache: PriceCache, default_currency: impl Into<String>) -> Self {
        Self {
            assets: AssetService::new(store.clone()),
            store,
            cache,
            default_currency: default_currency.into().trim().to_uppercase(),
        }
    }

    pub fn default_currency(&self) -> &str {
        &self.default_currency
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop any cached quote for a deleted or re-kinded asset.
    pub fn forget(&self, asset_id: &Id) {
        self.cache.invalidate(asset_id);
    }

    pub async fn get_price(
        &self,
        ctx: &RequestContext,
        selector: &AssetSelector,
        max_staleness: MaxStaleness,
    ) -> Result<Quote> {
        let asset = self.assets.resolve(ctx, selector).await?;
        self.cache.get(ctx, &asset, max_staleness).await
    }

    pub async fn value_holding(
        &self,
        ctx: &RequestContext,
        holding_id: &Id,
        max_staleness: MaxStaleness,
        target_currency: Option<&str>,
    ) -> Result<Value> {
        let currency = self.target_currency(target_currency)?;
        let (holding, asset) = self
            .store
            .read(ctx, |t| {
                let holding = t
                    .holding(holding_id)
                    .cloned()
                    .ok_or_else(|| Error::not_found(format!("holding {holding_id}")))?;
                let asset = t
                    .asset(&holding.asset_id)
                    .cloned()
                    .ok_or_else(|| Error::Internal("holding references missing asset".to_string()))?;
                Ok((holding, asset))
            })
            .await?;
        let value = self
            .value(ctx, holding, &asset, max_staleness, &currency)
            .await?;
        debug!(holding_id = %holding_id, value = %value, "holding valued");
        Ok(value)
    }

    /// Value every holding of an account concurrently. Failed holdings are
    /// reported in `errors` and leave `total` partial; cancellation fails the
    /// whole call.
    pub async fn value_account(
        &self,
        ctx: &RequestContext,
        account_id: &Id,
        max_staleness: MaxStaleness,
        target_currency: Option<&str>,
    ) -> Result<AccountValue> {
        let currency = self.target_currency(target_currency)?;
        let holdings = self
            .store
            .read(ctx, |t| {
                if t.account(account_id).is_none() {
                    return Err(Error::not_found(format!("account {account_id}")));
                }
                t.holdings_of(account_id)
                    .into_iter()
                    .map(|h| {
                        let asset = t.asset(&h.asset_id).cloned().ok_or_else(|| {
                            Error::Internal("holding references missing asset".to_string())
                        })?;
                        Ok((h, asset))
                    })
                    .collect::<Result<Vec<(Holding, Asset)>>>()
            })
            .await?;

        debug!(account_id = %account_id, holdings = holdings.len(), currency = %currency, "valuing account");

        let outcomes = join_all(holdings.into_iter().map(|(holding, asset)| {
            let currency = currency.as_str();
            async move {
                let result = self
                    .value(ctx, holding.clone(), &asset, max_staleness, currency)
                    .await;
                (holding, asset, result)
            }
        }))
        .await;

        let mut value = AccountValue {
            account_id: account_id.clone(),
            currency: currency.clone(),
            items: Vec::new(),
            total: Decimal::ZERO,
            partial: false,
            errors: Vec::new(),
        };
        for (holding, asset, result) in outcomes {
            match result {
                Ok(item) => {
                    value.total = value
                        .total
                        .checked_add(item.amount)
                        .ok_or_else(|| Error::invalid_argument("account value overflows"))?;
                    value.items.push(item);
                }
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    warn!(
                        account_id = %account_id,
                        asset_id = %asset.id,
                        symbol = %asset.symbol,
                        error = %err,
                        "holding could not be valued"
                    );
                    value.partial = true;
                    value.errors.push(ValuationError {
                        holding_id: holding.id,
                        asset_id: asset.id,
                        symbol: asset.symbol,
                        kind: err.kind(),
                        message: err.reason(),
                    });
                }
            }
        }

        info!(
            account_id = %account_id,
            total = %value.total,
            currency = %value.currency,
            partial = value.partial,
            errors = value.errors.len(),
            "account valued"
        );
        Ok(value)
    }

    /// Sum of [`Self::value_account`] over the user's accounts.
    pub async fn value_user(
        &self,
        ctx: &RequestContext,
        user_id: &Id,
        max_staleness: MaxStaleness,
        target_currency: Option<&str>,
    ) -> Result<UserValue> {
        let currency = self.target_currency(target_currency)?;
        let accounts = self.store.list_accounts(ctx, user_id).await?;

        let valued = join_all(accounts.iter().map(|account| {
            self.value_account(ctx, &account.id, max_staleness, Some(currency.as_str()))
        }))
        .await;

        let mut value = UserValue {
            user_id: user_id.clone(),
            currency,
            accounts: Vec::with_capacity(valued.len()),
            total: Decimal::ZERO,
            partial: false,
        };
        for account in valued {
            let account = account?;
            value.total = value
                .total
                .checked_add(account.total)
                .ok_or_else(|| Error::invalid_argument("user value overflows"))?;
            value.partial |= account.partial;
            value.accounts.push(account);
        }
        Ok(value)
    }

    async fn value(
        &self,
        ctx: &RequestContext,
        holding: Holding,
        asset: &Asset,
        max_staleness: MaxStaleness,
        currency: &str,
    ) -> Result<Value> {
        let quote = self.cache.get(ctx, asset, max_staleness).await?;
        if quote.currency != currency {
            return Err(Error::unimplemented(format!(
                "{} is quoted in {}; conversion to {currency} is not supported",
                asset.symbol, quote.currency
            )));
        }
        let quantity = holding.quantity.value();
        let amount = quantity
            .checked_mul(quote.price)
            .ok_or_else(|| Error::invalid_argument(format!("value of {} overflows", asset.symbol)))?;
        Ok(Value {
            holding_id: holding.id,
            asset_id: asset.id.clone(),
            symbol: asset.symbol.clone(),
            quantity,
            price: quote.price,
            currency: quote.currency.clone(),
            amount,
            quote,
        })
    }

    fn target_currency(&self, requested: Option<&str>) -> Result<String> {
        let currency = requested
            .map(|c| c.trim().to_uppercase())
            .unwrap_or_else(|| self.default_currency.clone());
        if currency.is_empty() {
            return Err(Error::invalid_argument("target currency must not be empty"));
        }
        Ok(currency)
    }
}
