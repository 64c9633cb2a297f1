//! Request and response bodies.
//!
//! Every request may carry an `idempotency_key`; see [`super::IdempotencyCache`].
//! Staleness bounds travel as milliseconds, absent meaning "any cached quote".
//! Valuation responses carry the exact amount plus a rendering rounded
//! half-to-even at the requested `scale` (2 when absent).

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::format::DEFAULT_DISPLAY_SCALE;
use crate::market_data::{MaxStaleness, Quote};
use crate::models::{Account, AssetKind, Holding, Id, Tag, TaggedAsset, User};
use crate::services::{AccountValue, AssetSelector, AssetSpec, UserValue, Value};

/// Largest scale a `Decimal` can carry.
const MAX_DISPLAY_SCALE: u32 = 28;

pub(crate) fn max_staleness(ms: Option<u64>) -> MaxStaleness {
    ms.map(Duration::from_millis).into()
}

pub(crate) fn display_scale(scale: Option<u32>) -> Result<u32> {
    match scale {
        None => Ok(DEFAULT_DISPLAY_SCALE),
        Some(scale) if scale <= MAX_DISPLAY_SCALE => Ok(scale),
        Some(scale) => Err(Error::invalid_argument(format!(
            "scale {scale} exceeds {MAX_DISPLAY_SCALE}"
        ))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

// Users, accounts, holdings

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequest {
    pub user_id: Id,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: Id,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRequest {
    pub account_id: Id,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountResponse {
    pub account: Account,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListAccountsResponse {
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertHoldingRequest {
    pub account_id: Id,
    pub asset_id: Id,
    pub quantity: Decimal,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// `holding` is absent when a zero quantity removed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertHoldingResponse {
    pub holding: Option<Holding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingRequest {
    pub holding_id: Id,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingResponse {
    pub holding: Holding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListHoldingsResponse {
    pub holdings: Vec<Holding>,
}

// Assets and tags

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAssetRequest {
    pub asset: AssetSelector,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetAssetRequest {
    pub asset: AssetSpec,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAssetRequest {
    pub symbol: String,
    pub kind: AssetKind,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAssetRequest {
    pub asset_id: Id,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRequest {
    pub asset_id: Id,
    pub tag: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetResponse {
    pub asset: TaggedAsset,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListAssetsRequest {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListAssetsResponse {
    pub assets: Vec<TaggedAsset>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTagsRequest {
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListTagsResponse {
    pub tags: Vec<Tag>,
}

// Pricing

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPriceRequest {
    pub asset: AssetSelector,
    #[serde(default)]
    pub max_staleness_ms: Option<u64>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPriceResponse {
    pub quote: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueHoldingRequest {
    pub holding_id: Id,
    #[serde(default)]
    pub max_staleness_ms: Option<u64>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Decimal places of the rounded rendering.
    #[serde(default)]
    pub scale: Option<u32>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueHoldingResponse {
    pub value: Value,
    pub display_amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueAccountRequest {
    pub account_id: Id,
    #[serde(default)]
    pub max_staleness_ms: Option<u64>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Decimal places of the rounded rendering.
    #[serde(default)]
    pub scale: Option<u32>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueAccountResponse {
    pub value: AccountValue,
    pub display_total: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueUserRequest {
    pub user_id: Id,
    #[serde(default)]
    pub max_staleness_ms: Option<u64>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Decimal places of the rounded rendering.
    #[serde(default)]
    pub scale: Option<u32>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueUserResponse {
    pub value: UserValue,
    pub display_total: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields_default() {
        let req: GetPriceRequest =
            serde_json::from_str(r#"{"asset": {"symbol": "btc"}}"#).unwrap();
        assert_eq!(req.asset, AssetSelector::symbol("btc"));
        assert_eq!(max_staleness(req.max_staleness_ms), MaxStaleness::Unbounded);
        assert!(req.idempotency_key.is_none());

        let req: ValueAccountRequest = serde_json::from_str(
            r#"{"account_id": "a1", "max_staleness_ms": 1500, "idempotency_key": "k"}"#,
        )
        .unwrap();
        assert_eq!(
            max_staleness(req.max_staleness_ms),
            MaxStaleness::Bounded(Duration::from_millis(1500))
        );
        assert_eq!(req.idempotency_key.as_deref(), Some("k"));
        assert_eq!(display_scale(req.scale).unwrap(), 2);
    }

    #[test]
    fn test_display_scale_bounded_by_decimal() {
        assert_eq!(display_scale(Some(28)).unwrap(), 28);
        let err = display_scale(Some(29)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }
}
