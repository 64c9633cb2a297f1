use std::time::Duration;

use tracing::debug;

use super::idempotency::IdempotencyCache;
use super::messages::*;
use super::status::Status;
use crate::context::RequestContext;
use crate::services::{AssetSelector, AssetService, PricingService, UserService};

type RpcResult<T> = std::result::Result<T, Status>;

/// Transport-agnostic handlers for every operation.
///
/// Each handler maps service errors onto [`Status`] and routes the call
/// through the idempotency cache when the request carries a key.
pub struct QuotebookServer {
    users: UserService,
    assets: AssetService,
    pricing: PricingService,
    idempotency: IdempotencyCache,
}

impl QuotebookServer {
    pub fn new(
        users: UserService,
        assets: AssetService,
        pricing: PricingService,
        idempotency_window: Duration,
    ) -> Self {
        Self::with_idempotency(users, assets, pricing, IdempotencyCache::new(idempotency_window))
    }

    pub fn with_idempotency(
        users: UserService,
        assets: AssetService,
        pricing: PricingService,
        idempotency: IdempotencyCache,
    ) -> Self {
        Self {
            users,
            assets,
            pricing,
            idempotency,
        }
    }

    pub fn pricing(&self) -> &PricingService {
        &self.pricing
    }

    // Users and accounts

    pub async fn create_user(&self, ctx: &RequestContext, req: CreateUserRequest) -> RpcResult<UserResponse> {
        debug!(method = "CreateUser", "rpc");
        self.idempotency
            .run("CreateUser", req.idempotency_key.as_deref(), || async {
                let user = self.users.create_user(ctx).await?;
                Ok::<_, Status>(UserResponse { user })
            })
            .await
    }

    pub async fn get_user(&self, ctx: &RequestContext, req: UserRequest) -> RpcResult<UserResponse> {
        debug!(method = "GetUser", user_id = %req.user_id, "rpc");
        self.idempotency
            .run("GetUser", req.idempotency_key.as_deref(), || async {
                let user = self.users.get_user(ctx, &req.user_id).await?;
                Ok::<_, Status>(UserResponse { user })
            })
            .await
    }

    pub async fn delete_user(&self, ctx: &RequestContext, req: UserRequest) -> RpcResult<Empty> {
        debug!(method = "DeleteUser", user_id = %req.user_id, "rpc");
        self.idempotency
            .run("DeleteUser", req.idempotency_key.as_deref(), || async {
                self.users.delete_user(ctx, &req.user_id).await?;
                Ok::<_, Status>(Empty {})
            })
            .await
    }

    pub async fn create_account(
        &self,
        ctx: &RequestContext,
        req: CreateAccountRequest,
    ) -> RpcResult<AccountResponse> {
        debug!(method = "CreateAccount", user_id = %req.user_id, "rpc");
        self.idempotency
            .run("CreateAccount", req.idempotency_key.as_deref(), || async {
                let account = self.users.create_account(ctx, &req.user_id).await?;
                Ok::<_, Status>(AccountResponse { account })
            })
            .await
    }

    pub async fn get_account(&self, ctx: &RequestContext, req: AccountRequest) -> RpcResult<AccountResponse> {
        debug!(method = "GetAccount", account_id = %req.account_id, "rpc");
        self.idempotency
            .run("GetAccount", req.idempotency_key.as_deref(), || async {
                let account = self.users.get_account(ctx, &req.account_id).await?;
                Ok::<_, Status>(AccountResponse { account })
            })
            .await
    }

    pub async fn delete_account(&self, ctx: &RequestContext, req: AccountRequest) -> RpcResult<Empty> {
        debug!(method = "DeleteAccount", account_id = %req.account_id, "rpc");
        self.idempotency
            .run("DeleteAccount", req.idempotency_key.as_deref(), || async {
                self.users.delete_account(ctx, &req.account_id).await?;
                Ok::<_, Status>(Empty {})
            })
            .await
    }

    pub async fn list_accounts(&self, ctx: &RequestContext, req: UserRequest) -> RpcResult<ListAccountsResponse> {
        debug!(method = "ListAccounts", user_id = %req.user_id, "rpc");
        self.idempotency
            .run("ListAccounts", req.idempotency_key.as_deref(), || async {
                let accounts = self.users.list_accounts(ctx, &req.user_id).await?;
                Ok::<_, Status>(ListAccountsResponse { accounts })
            })
            .await
    }

    // Holdings

    pub async fn upsert_holding(
        &self,
        ctx: &RequestContext,
        req: UpsertHoldingRequest,
    ) -> RpcResult<UpsertHoldingResponse> {
        debug!(
            method = "UpsertHolding",
            account_id = %req.account_id,
            asset_id = %req.asset_id,
            "rpc"
        );
        self.idempotency
            .run("UpsertHolding", req.idempotency_key.as_deref(), || async {
                let holding = self
                    .users
                    .upsert_holding(ctx, &req.account_id, &req.asset_id, req.quantity)
                    .await?;
                Ok::<_, Status>(UpsertHoldingResponse { holding })
            })
            .await
    }

    pub async fn get_holding(&self, ctx: &RequestContext, req: HoldingRequest) -> RpcResult<HoldingResponse> {
        debug!(method = "GetHolding", holding_id = %req.holding_id, "rpc");
        self.idempotency
            .run("GetHolding", req.idempotency_key.as_deref(), || async {
                let holding = self.users.get_holding(ctx, &req.holding_id).await?;
                Ok::<_, Status>(HoldingResponse { holding })
            })
            .await
    }

    pub async fn list_holdings(
        &self,
        ctx: &RequestContext,
        req: AccountRequest,
    ) -> RpcResult<ListHoldingsResponse> {
        debug!(method = "ListHoldings", account_id = %req.account_id, "rpc");
        self.idempotency
            .run("ListHoldings", req.idempotency_key.as_deref(), || async {
                let holdings = self.users.list_holdings(ctx, &req.account_id).await?;
                Ok::<_, Status>(ListHoldingsResponse { holdings })
            })
            .await
    }

    // Assets and tags

    pub async fn get_asset(&self, ctx: &RequestContext, req: GetAssetRequest) -> RpcResult<AssetResponse> {
        debug!(method = "GetAsset", asset = ?req.asset, "rpc");
        self.idempotency
            .run("GetAsset", req.idempotency_key.as_deref(), || async {
                let asset = self.assets.get_asset(ctx, &req.asset).await?;
                Ok::<_, Status>(AssetResponse { asset })
            })
            .await
    }

    /// Create or update an asset. A kind change can reroute pricing, so any
    /// cached quote is dropped.
    pub async fn set_asset(&self, ctx: &RequestContext, req: SetAssetRequest) -> RpcResult<AssetResponse> {
        debug!(method = "SetAsset", symbol = %req.asset.symbol, "rpc");
        self.idempotency
            .run("SetAsset", req.idempotency_key.as_deref(), || async {
                let asset = self.assets.set_asset(ctx, &req.asset).await?;
                self.pricing.forget(&asset.asset.id);
                Ok::<_, Status>(AssetResponse { asset })
            })
            .await
    }

    pub async fn create_asset(&self, ctx: &RequestContext, req: CreateAssetRequest) -> RpcResult<AssetResponse> {
        debug!(method = "CreateAsset", symbol = %req.symbol, kind = %req.kind, "rpc");
        self.idempotency
            .run("CreateAsset", req.idempotency_key.as_deref(), || async {
                let created = self.assets.create_asset(ctx, &req.symbol, req.kind).await?;
                let asset = self
                    .assets
                    .get_asset(ctx, &AssetSelector::Id(created.id))
                    .await?;
                Ok::<_, Status>(AssetResponse { asset })
            })
            .await
    }

    pub async fn delete_asset(&self, ctx: &RequestContext, req: DeleteAssetRequest) -> RpcResult<Empty> {
        debug!(method = "DeleteAsset", asset_id = %req.asset_id, "rpc");
        self.idempotency
            .run("DeleteAsset", req.idempotency_key.as_deref(), || async {
                self.assets.delete_asset(ctx, &req.asset_id).await?;
                self.pricing.forget(&req.asset_id);
                Ok::<_, Status>(Empty {})
            })
            .await
    }

    pub async fn attach_tag(&self, ctx: &RequestContext, req: TagRequest) -> RpcResult<AssetResponse> {
        debug!(method = "AttachTag", asset_id = %req.asset_id, tag = %req.tag, "rpc");
        self.idempotency
            .run("AttachTag", req.idempotency_key.as_deref(), || async {
                let asset = self.assets.attach_tag(ctx, &req.asset_id, &req.tag).await?;
                Ok::<_, Status>(AssetResponse { asset })
            })
            .await
    }

    pub async fn detach_tag(&self, ctx: &RequestContext, req: TagRequest) -> RpcResult<AssetResponse> {
        debug!(method = "DetachTag", asset_id = %req.asset_id, tag = %req.tag, "rpc");
        self.idempotency
            .run("DetachTag", req.idempotency_key.as_deref(), || async {
                let asset = self.assets.detach_tag(ctx, &req.asset_id, &req.tag).await?;
                Ok::<_, Status>(AssetResponse { asset })
            })
            .await
    }

    pub async fn list_assets(&self, ctx: &RequestContext, req: ListAssetsRequest) -> RpcResult<ListAssetsResponse> {
        debug!(method = "ListAssets", tag = ?req.tag, "rpc");
        self.idempotency
            .run("ListAssets", req.idempotency_key.as_deref(), || async {
                let assets = self.assets.list_assets(ctx, req.tag.as_deref()).await?;
                Ok::<_, Status>(ListAssetsResponse { assets })
            })
            .await
    }

    pub async fn list_tags(&self, ctx: &RequestContext, req: ListTagsRequest) -> RpcResult<ListTagsResponse> {
        debug!(method = "ListTags", "rpc");
        self.idempotency
            .run("ListTags", req.idempotency_key.as_deref(), || async {
                let tags = self.assets.list_tags(ctx).await?;
                Ok::<_, Status>(ListTagsResponse { tags })
            })
            .await
    }

    // Pricing

    pub async fn get_price(&self, ctx: &RequestContext, req: GetPriceRequest) -> RpcResult<GetPriceResponse> {
        debug!(method = "GetPrice", asset = ?req.asset, max_staleness_ms = ?req.max_staleness_ms, "rpc");
        self.idempotency
            .run("GetPrice", req.idempotency_key.as_deref(), || async {
                let quote = self
                    .pricing
                    .get_price(ctx, &req.asset, max_staleness(req.max_staleness_ms))
                    .await?;
                Ok::<_, Status>(GetPriceResponse { quote })
            })
            .await
    }

    pub async fn value_holding(
        &self,
        ctx: &RequestContext,
        req: ValueHoldingRequest,
    ) -> RpcResult<ValueHoldingResponse> {
        debug!(method = "ValueHolding", holding_id = %req.holding_id, "rpc");
        self.idempotency
            .run("ValueHolding", req.idempotency_key.as_deref(), || async {
                let scale = display_scale(req.scale)?;
                let value = self
                    .pricing
                    .value_holding(
                        ctx,
                        &req.holding_id,
                        max_staleness(req.max_staleness_ms),
                        req.currency.as_deref(),
                    )
                    .await?;
                Ok::<_, Status>(ValueHoldingResponse {
                    display_amount: value.display(scale),
                    value,
                })
            })
            .await
    }

    pub async fn value_account(
        &self,
        ctx: &RequestContext,
        req: ValueAccountRequest,
    ) -> RpcResult<ValueAccountResponse> {
        debug!(method = "ValueAccount", account_id = %req.account_id, "rpc");
        self.idempotency
            .run("ValueAccount", req.idempotency_key.as_deref(), || async {
                let scale = display_scale(req.scale)?;
                let value = self
                    .pricing
                    .value_account(
                        ctx,
                        &req.account_id,
                        max_staleness(req.max_staleness_ms),
                        req.currency.as_deref(),
                    )
                    .await?;
                Ok::<_, Status>(ValueAccountResponse {
                    display_total: value.display_total(scale),
                    value,
                })
            })
            .await
    }

    pub async fn value_user(&self, ctx: &RequestContext, req: ValueUserRequest) -> RpcResult<ValueUserResponse> {
        debug!(method = "ValueUser", user_id = %req.user_id, "rpc");
        self.idempotency
            .run("ValueUser", req.idempotency_key.as_deref(), || async {
                let scale = display_scale(req.scale)?;
                let value = self
                    .pricing
                    .value_user(
                        ctx,
                        &req.user_id,
                        max_staleness(req.max_staleness_ms),
                        req.currency.as_deref(),
                    )
                    .await?;
                Ok::<_, Status>(ValueUserResponse {
                    display_total: value.display_total(scale),
                    value,
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{CacheSettings, Lookup, PriceCache, Quote, QuoteFetcher};
    use crate::models::{Asset, AssetKind};
    use crate::rpc::Code;
    use crate::storage::{EntityStore, StoreOptions};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct Unreachable;

    #[async_trait]
    impl QuoteFetcher for Unreachable {
        async fn fetch_quote(&self, asset: &Asset) -> crate::error::Result<Quote> {
            Err(crate::error::Error::unavailable(format!("no route for {}", asset.symbol)))
        }
    }

    fn server() -> QuotebookServer {
        let store = EntityStore::in_memory(StoreOptions::default());
        let cache = PriceCache::new(std::sync::Arc::new(Unreachable), CacheSettings::default());
        QuotebookServer::new(
            UserService::new(store.clone()),
            AssetService::new(store.clone()),
            PricingService::new(store, cache, "USD"),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_create_user_replays_for_same_key() -> anyhow::Result<()> {
        let server = server();
        let ctx = RequestContext::background();
        let req = CreateUserRequest {
            idempotency_key: Some("signup-1".to_string()),
        };

        let first = server.create_user(&ctx, req.clone()).await?;
        let again = server.create_user(&ctx, req).await?;
        assert_eq!(first, again);

        let other = server.create_user(&ctx, CreateUserRequest::default()).await?;
        assert_ne!(first.user.id, other.user.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_user_with_accounts_is_failed_precondition() -> anyhow::Result<()> {
        let server = server();
        let ctx = RequestContext::background();
        let user = server.create_user(&ctx, CreateUserRequest::default()).await?.user;
        server
            .create_account(
                &ctx,
                CreateAccountRequest {
                    user_id: user.id.clone(),
                    idempotency_key: None,
                },
            )
            .await?;

        let status = server
            .delete_user(
                &ctx,
                UserRequest {
                    user_id: user.id,
                    idempotency_key: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(status.code, Code::FailedPrecondition);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_asset_drops_cached_quote() -> anyhow::Result<()> {
        let server = server();
        let ctx = RequestContext::background();
        let asset = server
            .create_asset(
                &ctx,
                CreateAssetRequest {
                    symbol: "btc".to_string(),
                    kind: AssetKind::Crypto,
                    idempotency_key: None,
                },
            )
            .await?
            .asset
            .asset;
        let now = Utc::now();
        server.pricing().cache().insert(
            Quote {
                asset_id: asset.id.clone(),
                price: dec!(50000),
                currency: "USD".to_string(),
                as_of: now,
                received_at: now,
                source: "test".to_string(),
            },
            false,
        );
        assert!(matches!(server.pricing().cache().peek(&asset.id), Lookup::Fresh(_)));

        server
            .delete_asset(
                &ctx,
                DeleteAssetRequest {
                    asset_id: asset.id.clone(),
                    idempotency_key: None,
                },
            )
            .await?;
        assert_eq!(server.pricing().cache().peek(&asset.id), Lookup::Miss);
        Ok(())
    }

    #[tokio::test]
    async fn test_unavailable_price_maps_status() -> anyhow::Result<()> {
        let server = server();
        let ctx = RequestContext::background();
        server
            .create_asset(
                &ctx,
                CreateAssetRequest {
                    symbol: "AAPL".to_string(),
                    kind: AssetKind::Equity,
                    idempotency_key: None,
                },
            )
            .await?;

        let status = server
            .get_price(
                &ctx,
                GetPriceRequest {
                    asset: AssetSelector::symbol("aapl"),
                    max_staleness_ms: None,
                    idempotency_key: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(status.code, Code::Unavailable);
        Ok(())
    }

    #[tokio::test]
    async fn test_valuation_renders_requested_scale() -> anyhow::Result<()> {
        let server = server();
        let ctx = RequestContext::background();
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
        let asset = server
            .create_asset(
                &ctx,
                CreateAssetRequest {
                    symbol: "GLD".to_string(),
                    kind: AssetKind::Other,
                    idempotency_key: None,
                },
            )
            .await?
            .asset
            .asset;
        let holding = server
            .upsert_holding(
                &ctx,
                UpsertHoldingRequest {
                    account_id: account.id.clone(),
                    asset_id: asset.id.clone(),
                    quantity: dec!(1),
                    idempotency_key: None,
                },
            )
            .await?
            .holding
            .expect("holding kept");
        let now = Utc::now();
        server.pricing().cache().insert(
            Quote {
                asset_id: asset.id.clone(),
                price: dec!(2.345),
                currency: "USD".to_string(),
                as_of: now,
                received_at: now,
                source: "test".to_string(),
            },
            false,
        );

        let holding_value = server
            .value_holding(
                &ctx,
                ValueHoldingRequest {
                    holding_id: holding.id.clone(),
                    max_staleness_ms: None,
                    currency: None,
                    scale: Some(2),
                    idempotency_key: None,
                },
            )
            .await?;
        assert_eq!(holding_value.display_amount, "2.34");
        assert_eq!(holding_value.value.amount, dec!(2.345));

        let account_value = server
            .value_account(
                &ctx,
                ValueAccountRequest {
                    account_id: account.id.clone(),
                    max_staleness_ms: None,
                    currency: None,
                    scale: Some(4),
                    idempotency_key: None,
                },
            )
            .await?;
        assert_eq!(account_value.display_total, "2.3450");

        let user_value = server
            .value_user(
                &ctx,
                ValueUserRequest {
                    user_id: user.id,
                    max_staleness_ms: None,
                    currency: None,
                    scale: None,
                    idempotency_key: None,
                },
            )
            .await?;
        assert_eq!(user_value.display_total, "2.34");

        let status = server
            .value_account(
                &ctx,
                ValueAccountRequest {
                    account_id: account.id,
                    max_staleness_ms: None,
                    currency: None,
                    scale: Some(40),
                    idempotency_key: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(status.code, Code::InvalidArgument);
        Ok(())
    }
}
