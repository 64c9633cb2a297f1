use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::models::{normalize_symbol, normalize_tag_name, Asset, AssetKind, Id, Tag, TaggedAsset};
use crate::storage::{EntityStore, Tables};

/// Names an asset either by id or by symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetSelector {
    Id(Id),
    Symbol(String),
}

impl AssetSelector {
    pub fn id(id: impl Into<Id>) -> Self {
        Self::Id(id.into())
    }

    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self::Symbol(symbol.into())
    }

    fn find<'t>(&self, tables: &'t Tables) -> Result<&'t Asset> {
        match self {
            Self::Id(id) => tables
                .asset(id)
                .ok_or_else(|| Error::not_found(format!("asset {id}"))),
            Self::Symbol(symbol) => {
                let symbol = normalize_symbol(symbol)?;
                tables
                    .asset_by_symbol(&symbol)
                    .ok_or_else(|| Error::not_found(format!("asset {symbol}")))
            }
        }
    }
}

/// Desired state of an asset for [`AssetService::set_asset`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSpec {
    /// Existing asset to update. Without it the asset is looked up by
    /// symbol and created when absent.
    #[serde(default)]
    pub id: Option<Id>,
    pub symbol: String,
    pub kind: AssetKind,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Asset identity and tag membership.
#[derive(Clone)]
pub struct AssetService {
    store: EntityStore,
}

impl AssetService {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    pub async fn get_asset(&self, ctx: &RequestContext, selector: &AssetSelector) -> Result<TaggedAsset> {
        self.store
            .read(ctx, |t| selector.find(t).map(|asset| t.tagged(asset)))
            .await
    }

    /// The bare asset for a selector.
    pub async fn resolve(&self, ctx: &RequestContext, selector: &AssetSelector) -> Result<Asset> {
        self.store
            .read(ctx, |t| selector.find(t).cloned())
            .await
    }

    /// Create the asset or bring its kind and tag set to `spec`, in one
    /// transaction. The symbol of an existing asset can't change.
    pub async fn set_asset(&self, ctx: &RequestContext, spec: &AssetSpec) -> Result<TaggedAsset> {
        let symbol = normalize_symbol(&spec.symbol)?;
        let tags = spec
            .tags
            .iter()
            .map(|name| normalize_tag_name(name))
            .collect::<Result<Vec<_>>>()?;

        let (tagged, created) = self
            .store
            .transaction(ctx, |tx| {
                let existing = match &spec.id {
                    Some(id) => Some(
                        tx.asset(id)
                            .cloned()
                            .ok_or_else(|| Error::not_found(format!("asset {id}")))?,
                    ),
                    None => tx.asset_by_symbol(&symbol).cloned(),
                };
                let (asset, created) = match existing {
                    Some(asset) if asset.symbol != symbol => {
                        return Err(Error::invalid_argument(format!(
                            "symbol of asset {} is {} and cannot change",
                            asset.id, asset.symbol
                        )))
                    }
                    Some(asset) => (tx.set_asset_kind(&asset.id, spec.kind)?, false),
                    None => (tx.create_asset(&symbol, spec.kind)?, true),
                };
                tx.set_tags(&asset.id, &tags)?;
                Ok((tx.tagged(&asset), created))
            })
            .await?;

        info!(
            asset_id = %tagged.asset.id,
            symbol = %tagged.asset.symbol,
            kind = %tagged.asset.kind,
            tags = ?tagged.tag_names(),
            created,
            "asset set"
        );
        Ok(tagged)
    }

    pub async fn create_asset(&self, ctx: &RequestContext, symbol: &str, kind: AssetKind) -> Result<Asset> {
        self.store.create_asset(ctx, symbol, kind).await
    }

    /// `CONFLICT` while any holding references the asset.
    pub async fn delete_asset(&self, ctx: &RequestContext, id: &Id) -> Result<()> {
        self.store.delete_asset(ctx, id).await
    }

    pub async fn attach_tag(&self, ctx: &RequestContext, asset_id: &Id, tag: &str) -> Result<TaggedAsset> {
        self.store.attach_tag(ctx, asset_id, tag).await?;
        self.get_asset(ctx, &AssetSelector::Id(asset_id.clone())).await
    }

    pub async fn detach_tag(&self, ctx: &RequestContext, asset_id: &Id, tag: &str) -> Result<TaggedAsset> {
        self.store.detach_tag(ctx, asset_id, tag).await?;
        self.get_asset(ctx, &AssetSelector::Id(asset_id.clone())).await
    }

    /// Assets ordered by symbol, optionally only those carrying `tag`.
    pub async fn list_assets(&self, ctx: &RequestContext, tag: Option<&str>) -> Result<Vec<TaggedAsset>> {
        let tag = tag.map(normalize_tag_name).transpose()?;
        self.store
            .read(ctx, |t| {
                Ok(t.assets_sorted(tag.as_deref())
                    .iter()
                    .map(|asset| t.tagged(asset))
                    .collect())
            })
            .await
    }

    pub async fn list_tags(&self, ctx: &RequestContext) -> Result<Vec<Tag>> {
        self.store.list_tags(ctx).await
    }
}
