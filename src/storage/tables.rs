//! Committed entity state and its derived indexes.
//!
//! Each relationship is stored once, on the child side. The reverse
//! directions live in indexes that are rebuilt on load and maintained by
//! [`super::Tx`].

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::models::{Account, Asset, Holding, Id, Tag, TaggedAsset, User};

/// One (asset, tag) membership edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetTagEdge {
    pub asset_id: Id,
    pub tag_id: Id,
}

/// Serializable form of [`Tables`], without indexes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub holdings: Vec<Holding>,
    #[serde(default)]
    pub asset_tags: Vec<AssetTagEdge>,
}

#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub(super) users: BTreeMap<Id, User>,
    pub(super) accounts: BTreeMap<Id, Account>,
    pub(super) assets: BTreeMap<Id, Asset>,
    pub(super) tags: BTreeMap<Id, Tag>,
    pub(super) holdings: BTreeMap<Id, Holding>,
    /// (asset_id, tag_id)
    pub(super) asset_tags: BTreeSet<(Id, Id)>,

    pub(super) accounts_by_owner: BTreeMap<Id, BTreeSet<Id>>,
    /// account_id -> asset_id -> holding_id
    pub(super) holdings_by_account: BTreeMap<Id, BTreeMap<Id, Id>>,
    pub(super) holdings_by_asset: BTreeMap<Id, BTreeSet<Id>>,
    pub(super) asset_by_symbol: BTreeMap<String, Id>,
    pub(super) tag_by_name: BTreeMap<String, Id>,
    /// tag_id -> asset_ids
    pub(super) tag_assets: BTreeMap<Id, BTreeSet<Id>>,
}

impl Tables {
    pub fn user(&self, id: &Id) -> Option<&User> {
        self.users.get(id)
    }

    pub fn account(&self, id: &Id) -> Option<&Account> {
        self.accounts.get(id)
    }

    pub fn asset(&self, id: &Id) -> Option<&Asset> {
        self.assets.get(id)
    }

    /// Lookup by an already normalized symbol.
    pub fn asset_by_symbol(&self, symbol: &str) -> Option<&Asset> {
        self.asset_by_symbol
            .get(symbol)
            .and_then(|id| self.assets.get(id))
    }

    pub fn tag_by_name(&self, name: &str) -> Option<&Tag> {
        self.tag_by_name.get(name).and_then(|id| self.tags.get(id))
    }

    pub fn holding(&self, id: &Id) -> Option<&Holding> {
        self.holdings.get(id)
    }

    pub fn holding_for(&self, account_id: &Id, asset_id: &Id) -> Option<&Holding> {
        self.holdings_by_account
            .get(account_id)
            .and_then(|by_asset| by_asset.get(asset_id))
            .and_then(|id| self.holdings.get(id))
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// Accounts owned by `owner_id`, ordered by id.
    pub fn accounts_of(&self, owner_id: &Id) -> Vec<Account> {
        self.accounts_by_owner
            .get(owner_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.accounts.get(id).cloned())
            .collect()
    }

    /// Holdings of an account ordered by `(asset.symbol, holding.id)`.
    pub fn holdings_of(&self, account_id: &Id) -> Vec<Holding> {
        let mut holdings: Vec<(&str, &Holding)> = self
            .holdings_by_account
            .get(account_id)
            .into_iter()
            .flat_map(|by_asset| by_asset.values())
            .filter_map(|id| self.holdings.get(id))
            .map(|h| {
                let symbol = self
                    .assets
                    .get(&h.asset_id)
                    .map(|a| a.symbol.as_str())
                    .unwrap_or_default();
                (symbol, h)
            })
            .collect();
        holdings.sort_by(|(sa, ha), (sb, hb)| sa.cmp(sb).then_with(|| ha.id.cmp(&hb.id)));
        holdings.into_iter().map(|(_, h)| h.clone()).collect()
    }

    pub fn has_holdings_for_asset(&self, asset_id: &Id) -> bool {
        self.holdings_by_asset
            .get(asset_id)
            .is_some_and(|ids| !ids.is_empty())
    }

    pub fn has_holdings_in_account(&self, account_id: &Id) -> bool {
        self.holdings_by_account
            .get(account_id)
            .is_some_and(|ids| !ids.is_empty())
    }

    /// Tags of an asset, sorted by name.
    pub fn tags_of(&self, asset_id: &Id) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .asset_tags
            .range((asset_id.clone(), Id::from_string(""))..)
            .take_while(|(a, _)| a == asset_id)
            .filter_map(|(_, tag_id)| self.tags.get(tag_id).cloned())
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags
    }

    pub fn tagged(&self, asset: &Asset) -> TaggedAsset {
        TaggedAsset {
            asset: asset.clone(),
            tags: self.tags_of(&asset.id),
        }
    }

    /// Assets ordered by symbol, optionally restricted to one tag.
    pub fn assets_sorted(&self, tag: Option<&str>) -> Vec<Asset> {
        match tag {
            None => self
                .asset_by_symbol
                .values()
                .filter_map(|id| self.assets.get(id).cloned())
                .collect(),
            Some(name) => {
                let Some(tag) = self.tag_by_name(name) else {
                    return Vec::new();
                };
                let mut assets: Vec<Asset> = self
                    .tag_assets
                    .get(&tag.id)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| self.assets.get(id).cloned())
                    .collect();
                assets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
                assets
            }
        }
    }

    /// Tags ordered by name.
    pub fn tags_sorted(&self) -> Vec<Tag> {
        self.tag_by_name
            .values()
            .filter_map(|id| self.tags.get(id).cloned())
            .collect()
    }

    pub fn counts(&self) -> TableCounts {
        TableCounts {
            users: self.users.len(),
            accounts: self.accounts.len(),
            assets: self.assets.len(),
            tags: self.tags.len(),
            holdings: self.holdings.len(),
            asset_tags: self.asset_tags.len(),
        }
    }

    /// Re-validate referential and uniqueness invariants, including index
    /// consistency.
    pub fn check_invariants(&self) -> Result<()> {
        for account in self.accounts.values() {
            if !self.users.contains_key(&account.owner_id) {
                bail!("account {} references missing user {}", account.id, account.owner_id);
            }
        }

        let mut pairs = BTreeSet::new();
        for holding in self.holdings.values() {
            if !self.accounts.contains_key(&holding.account_id) {
                bail!("holding {} references missing account", holding.id);
            }
            if !self.assets.contains_key(&holding.asset_id) {
                bail!("holding {} references missing asset", holding.id);
            }
            if holding.quantity.value().is_sign_negative() && !holding.quantity.is_zero() {
                bail!("holding {} has negative quantity", holding.id);
            }
            if !pairs.insert((&holding.account_id, &holding.asset_id)) {
                bail!(
                    "duplicate holding for account {} asset {}",
                    holding.account_id,
                    holding.asset_id
                );
            }
            let indexed = self
                .holdings_by_account
                .get(&holding.account_id)
                .and_then(|m| m.get(&holding.asset_id));
            if indexed != Some(&holding.id) {
                bail!("holding {} missing from account index", holding.id);
            }
        }

        let mut symbols = BTreeSet::new();
        for asset in self.assets.values() {
            if asset.symbol != asset.symbol.to_uppercase() {
                bail!("asset {} symbol not normalized", asset.id);
            }
            if !symbols.insert(asset.symbol.as_str()) {
                bail!("duplicate asset symbol {}", asset.symbol);
            }
        }
        if self.asset_by_symbol.len() != self.assets.len() {
            bail!("symbol index out of sync");
        }

        let mut names = BTreeSet::new();
        for tag in self.tags.values() {
            if tag.name != tag.name.to_lowercase() {
                bail!("tag {} name not normalized", tag.id);
            }
            if !names.insert(tag.name.as_str()) {
                bail!("duplicate tag name {}", tag.name);
            }
        }
        if self.tag_by_name.len() != self.tags.len() {
            bail!("tag name index out of sync");
        }

        for (asset_id, tag_id) in &self.asset_tags {
            if !self.assets.contains_key(asset_id) || !self.tags.contains_key(tag_id) {
                bail!("dangling asset-tag edge ({asset_id}, {tag_id})");
            }
        }
        let reverse_edges: usize = self.tag_assets.values().map(BTreeSet::len).sum();
        if reverse_edges != self.asset_tags.len() {
            bail!("tag membership index out of sync");
        }

        Ok(())
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            users: self.users.values().cloned().collect(),
            accounts: self.accounts.values().cloned().collect(),
            assets: self.assets.values().cloned().collect(),
            tags: self.tags.values().cloned().collect(),
            holdings: self.holdings.values().cloned().collect(),
            asset_tags: self
                .asset_tags
                .iter()
                .map(|(asset_id, tag_id)| AssetTagEdge {
                    asset_id: asset_id.clone(),
                    tag_id: tag_id.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild tables and indexes from a snapshot, rejecting one that
    /// violates the invariants.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let mut tables = Tables::default();
        for user in snapshot.users {
            tables.users.insert(user.id.clone(), user);
        }
        for account in snapshot.accounts {
            tables
                .accounts_by_owner
                .entry(account.owner_id.clone())
                .or_default()
                .insert(account.id.clone());
            tables.accounts.insert(account.id.clone(), account);
        }
        for asset in snapshot.assets {
            tables
                .asset_by_symbol
                .insert(asset.symbol.clone(), asset.id.clone());
            tables.assets.insert(asset.id.clone(), asset);
        }
        for tag in snapshot.tags {
            tables.tag_by_name.insert(tag.name.clone(), tag.id.clone());
            tables.tags.insert(tag.id.clone(), tag);
        }
        for holding in snapshot.holdings {
            tables
                .holdings_by_account
                .entry(holding.account_id.clone())
                .or_default()
                .insert(holding.asset_id.clone(), holding.id.clone());
            tables
                .holdings_by_asset
                .entry(holding.asset_id.clone())
                .or_default()
                .insert(holding.id.clone());
            tables.holdings.insert(holding.id.clone(), holding);
        }
        for edge in snapshot.asset_tags {
            tables
                .tag_assets
                .entry(edge.tag_id.clone())
                .or_default()
                .insert(edge.asset_id.clone());
            tables.asset_tags.insert((edge.asset_id, edge.tag_id));
        }
        tables.check_invariants()?;
        Ok(tables)
    }
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub users: usize,
    pub accounts: usize,
    pub assets: usize,
    pub tags: usize,
    pub holdings: usize,
    pub asset_tags: usize,
}
