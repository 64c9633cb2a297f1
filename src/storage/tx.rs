//! Mutations applied to a working copy of [`Tables`] inside a transaction.

use std::collections::BTreeSet;
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::Tables;
use crate::error::{Error, Result};
use crate::models::{
    normalize_symbol, normalize_tag_name, Account, Asset, AssetKind, Holding, Id, IdGenerator,
    Quantity, Tag, User,
};

/// Store-level behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub retain_empty_holdings: bool,
    pub gc_orphan_tags: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            retain_empty_holdings: false,
            gc_orphan_tags: true,
        }
    }
}

pub(super) struct TxEnv {
    pub now: DateTime<Utc>,
    pub ids: Arc<dyn IdGenerator>,
    pub options: StoreOptions,
}

/// A write transaction's view of the tables.
///
/// Reads go through `Deref<Target = Tables>` and see this transaction's own
/// uncommitted writes.
pub struct Tx<'a> {
    tables: &'a mut Tables,
    env: &'a TxEnv,
}

impl Deref for Tx<'_> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        self.tables
    }
}

impl<'a> Tx<'a> {
    pub(super) fn new(tables: &'a mut Tables, env: &'a TxEnv) -> Self {
        Self { tables, env }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.env.now
    }

    pub fn options(&self) -> StoreOptions {
        self.env.options
    }

    pub fn create_user(&mut self) -> User {
        let user = User::new(self.env.ids.new_id(), self.env.now);
        self.tables.users.insert(user.id.clone(), user.clone());
        user
    }

    pub fn delete_user(&mut self, id: &Id) -> Result<()> {
        if !self.tables.users.contains_key(id) {
            return Err(Error::not_found(format!("user {id}")));
        }
        if self
            .tables
            .accounts_by_owner
            .get(id)
            .is_some_and(|accounts| !accounts.is_empty())
        {
            return Err(Error::conflict(format!("user {id} still owns accounts")));
        }
        self.tables.users.remove(id);
        self.tables.accounts_by_owner.remove(id);
        Ok(())
    }

    pub fn create_account(&mut self, owner_id: &Id) -> Result<Account> {
        if !self.tables.users.contains_key(owner_id) {
            return Err(Error::not_found(format!("user {owner_id}")));
        }
        let account = Account::new(self.env.ids.new_id(), owner_id.clone(), self.env.now);
        self.tables
            .accounts_by_owner
            .entry(owner_id.clone())
            .or_default()
            .insert(account.id.clone());
        self.tables
            .accounts
            .insert(account.id.clone(), account.clone());
        Ok(account)
    }

    /// Rejected while the account holds anything, zero-quantity holdings
    /// included.
    pub fn delete_account(&mut self, id: &Id) -> Result<()> {
        let Some(account) = self.tables.accounts.get(id) else {
            return Err(Error::not_found(format!("account {id}")));
        };
        if self.tables.has_holdings_in_account(id) {
            return Err(Error::conflict(format!("account {id} still has holdings")));
        }
        let owner_id = account.owner_id.clone();
        self.tables.accounts.remove(id);
        self.tables.holdings_by_account.remove(id);
        if let Some(owned) = self.tables.accounts_by_owner.get_mut(&owner_id) {
            owned.remove(id);
            if owned.is_empty() {
                self.tables.accounts_by_owner.remove(&owner_id);
            }
        }
        Ok(())
    }

    pub fn create_asset(&mut self, symbol: &str, kind: AssetKind) -> Result<Asset> {
        let symbol = normalize_symbol(symbol)?;
        if self.tables.asset_by_symbol.contains_key(&symbol) {
            return Err(Error::already_exists(format!("asset {symbol}")));
        }
        let asset = Asset {
            id: self.env.ids.new_id(),
            symbol,
            kind,
            created_at: self.env.now,
        };
        self.tables
            .asset_by_symbol
            .insert(asset.symbol.clone(), asset.id.clone());
        self.tables.assets.insert(asset.id.clone(), asset.clone());
        Ok(asset)
    }

    pub fn set_asset_kind(&mut self, id: &Id, kind: AssetKind) -> Result<Asset> {
        let asset = self
            .tables
            .assets
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("asset {id}")))?;
        asset.kind = kind;
        Ok(asset.clone())
    }

    /// Rejected while any holding references the asset. Tag edges go with it.
    pub fn delete_asset(&mut self, id: &Id) -> Result<()> {
        let Some(asset) = self.tables.assets.get(id) else {
            return Err(Error::not_found(format!("asset {id}")));
        };
        if self.tables.has_holdings_for_asset(id) {
            return Err(Error::conflict(format!(
                "asset {} is referenced by holdings",
                asset.symbol
            )));
        }
        let symbol = asset.symbol.clone();
        let tag_ids: Vec<Id> = self.tables.tags_of(id).into_iter().map(|t| t.id).collect();
        for tag_id in tag_ids {
            self.remove_edge(id, &tag_id);
        }
        self.tables.assets.remove(id);
        self.tables.asset_by_symbol.remove(&symbol);
        self.tables.holdings_by_asset.remove(id);
        Ok(())
    }

    /// Get or create a tag by name.
    pub fn ensure_tag(&mut self, tag_name: &str) -> Result<Tag> {
        let name = normalize_tag_name(tag_name)?;
        if let Some(tag) = self.tables.tag_by_name(&name) {
            return Ok(tag.clone());
        }
        let tag = Tag::new(self.env.ids.new_id(), name.clone());
        self.tables.tag_by_name.insert(name, tag.id.clone());
        self.tables.tags.insert(tag.id.clone(), tag.clone());
        Ok(tag)
    }

    /// Attach a tag by name, creating the tag if needed. Returns whether a new
    /// edge was added.
    pub fn attach_tag(&mut self, asset_id: &Id, tag_name: &str) -> Result<bool> {
        self.require_asset(asset_id)?;
        let tag_id = self.ensure_tag(tag_name)?.id;
        let added = self
            .tables
            .asset_tags
            .insert((asset_id.clone(), tag_id.clone()));
        if added {
            self.tables
                .tag_assets
                .entry(tag_id)
                .or_default()
                .insert(asset_id.clone());
        }
        Ok(added)
    }

    /// Detach a tag by name. Returns whether an edge was removed.
    pub fn detach_tag(&mut self, asset_id: &Id, tag_name: &str) -> Result<bool> {
        let name = normalize_tag_name(tag_name)?;
        self.require_asset(asset_id)?;
        let Some(tag_id) = self.tables.tag_by_name.get(&name).cloned() else {
            return Ok(false);
        };
        Ok(self.remove_edge(asset_id, &tag_id))
    }

    /// Replace the asset's tag set with `names`, applying only the diff.
    pub fn set_tags<S: AsRef<str>>(&mut self, asset_id: &Id, names: &[S]) -> Result<()> {
        self.require_asset(asset_id)?;
        let wanted = names
            .iter()
            .map(|n| normalize_tag_name(n.as_ref()))
            .collect::<Result<BTreeSet<String>>>()?;
        let current: BTreeSet<String> = self
            .tables
            .tags_of(asset_id)
            .into_iter()
            .map(|t| t.name)
            .collect();
        for name in current.difference(&wanted) {
            self.detach_tag(asset_id, name)?;
        }
        for name in wanted.difference(&current) {
            self.attach_tag(asset_id, name)?;
        }
        Ok(())
    }

    /// Create, update or remove the holding for `(account_id, asset_id)`.
    ///
    /// Returns the holding as it exists after the call, `None` when a zero
    /// quantity removed it (or never created it).
    pub fn upsert_holding(
        &mut self,
        account_id: &Id,
        asset_id: &Id,
        quantity: Decimal,
    ) -> Result<Option<Holding>> {
        let quantity = Quantity::new(quantity)?;
        if !self.tables.accounts.contains_key(account_id) {
            return Err(Error::not_found(format!("account {account_id}")));
        }
        self.require_asset(asset_id)?;

        let retain = self.env.options.retain_empty_holdings;
        let existing = self
            .tables
            .holding_for(account_id, asset_id)
            .map(|h| h.id.clone());

        match existing {
            Some(holding_id) if quantity.is_zero() && !retain => {
                self.remove_holding(&holding_id);
                Ok(None)
            }
            Some(holding_id) => {
                let now = self.env.now;
                let holding = self
                    .tables
                    .holdings
                    .get_mut(&holding_id)
                    .ok_or_else(|| Error::Internal("holding index out of sync".to_string()))?;
                if holding.quantity != quantity {
                    holding.quantity = quantity;
                    holding.updated_at = now;
                }
                Ok(Some(holding.clone()))
            }
            None if quantity.is_zero() && !retain => Ok(None),
            None => {
                let holding = Holding {
                    id: self.env.ids.new_id(),
                    account_id: account_id.clone(),
                    asset_id: asset_id.clone(),
                    quantity,
                    updated_at: self.env.now,
                };
                self.tables
                    .holdings_by_account
                    .entry(account_id.clone())
                    .or_default()
                    .insert(asset_id.clone(), holding.id.clone());
                self.tables
                    .holdings_by_asset
                    .entry(asset_id.clone())
                    .or_default()
                    .insert(holding.id.clone());
                self.tables
                    .holdings
                    .insert(holding.id.clone(), holding.clone());
                Ok(Some(holding))
            }
        }
    }

    fn require_asset(&self, asset_id: &Id) -> Result<()> {
        if self.tables.assets.contains_key(asset_id) {
            Ok(())
        } else {
            Err(Error::not_found(format!("asset {asset_id}")))
        }
    }

    fn remove_holding(&mut self, holding_id: &Id) {
        let Some(holding) = self.tables.holdings.remove(holding_id) else {
            return;
        };
        if let Some(by_asset) = self.tables.holdings_by_account.get_mut(&holding.account_id) {
            by_asset.remove(&holding.asset_id);
            if by_asset.is_empty() {
                self.tables.holdings_by_account.remove(&holding.account_id);
            }
        }
        if let Some(ids) = self.tables.holdings_by_asset.get_mut(&holding.asset_id) {
            ids.remove(holding_id);
            if ids.is_empty() {
                self.tables.holdings_by_asset.remove(&holding.asset_id);
            }
        }
    }

    fn remove_edge(&mut self, asset_id: &Id, tag_id: &Id) -> bool {
        let removed = self
            .tables
            .asset_tags
            .remove(&(asset_id.clone(), tag_id.clone()));
        if !removed {
            return false;
        }
        let orphaned = match self.tables.tag_assets.get_mut(tag_id) {
            Some(assets) => {
                assets.remove(asset_id);
                assets.is_empty()
            }
            None => true,
        };
        if orphaned {
            self.tables.tag_assets.remove(tag_id);
            if self.env.options.gc_orphan_tags {
                if let Some(tag) = self.tables.tags.remove(tag_id) {
                    self.tables.tag_by_name.remove(&tag.name);
                }
            }
        }
        true
    }
}
