use std::sync::{Arc, RwLock};

use anyhow::Context;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::tx::TxEnv;
use super::{ConnectionPool, StorageBackend, StoreOptions, TableCounts, Tables, Tx};
use crate::clock::{Clock, SystemClock};
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::models::{
    normalize_symbol, Account, Asset, AssetKind, Holding, Id, IdGenerator, Tag,
    User, UuidIdGenerator,
};

struct Inner {
    state: RwLock<Arc<Tables>>,
    writer: Arc<Mutex<()>>,
    backend: Arc<dyn StorageBackend>,
    pool: ConnectionPool,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    options: StoreOptions,
}

/// Transactional store over the five persistent entities.
///
/// Committed state is an immutable snapshot. A write transaction works on a
/// private copy and swaps it in after the backend has persisted it, so
/// readers always see a state where every invariant holds. Writers are
/// serialized; their commit order is the global order.
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<Inner>,
}

pub struct StoreBuilder {
    backend: Arc<dyn StorageBackend>,
    options: StoreOptions,
    max_connections: usize,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl StoreBuilder {
    pub fn with_options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Load the backend's last snapshot (if any) and open the store.
    pub async fn open(self) -> anyhow::Result<EntityStore> {
        let tables = match self.backend.load().await? {
            Some(snapshot) => Tables::from_snapshot(snapshot).with_context(|| {
                format!("Stored snapshot in {} is inconsistent", self.backend.name())
            })?,
            None => Tables::default(),
        };
        let counts = tables.counts();
        info!(
            backend = self.backend.name(),
            users = counts.users,
            accounts = counts.accounts,
            assets = counts.assets,
            holdings = counts.holdings,
            "entity store opened"
        );
        Ok(self.build(tables))
    }

    fn build(self, tables: Tables) -> EntityStore {
        EntityStore {
            inner: Arc::new(Inner {
                state: RwLock::new(Arc::new(tables)),
                writer: Arc::new(Mutex::new(())),
                backend: self.backend,
                pool: ConnectionPool::new(self.max_connections),
                ids: self.ids,
                clock: self.clock,
                options: self.options,
            }),
        }
    }
}

impl EntityStore {
    pub fn builder(backend: Arc<dyn StorageBackend>) -> StoreBuilder {
        StoreBuilder {
            backend,
            options: StoreOptions::default(),
            max_connections: 8,
            ids: Arc::new(UuidIdGenerator),
            clock: Arc::new(SystemClock),
        }
    }

    /// Empty store on a fresh memory backend.
    pub fn in_memory(options: StoreOptions) -> Self {
        Self::builder(Arc::new(super::MemoryBackend::new()))
            .with_options(options)
            .build(Tables::default())
    }

    pub fn options(&self) -> StoreOptions {
        self.inner.options
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Current committed snapshot. Never blocks on writers.
    pub fn snapshot(&self) -> Arc<Tables> {
        Arc::clone(&self.inner.state.read().expect("store state lock poisoned"))
    }

    /// Run `f` against a consistent snapshot while holding a connection.
    pub async fn read<T, F>(&self, ctx: &RequestContext, f: F) -> Result<T>
    where
        F: FnOnce(&Tables) -> Result<T>,
    {
        let _conn = self.inner.pool.acquire(ctx).await?;
        let snapshot = self.snapshot();
        f(&snapshot)
    }

    /// Run `f` as one write transaction.
    ///
    /// Errors from `f`, and cancellation observed before the commit point,
    /// discard the working copy. Once the commit starts it completes even if
    /// the caller goes away.
    pub async fn transaction<T, F>(&self, ctx: &RequestContext, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tx<'_>) -> Result<T> + Send,
        T: Send,
    {
        let _conn = self.inner.pool.acquire(ctx).await?;
        let writer = Arc::clone(&self.inner.writer);
        let writer = ctx
            .run(async move { Ok::<_, Error>(writer.lock_owned().await) })
            .await?;

        let mut working = (*self.snapshot()).clone();
        let env = TxEnv {
            now: self.inner.clock.now(),
            ids: Arc::clone(&self.inner.ids),
            options: self.inner.options,
        };
        let value = {
            let mut tx = Tx::new(&mut working, &env);
            f(&mut tx)?
        };

        if cfg!(debug_assertions) {
            if let Err(err) = working.check_invariants() {
                error!(error = %err, "transaction would violate store invariants");
                return Err(Error::Internal("store invariant violated".to_string()));
            }
        }

        // Commit point.
        ctx.check()?;

        let inner = Arc::clone(&self.inner);
        let commit = tokio::spawn(async move {
            let _writer = writer;
            inner.backend.persist(&working).await?;
            *inner.state.write().expect("store state lock poisoned") = Arc::new(working);
            Ok::<_, anyhow::Error>(())
        });

        match commit.await {
            Ok(Ok(())) => Ok(value),
            Ok(Err(err)) => {
                error!(
                    backend = self.inner.backend.name(),
                    error = format!("{err:#}"),
                    "failed to persist transaction"
                );
                Err(Error::unavailable("storage write failed"))
            }
            Err(err) => {
                error!(error = %err, "commit task aborted");
                Err(Error::Internal("commit task aborted".to_string()))
            }
        }
    }

    pub fn counts(&self) -> TableCounts {
        self.snapshot().counts()
    }

    pub fn check_invariants(&self) -> Result<()> {
        self.snapshot()
            .check_invariants()
            .map_err(|err| Error::Internal(err.to_string()))
    }

    // Users

    pub async fn create_user(&self, ctx: &RequestContext) -> Result<User> {
        let user = self.transaction(ctx, |tx| Ok(tx.create_user())).await?;
        info!(user_id = %user.id, "user created");
        Ok(user)
    }

    pub async fn get_user(&self, ctx: &RequestContext, id: &Id) -> Result<User> {
        self.read(ctx, |t| {
            t.user(id)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("user {id}")))
        })
        .await
    }

    pub async fn delete_user(&self, ctx: &RequestContext, id: &Id) -> Result<()> {
        self.transaction(ctx, |tx| tx.delete_user(id)).await?;
        info!(user_id = %id, "user deleted");
        Ok(())
    }

    // Accounts

    pub async fn create_account(&self, ctx: &RequestContext, owner_id: &Id) -> Result<Account> {
        let account = self
            .transaction(ctx, |tx| tx.create_account(owner_id))
            .await?;
        info!(account_id = %account.id, owner_id = %owner_id, "account created");
        Ok(account)
    }

    pub async fn get_account(&self, ctx: &RequestContext, id: &Id) -> Result<Account> {
        self.read(ctx, |t| {
            t.account(id)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("account {id}")))
        })
        .await
    }

    pub async fn delete_account(&self, ctx: &RequestContext, id: &Id) -> Result<()> {
        self.transaction(ctx, |tx| tx.delete_account(id)).await?;
        info!(account_id = %id, "account deleted");
        Ok(())
    }

    pub async fn list_accounts(&self, ctx: &RequestContext, user_id: &Id) -> Result<Vec<Account>> {
        self.read(ctx, |t| {
            if t.user(user_id).is_none() {
                return Err(Error::not_found(format!("user {user_id}")));
            }
            Ok(t.accounts_of(user_id))
        })
        .await
    }

    // Assets and tags

    pub async fn create_asset(
        &self,
        ctx: &RequestContext,
        symbol: &str,
        kind: AssetKind,
    ) -> Result<Asset> {
        let asset = self
            .transaction(ctx, |tx| tx.create_asset(symbol, kind))
            .await?;
        info!(asset_id = %asset.id, symbol = %asset.symbol, kind = %asset.kind, "asset created");
        Ok(asset)
    }

    pub async fn get_asset(&self, ctx: &RequestContext, id: &Id) -> Result<Asset> {
        self.read(ctx, |t| {
            t.asset(id)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("asset {id}")))
        })
        .await
    }

    /// Lookup by symbol, normalizing it first.
    pub async fn find_asset_by_symbol(&self, ctx: &RequestContext, symbol: &str) -> Result<Asset> {
        let symbol = normalize_symbol(symbol)?;
        self.read(ctx, |t| {
            t.asset_by_symbol(&symbol)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("asset {symbol}")))
        })
        .await
    }

    pub async fn list_assets(&self, ctx: &RequestContext, tag: Option<&str>) -> Result<Vec<Asset>> {
        let tag = tag
            .map(crate::models::normalize_tag_name)
            .transpose()?;
        self.read(ctx, |t| Ok(t.assets_sorted(tag.as_deref())))
            .await
    }

    pub async fn delete_asset(&self, ctx: &RequestContext, id: &Id) -> Result<()> {
        self.transaction(ctx, |tx| tx.delete_asset(id)).await?;
        info!(asset_id = %id, "asset deleted");
        Ok(())
    }

    /// Idempotent; creates the tag on first use.
    pub async fn attach_tag(&self, ctx: &RequestContext, asset_id: &Id, tag_name: &str) -> Result<()> {
        let added = self
            .transaction(ctx, |tx| tx.attach_tag(asset_id, tag_name))
            .await?;
        debug!(asset_id = %asset_id, tag = tag_name, added, "attach tag");
        Ok(())
    }

    /// Idempotent on absence.
    pub async fn detach_tag(&self, ctx: &RequestContext, asset_id: &Id, tag_name: &str) -> Result<()> {
        let removed = self
            .transaction(ctx, |tx| tx.detach_tag(asset_id, tag_name))
            .await?;
        debug!(asset_id = %asset_id, tag = tag_name, removed, "detach tag");
        Ok(())
    }

    pub async fn list_asset_tags(&self, ctx: &RequestContext, asset_id: &Id) -> Result<Vec<Tag>> {
        self.read(ctx, |t| {
            if t.asset(asset_id).is_none() {
                return Err(Error::not_found(format!("asset {asset_id}")));
            }
            Ok(t.tags_of(asset_id))
        })
        .await
    }

    pub async fn list_tags(&self, ctx: &RequestContext) -> Result<Vec<Tag>> {
        self.read(ctx, |t| Ok(t.tags_sorted())).await
    }

    // Holdings

    pub async fn upsert_holding(
        &self,
        ctx: &RequestContext,
        account_id: &Id,
        asset_id: &Id,
        quantity: Decimal,
    ) -> Result<Option<Holding>> {
        let holding = self
            .transaction(ctx, |tx| tx.upsert_holding(account_id, asset_id, quantity))
            .await?;
        match &holding {
            Some(h) => info!(
                holding_id = %h.id,
                account_id = %account_id,
                asset_id = %asset_id,
                quantity = %h.quantity,
                "holding upserted"
            ),
            None => info!(
                account_id = %account_id,
                asset_id = %asset_id,
                "holding cleared"
            ),
        }
        Ok(holding)
    }

    pub async fn get_holding(&self, ctx: &RequestContext, id: &Id) -> Result<Holding> {
        self.read(ctx, |t| {
            t.holding(id)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("holding {id}")))
        })
        .await
    }

    /// Ordered by `(asset.symbol, holding.id)`.
    pub async fn list_holdings(&self, ctx: &RequestContext, account_id: &Id) -> Result<Vec<Holding>> {
        self.read(ctx, |t| {
            if t.account(account_id).is_none() {
                return Err(Error::not_found(format!("account {account_id}")));
            }
            Ok(t.holdings_of(account_id))
        })
        .await
    }
}
