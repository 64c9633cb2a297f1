//! Entity store: users, accounts, holdings, assets and tags.

mod json_file;
mod memory;
mod pool;
mod store;
mod tables;
mod tx;

pub use json_file::JsonFileBackend;
pub use memory::MemoryBackend;
pub use pool::{Connection, ConnectionPool};
pub use store::{EntityStore, StoreBuilder};
pub use tables::{AssetTagEdge, Snapshot, TableCounts, Tables};
pub use tx::{StoreOptions, Tx};

use anyhow::Result;

/// Durable home for committed snapshots.
///
/// `persist` is called once per committed write transaction, after the
/// commit point, with the full new state.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Load the last persisted snapshot, `None` for a fresh store.
    async fn load(&self) -> Result<Option<Snapshot>>;

    async fn persist(&self, tables: &Tables) -> Result<()>;

    fn name(&self) -> &str;
}
