//! In-memory storage backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};

use super::{Snapshot, StorageBackend, Tables};

/// Keeps the last committed snapshot in memory.
///
/// Two stores opened on the same backend see each other's commits on
/// reopen, which makes it useful for exercising load paths in tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    snapshot: Mutex<Option<Snapshot>>,
    fail_persists: AtomicBool,
    persist_count: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent persist fail until reset.
    pub fn set_fail_persists(&self, fail: bool) {
        self.fail_persists.store(fail, Ordering::SeqCst);
    }

    pub fn persist_count(&self) -> usize {
        self.persist_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self
            .snapshot
            .lock()
            .expect("memory backend lock poisoned")
            .clone())
    }

    async fn persist(&self, tables: &Tables) -> Result<()> {
        if self.fail_persists.load(Ordering::SeqCst) {
            bail!("memory backend configured to fail persists");
        }
        let snapshot = tables.to_snapshot();
        *self.snapshot.lock().expect("memory backend lock poisoned") = Some(snapshot);
        self.persist_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
