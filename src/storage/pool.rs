use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::context::RequestContext;
use crate::error::{Error, Result};

/// Bounds how many store operations run at once.
///
/// A [`Connection`] is held for the duration of one operation and released
/// on drop, whichever way the operation exits.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    permits: Arc<Semaphore>,
    size: usize,
}

#[derive(Debug)]
pub struct Connection {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn acquire(&self, ctx: &RequestContext) -> Result<Connection> {
        let permits = Arc::clone(&self.permits);
        ctx.run(async move {
            permits
                .acquire_owned()
                .await
                .map(|permit| Connection { _permit: permit })
                .map_err(|_| Error::unavailable("store is shut down"))
        })
        .await
    }

    /// Refuse new connections. Held connections finish normally.
    pub fn close(&self) {
        self.permits.close();
    }
}
