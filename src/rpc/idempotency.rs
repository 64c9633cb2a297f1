//! Replay of responses for repeated idempotency keys.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::status::Status;
use crate::clock::{elapsed, Clock, SystemClock};
use crate::error::ErrorKind;

type SlotKey = (String, String);

struct Record {
    stored_at: DateTime<Utc>,
    /// Serialized `Result<T, Status>`.
    outcome: serde_json::Value,
}

type Slot = Arc<tokio::sync::Mutex<Option<Record>>>;

/// Stores one outcome per (method, key) for a fixed window.
///
/// Requests sharing a key are serialized on that key, so the handler runs
/// once and later requests replay its outcome. Cancelled and timed-out
/// outcomes are not stored.
pub struct IdempotencyCache {
    window: Duration,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<SlotKey, Slot>>,
}

impl IdempotencyCache {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of keys currently tracked, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.slots.lock().expect("idempotency slots poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `handler` unless `key` already has an outcome for `method`.
    pub async fn run<T, F, Fut>(&self, method: &str, key: Option<&str>, handler: F) -> Result<T, Status>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return handler().await;
        };

        let slot = self.slot(method, key);
        let mut record = slot.lock().await;
        let now = self.clock.now();

        if let Some(stored) = record.as_ref() {
            if elapsed(stored.stored_at, now) < self.window {
                debug!(method, key, "replaying idempotent response");
                return serde_json::from_value::<Result<T, Status>>(stored.outcome.clone())
                    .unwrap_or_else(|e| {
                        warn!(method, key, error = %e, "stored response no longer decodes");
                        Err(Status::new(ErrorKind::Internal, "internal error"))
                    });
            }
            *record = None;
        }

        let outcome = handler().await;
        let aborted = matches!(&outcome, Err(status) if status.code.is_caller_abort());
        if !aborted {
            match serde_json::to_value(&outcome) {
                Ok(value) => {
                    *record = Some(Record {
                        stored_at: self.clock.now(),
                        outcome: value,
                    })
                }
                Err(e) => warn!(method, key, error = %e, "response not stored"),
            }
        }
        outcome
    }

    fn slot(&self, method: &str, key: &str) -> Slot {
        let mut slots = self.slots.lock().expect("idempotency slots poisoned");
        self.purge_expired(&mut slots);
        slots
            .entry((method.to_string(), key.to_string()))
            .or_default()
            .clone()
    }

    /// Drop idle slots whose outcome has expired or was never stored. Slots
    /// with a request in progress are left alone.
    fn purge_expired(&self, slots: &mut HashMap<SlotKey, Slot>) {
        let now = self.clock.now();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(record) => record
                    .as_ref()
                    .is_some_and(|r| elapsed(r.stored_at, now) < self.window),
                Err(_) => true,
            }
        });
    }
}
