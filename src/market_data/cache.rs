//! Sharded in-memory quote cache with TTLs, LRU capacity and single-flight
//! refresh.
//!
//! Entry lifecycle: `empty -> fetching -> fresh -> stale -> fetching -> fresh`,
//! or back to `empty` on eviction. Entries with a refresh in flight are never
//! evicted. Every entry, including its in-flight slot, lives in exactly one
//! shard; shard locks are never held across an `.await`.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::{Quote, QuoteFetcher};
use crate::clock::{elapsed, Clock, SystemClock};
use crate::config::PricingConfig;
use crate::context::RequestContext;
use crate::error::{Error, ErrorKind, Result};
use crate::models::{Asset, Id};

/// How old a quote the caller is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxStaleness {
    /// Any quote the cache still holds.
    #[default]
    Unbounded,
    Bounded(Duration),
}

impl MaxStaleness {
    pub fn allows(&self, age: Duration) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Bounded(max) => age <= *max,
        }
    }
}

impl From<Option<Duration>> for MaxStaleness {
    fn from(value: Option<Duration>) -> Self {
        value.map_or(Self::Unbounded, Self::Bounded)
    }
}

/// Outcome of a pure cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Fresh(Quote),
    Stale(Quote),
    Miss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub fresh_ttl: Duration,
    pub stale_ttl: Duration,
    pub capacity: usize,
    pub shards: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from_config(&PricingConfig::default())
    }
}

impl CacheSettings {
    pub fn from_config(config: &PricingConfig) -> Self {
        Self {
            fresh_ttl: config.fresh_ttl,
            stale_ttl: config.stale_ttl,
            capacity: config.cache_capacity.max(1),
            shards: config.cache_shards.max(1),
        }
    }
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub evictions: u64,
    pub size: usize,
}

type FlightResult = Option<Result<Quote>>;

struct Flight {
    id: u64,
    rx: watch::Receiver<FlightResult>,
    /// Synchronous requesters currently waiting.
    waiters: usize,
    /// Background refreshes run to completion even with no waiters.
    detached: bool,
    abort: AbortHandle,
}

#[derive(Default)]
struct Entry {
    quote: Option<Quote>,
    last_access: u64,
    flight: Option<Flight>,
    /// Highest `as_of` accepted per source.
    high_water: HashMap<String, DateTime<Utc>>,
}

impl Entry {
    fn evictable(&self) -> bool {
        self.flight.is_none()
    }

    /// Accept `quote` unless it is older than what this source already gave
    /// us.
    fn accept(&mut self, quote: Quote) -> bool {
        if let Some(seen) = self.high_water.get(&quote.source) {
            if quote.as_of < *seen {
                return false;
            }
        }
        self.high_water
            .insert(quote.source.clone(), quote.as_of);
        self.quote = Some(quote);
        true
    }
}

#[derive(Default)]
struct Shard {
    entries: HashMap<Id, Entry>,
    pinned: HashSet<Id>,
}

struct Inner {
    shards: Vec<Mutex<Shard>>,
    fetcher: Arc<dyn QuoteFetcher>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    tick: AtomicU64,
    next_flight: AtomicU64,
    size: AtomicUsize,
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    evictions: AtomicU64,
}

/// Bounded cache of the latest quote per asset.
#[derive(Clone)]
pub struct PriceCache {
    inner: Arc<Inner>,
}

enum Plan {
    Serve(Quote),
    Wait {
        flight_id: u64,
        rx: watch::Receiver<FlightResult>,
    },
}

impl PriceCache {
    pub fn new(fetcher: Arc<dyn QuoteFetcher>, settings: CacheSettings) -> Self {
        Self::with_clock(fetcher, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        fetcher: Arc<dyn QuoteFetcher>,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shards = (0..settings.shards.max(1))
            .map(|_| Mutex::new(Shard::default()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                shards,
                fetcher,
                clock,
                settings,
                tick: AtomicU64::new(0),
                next_flight: AtomicU64::new(1),
                size: AtomicUsize::new(0),
                hits: AtomicU64::new(0),
                stale_hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                fetches: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> CacheSettings {
        self.inner.settings
    }

    /// Number of entries, including ones still being fetched.
    pub fn len(&self) -> usize {
        self.inner.size.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        CacheStats {
            hits: inner.hits.load(Ordering::Relaxed),
            stale_hits: inner.stale_hits.load(Ordering::Relaxed),
            misses: inner.misses.load(Ordering::Relaxed),
            fetches: inner.fetches.load(Ordering::Relaxed),
            evictions: inner.evictions.load(Ordering::Relaxed),
            size: self.len(),
        }
    }

    /// Classify what the cache holds for `asset_id` without fetching.
    pub fn peek(&self, asset_id: &Id) -> Lookup {
        let now = self.inner.clock.now();
        let shard = self.inner.shard(asset_id);
        shard
            .entries
            .get(asset_id)
            .and_then(|e| e.quote.as_ref())
            .map_or(Lookup::Miss, |q| self.inner.classify(q, now))
    }

    /// Return a quote for `asset`, refreshing through the fetcher when the
    /// cached one is missing or older than `max_staleness` allows.
    ///
    /// Concurrent callers for the same asset share one fetch. If the fetch
    /// comes back `UNAVAILABLE`, a quote still within `stale_ttl` is served
    /// instead.
    pub async fn get(
        &self,
        ctx: &RequestContext,
        asset: &Asset,
        max_staleness: MaxStaleness,
    ) -> Result<Quote> {
        ctx.check()?;
        let plan = self.plan(asset, max_staleness);
        let (flight_id, rx) = match plan {
            Plan::Serve(quote) => return Ok(quote),
            Plan::Wait { flight_id, rx } => (flight_id, rx),
        };

        let guard = WaiterGuard {
            inner: Arc::clone(&self.inner),
            asset_id: asset.id.clone(),
            flight_id,
        };
        let result = ctx.run(wait_for_flight(rx)).await;
        drop(guard);

        match result {
            Err(err) if err.kind() == ErrorKind::Unavailable => {
                let now = self.inner.clock.now();
                let fallback = {
                    let mut shard = self.inner.shard(&asset.id);
                    let tick = self.inner.next_tick();
                    shard.entries.get_mut(&asset.id).and_then(|entry| {
                        let quote = entry.quote.as_ref()?;
                        if elapsed(quote.received_at, now) > self.inner.settings.stale_ttl {
                            return None;
                        }
                        entry.last_access = tick;
                        Some(quote.clone())
                    })
                };
                match fallback {
                    Some(quote) => {
                        warn!(
                            asset_id = %asset.id,
                            error = %err,
                            "refresh unavailable, serving stale quote"
                        );
                        self.inner.stale_hits.fetch_add(1, Ordering::Relaxed);
                        Ok(quote)
                    }
                    None => Err(err),
                }
            }
            other => other,
        }
    }

    fn plan(&self, asset: &Asset, max_staleness: MaxStaleness) -> Plan {
        let inner = &self.inner;
        let now = inner.clock.now();
        let tick = inner.next_tick();
        let mut created = false;

        let plan = {
            let mut shard = inner.shard(&asset.id);
            let entry = shard.entries.entry(asset.id.clone()).or_insert_with(|| {
                created = true;
                Entry::default()
            });
            entry.last_access = tick;

            let age = entry
                .quote
                .as_ref()
                .map(|q| elapsed(q.received_at, now));
            match (entry.quote.clone(), age) {
                (Some(quote), Some(age)) if age <= inner.settings.fresh_ttl => {
                    inner.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(asset_id = %asset.id, "quote cache hit");
                    Plan::Serve(quote)
                }
                (Some(quote), Some(age))
                    if age <= inner.settings.stale_ttl && max_staleness.allows(age) =>
                {
                    inner.stale_hits.fetch_add(1, Ordering::Relaxed);
                    if entry.flight.is_none() {
                        debug!(asset_id = %asset.id, "stale quote served, refreshing in background");
                        self.start_flight(entry, asset, true);
                    }
                    Plan::Serve(quote)
                }
                _ => {
                    inner.misses.fetch_add(1, Ordering::Relaxed);
                    let (flight_id, rx) = match entry.flight.as_mut() {
                        Some(flight) => {
                            flight.waiters += 1;
                            debug!(asset_id = %asset.id, "joining in-flight refresh");
                            (flight.id, flight.rx.clone())
                        }
                        None => {
                            debug!(asset_id = %asset.id, "quote cache miss");
                            self.start_flight(entry, asset, false)
                        }
                    };
                    Plan::Wait { flight_id, rx }
                }
            }
        };

        if created {
            inner.size.fetch_add(1, Ordering::SeqCst);
            inner.enforce_capacity();
        }
        plan
    }

    /// Spawn the fetch for `asset` and park its slot in `entry`. Called with
    /// the shard lock held; the task only touches the shard after its fetch
    /// completes.
    fn start_flight(
        &self,
        entry: &mut Entry,
        asset: &Asset,
        detached: bool,
    ) -> (u64, watch::Receiver<FlightResult>) {
        let inner = Arc::clone(&self.inner);
        let id = inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        let asset = asset.clone();
        let task = tokio::spawn(async move {
            inner.fetches.fetch_add(1, Ordering::Relaxed);
            let result = inner.fetcher.fetch_quote(&asset).await;
            let published = inner.complete(&asset.id, id, result);
            tx.send_replace(Some(published));
            inner.enforce_capacity();
        });
        entry.flight = Some(Flight {
            id,
            rx: rx.clone(),
            waiters: usize::from(!detached),
            detached,
            abort: task.abort_handle(),
        });
        (id, rx)
    }

    /// Write a quote through to the cache. Returns false when it was
    /// discarded as older than one already seen from the same source.
    pub fn insert(&self, quote: Quote, pin: bool) -> bool {
        let inner = &self.inner;
        let tick = inner.next_tick();
        let mut created = false;
        let accepted = {
            let mut shard = inner.shard(&quote.asset_id);
            if pin {
                shard.pinned.insert(quote.asset_id.clone());
            }
            let entry = shard
                .entries
                .entry(quote.asset_id.clone())
                .or_insert_with(|| {
                    created = true;
                    Entry::default()
                });
            entry.last_access = tick;
            entry.accept(quote)
        };
        if created {
            inner.size.fetch_add(1, Ordering::SeqCst);
            inner.enforce_capacity();
        }
        accepted
    }

    /// Exempt an asset from LRU eviction. TTL still applies.
    pub fn pin(&self, asset_id: &Id) {
        self.inner.shard(asset_id).pinned.insert(asset_id.clone());
    }

    pub fn unpin(&self, asset_id: &Id) {
        self.inner.shard(asset_id).pinned.remove(asset_id);
    }

    /// Drop everything cached for an asset. A refresh already in flight
    /// still answers its waiters but its result is not stored.
    pub fn invalidate(&self, asset_id: &Id) {
        let removed = self.inner.shard(asset_id).entries.remove(asset_id);
        let Some(entry) = removed else {
            return;
        };
        self.inner.size.fetch_sub(1, Ordering::SeqCst);
        if let Some(flight) = entry.flight.filter(|f| f.waiters == 0) {
            flight.abort.abort();
        }
        debug!(asset_id = %asset_id, "invalidated cached quote");
    }

    /// Remove every idle entry whose quote is past `stale_ttl`, pinned or
    /// not. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }
}

impl Inner {
    fn shard_index(&self, asset_id: &Id) -> usize {
        let mut hasher = DefaultHasher::new();
        asset_id.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn shard(&self, asset_id: &Id) -> MutexGuard<'_, Shard> {
        self.shards[self.shard_index(asset_id)]
            .lock()
            .expect("price cache shard poisoned")
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    fn classify(&self, quote: &Quote, now: DateTime<Utc>) -> Lookup {
        let age = elapsed(quote.received_at, now);
        if age <= self.settings.fresh_ttl {
            Lookup::Fresh(quote.clone())
        } else if age <= self.settings.stale_ttl {
            Lookup::Stale(quote.clone())
        } else {
            Lookup::Miss
        }
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let stale_ttl = self.settings.stale_ttl;
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().expect("price cache shard poisoned");
            let before = shard.entries.len();
            shard.entries.retain(|_, entry| {
                !entry.evictable()
                    || entry
                        .quote
                        .as_ref()
                        .is_some_and(|q| elapsed(q.received_at, now) <= stale_ttl)
            });
            removed += before - shard.entries.len();
        }
        if removed > 0 {
            self.size.fetch_sub(removed, Ordering::SeqCst);
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "purged expired quotes");
        }
        removed
    }

    /// Clear the flight slot and store the result, under the shard lock.
    /// Returns what waiters should see. A flight that is no longer the
    /// entry's current one (the entry was invalidated or abandoned) only
    /// answers its waiters.
    fn complete(&self, asset_id: &Id, flight_id: u64, result: Result<Quote>) -> Result<Quote> {
        let mut shard = self.shard(asset_id);
        let Some(entry) = shard
            .entries
            .get_mut(asset_id)
            .filter(|e| e.flight.as_ref().is_some_and(|f| f.id == flight_id))
        else {
            debug!(asset_id = %asset_id, "discarding result of superseded refresh");
            return result;
        };
        entry.flight = None;

        let published = match result {
            Ok(quote) => {
                if entry.accept(quote.clone()) {
                    Ok(quote)
                } else {
                    debug!(
                        asset_id = %asset_id,
                        source = %quote.source,
                        as_of = %quote.as_of,
                        "discarding out-of-order quote"
                    );
                    Ok(entry.quote.clone().unwrap_or(quote))
                }
            }
            Err(err) => Err(err),
        };

        let drop_entry = entry.quote.is_none();
        if drop_entry {
            shard.entries.remove(asset_id);
        }
        drop(shard);
        if drop_entry {
            self.size.fetch_sub(1, Ordering::SeqCst);
        }
        published
    }

    /// Evict least-recently-used idle, unpinned entries until the cache is
    /// within capacity. Expired entries go first, pinned ones included.
    fn enforce_capacity(&self) {
        if self.size.load(Ordering::SeqCst) > self.settings.capacity {
            self.purge_expired();
        }
        while self.size.load(Ordering::SeqCst) > self.settings.capacity {
            let mut victim: Option<(usize, Id, u64)> = None;
            for (index, shard) in self.shards.iter().enumerate() {
                let shard = shard.lock().expect("price cache shard poisoned");
                for (id, entry) in &shard.entries {
                    if !entry.evictable() || shard.pinned.contains(id) {
                        continue;
                    }
                    if victim.as_ref().map_or(true, |(_, _, tick)| entry.last_access < *tick) {
                        victim = Some((index, id.clone(), entry.last_access));
                    }
                }
            }

            let Some((index, id, tick)) = victim else {
                return;
            };
            let mut shard = self.shards[index]
                .lock()
                .expect("price cache shard poisoned");
            let still_victim = shard
                .entries
                .get(&id)
                .is_some_and(|e| e.evictable() && e.last_access == tick)
                && !shard.pinned.contains(&id);
            if still_victim {
                shard.entries.remove(&id);
                drop(shard);
                self.size.fetch_sub(1, Ordering::SeqCst);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(asset_id = %id, "evicted least recently used quote");
            }
        }
    }
}

async fn wait_for_flight(mut rx: watch::Receiver<FlightResult>) -> Result<Quote> {
    let outcome = rx
        .wait_for(Option::is_some)
        .await
        .map(|value| value.clone());
    match outcome {
        Ok(Some(result)) => result,
        _ => Err(Error::unavailable("quote refresh was aborted")),
    }
}

/// Releases one waiter's interest in a flight. The last synchronous waiter
/// to leave aborts a refresh nobody else is waiting for.
struct WaiterGuard {
    inner: Arc<Inner>,
    asset_id: Id,
    flight_id: u64,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        let mut shard = self.inner.shard(&self.asset_id);
        let Some(entry) = shard.entries.get_mut(&self.asset_id) else {
            return;
        };
        let Some(flight) = entry.flight.as_mut().filter(|f| f.id == self.flight_id) else {
            return;
        };
        flight.waiters = flight.waiters.saturating_sub(1);
        if flight.waiters > 0 || flight.detached {
            return;
        }
        flight.abort.abort();
        entry.flight = None;
        let remove = entry.quote.is_none();
        if remove {
            shard.entries.remove(&self.asset_id);
        }
        drop(shard);
        if remove {
            self.inner.size.fetch_sub(1, Ordering::SeqCst);
        }
        debug!(asset_id = %self.asset_id, "refresh abandoned by all waiters");
    }
}
