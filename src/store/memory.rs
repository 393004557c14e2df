//! In-process counter store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::CounterStore;
use crate::context::Context;
use crate::error::Result;

/// A single key's counter state.
#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    /// Current count
    count: u64,
    /// When the count drops back to zero, if ever
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// A counter store backed by a concurrent hash map.
///
/// Expiry is applied lazily: an entry whose TTL has passed reads as absent
/// and is reinitialised by the next increment. Keys that are never touched
/// again (old sliding windows, departed clients) are only dropped by
/// [`MemoryStore::purge_expired`], which a store built with
/// [`MemoryStore::with_janitor`] runs on its own.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    janitor: CancellationToken,
}

impl MemoryStore {
    /// Create an empty store with no background purging.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that purges expired entries every `period`.
    ///
    /// The purge task holds only a weak reference and ends when the store is
    /// dropped or [`MemoryStore::stop_janitor`] is called. Must run inside a
    /// Tokio runtime.
    pub fn with_janitor(period: Duration) -> Arc<Self> {
        let store = Arc::new(Self::new());
        let weak = Arc::downgrade(&store);
        let shutdown = store.janitor.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => match weak.upgrade() {
                        Some(store) => {
                            store.purge_expired();
                        }
                        None => break,
                    },
                }
            }

            debug!("Counter store janitor stopped");
        });

        store
    }

    /// Halt background purging. Safe to call more than once.
    pub fn stop_janitor(&self) {
        self.janitor.cancel();
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            trace!(purged, "Purged expired counters");
        }
        purged
    }

    /// Number of tracked keys, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store tracks no keys at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read a live entry.
    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        self.entries
            .get(key)
            .map(|entry| *entry)
            .filter(|entry| !entry.is_expired(now))
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.janitor.cancel();
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, _ctx: &Context, key: &str) -> Result<u64> {
        let now = Instant::now();
        // The shard lock held by the entry guard makes this atomic per key.
        let mut entry = self.entries.entry(key.to_string()).or_default();
        if entry.is_expired(now) {
            *entry = Entry::default();
        }
        entry.count += 1;
        Ok(entry.count)
    }

    async fn reset(&self, _ctx: &Context, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn get(&self, _ctx: &Context, key: &str) -> Result<u64> {
        Ok(self.live(key).map(|entry| entry.count).unwrap_or(0))
    }

    async fn set_ttl(&self, _ctx: &Context, key: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_default();
        if entry.is_expired(now) {
            *entry = Entry::default();
        }
        entry.expires_at = Some(now + ttl);
        Ok(())
    }

    async fn ttl(&self, _ctx: &Context, key: &str) -> Result<Duration> {
        let now = Instant::now();
        Ok(self
            .live(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO))
    }
}
