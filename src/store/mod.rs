//! Counter stores: per-key counters with TTL-driven expiry.

mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::context::Context;
use crate::error::Result;

pub use memory::MemoryStore;

/// Trait for per-key counter storage.
///
/// Any backend (in-memory map, remote key-value store, relational table) can
/// back the limiters as long as `increment` is atomic per key and an expired
/// TTL brings the key's count back to zero.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the key and return the post-increment count.
    ///
    /// An absent key is created at 1.
    async fn increment(&self, ctx: &Context, key: &str) -> Result<u64>;

    /// Set the key's count to zero and drop its expiry.
    async fn reset(&self, ctx: &Context, key: &str) -> Result<()>;

    /// Read the key's count without mutating it. Absent keys read as 0.
    async fn get(&self, ctx: &Context, key: &str) -> Result<u64>;

    /// (Re)set the key's expiry.
    async fn set_ttl(&self, ctx: &Context, key: &str, ttl: Duration) -> Result<()>;

    /// Remaining time before the key expires.
    ///
    /// Returns `Duration::ZERO` when no TTL is set or the key is absent.
    async fn ttl(&self, ctx: &Context, key: &str) -> Result<Duration>;
}
