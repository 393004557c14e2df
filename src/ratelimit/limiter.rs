//! The contract shared by every rate limiting algorithm.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use super::algorithm::Algorithm;
use crate::context::Context;
use crate::error::Result;
use crate::params::ParameterSource;
use crate::store::CounterStore;

/// Trait for rate limiter implementations.
///
/// One instance is held per algorithm/configuration pair and consulted with
/// [`RateLimiter::allow`] before each unit of work for a key. Calls through
/// one instance are serialized; instances sharing a store are not.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Which strategy this limiter implements.
    fn algorithm(&self) -> Algorithm;

    /// Admit or deny one unit of work for `key`.
    ///
    /// An `Err` means the decision is unknown. State mutated before the
    /// failure is left in place.
    async fn allow(&self, ctx: &Context, key: &str) -> Result<bool>;

    /// Snapshot of the key's usage. Never mutates state.
    async fn quota(&self, ctx: &Context, key: &str) -> Result<Quota>;

    /// Estimated wait before the key's window or bucket resets.
    async fn next_allowed(&self, ctx: &Context, key: &str) -> Result<Duration>;

    /// Like [`RateLimiter::allow`], but an error counts as a denial.
    async fn admit(&self, ctx: &Context, key: &str) -> bool {
        match self.allow(ctx, key).await {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(
                    key = %key,
                    algorithm = %self.algorithm(),
                    error = %e,
                    "Admission undetermined, denying request"
                );
                false
            }
        }
    }

    /// Halt background activity. Safe to call more than once.
    async fn stop(&self) {}
}

/// Usage snapshot returned by [`RateLimiter::quota`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quota {
    /// Requests counted against the key
    pub current: u64,
    /// Steady-state ceiling per interval
    pub max_requests: u64,
    /// Extra admissions tolerated above the ceiling
    pub burst_limit: u64,
}

impl Quota {
    /// Admissions left before the key is denied.
    pub fn remaining(&self) -> u64 {
        self.max_requests
            .saturating_add(self.burst_limit)
            .saturating_sub(self.current)
    }
}

/// The limits read from a parameter source for one call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub max_requests: u64,
    pub interval: Duration,
    pub burst_limit: u64,
}

impl Limits {
    /// Read all three limits, honoring the context on each call.
    pub async fn load(ctx: &Context, params: &dyn ParameterSource) -> Result<Self> {
        let max_requests = ctx.run(params.max_requests(ctx)).await?;
        let interval = ctx.run(params.interval(ctx)).await?;
        let burst_limit = ctx.run(params.burst_limit(ctx)).await?;
        Ok(Self {
            max_requests,
            interval,
            burst_limit,
        })
    }

    /// Highest count that is still admitted.
    pub fn ceiling(&self) -> u64 {
        self.max_requests.saturating_add(self.burst_limit)
    }
}

/// Take the instance lock unless the context finishes first.
pub(crate) async fn acquire<'a>(ctx: &Context, lock: &'a Mutex<()>) -> Result<MutexGuard<'a, ()>> {
    ctx.run(async { Ok(lock.lock().await) }).await
}

/// Quota for algorithms whose per-key count lives under `key` itself.
pub(crate) async fn counter_quota(
    ctx: &Context,
    store: &dyn CounterStore,
    params: &dyn ParameterSource,
    key: &str,
) -> Result<Quota> {
    let current = ctx.run(store.get(ctx, key)).await?;
    let max_requests = ctx.run(params.max_requests(ctx)).await?;
    let burst_limit = ctx.run(params.burst_limit(ctx)).await?;
    Ok(Quota {
        current,
        max_requests,
        burst_limit,
    })
}

/// Remaining TTL of `key`, zero when none is set.
pub(crate) async fn ttl_wait(ctx: &Context, store: &dyn CounterStore, key: &str) -> Result<Duration> {
    ctx.run(store.ttl(ctx, key)).await
}
