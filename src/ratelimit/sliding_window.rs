//! Sliding window rate limiting.
//!
//! Windows are aligned to the Unix epoch in multiples of the interval. The
//! count for each window is kept in the counter store under
//! `"{key}:{window}"` and lives on through the following window, where it is
//! weighted by how much of that window is still ahead:
//!
//! ```text
//! estimated = current + previous * (1 - elapsed / interval)
//! ```

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::algorithm::Algorithm;
use super::limiter::{acquire, Limits, Quota, RateLimiter};
use crate::context::Context;
use crate::error::Result;
use crate::params::ParameterSource;
use crate::store::CounterStore;

/// Where a moment falls relative to the epoch-aligned windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowPosition {
    /// Index of the window containing the moment
    index: u64,
    /// Time already spent in that window
    elapsed: Duration,
    /// Window length
    interval: Duration,
}

impl WindowPosition {
    fn at(now_ms: u64, interval: Duration) -> Self {
        let interval_ms = (interval.as_millis() as u64).max(1);
        Self {
            index: now_ms / interval_ms,
            elapsed: Duration::from_millis(now_ms % interval_ms),
            interval: Duration::from_millis(interval_ms),
        }
    }

    fn now(interval: Duration) -> Self {
        let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        Self::at(now_ms, interval)
    }

    fn elapsed_fraction(&self) -> f64 {
        self.elapsed.as_secs_f64() / self.interval.as_secs_f64()
    }

    /// Time until this window closes.
    fn remaining(&self) -> Duration {
        self.interval.saturating_sub(self.elapsed)
    }
}

/// Blend the current window's count with the tail of the previous one.
pub(crate) fn weighted_count(current: u64, previous: u64, elapsed_fraction: f64) -> f64 {
    let weight = 1.0 - elapsed_fraction.clamp(0.0, 1.0);
    current as f64 + previous as f64 * weight
}

fn window_key(key: &str, index: u64) -> String {
    format!("{}:{}", key, index)
}

/// Sliding window limiter.
///
/// Admission is decided before counting: a request is admitted when the
/// estimate including it stays within `max_requests + burst_limit`, and
/// denied requests are not counted.
pub struct SlidingWindow {
    store: Arc<dyn CounterStore>,
    params: Arc<dyn ParameterSource>,
    lock: Mutex<()>,
}

impl SlidingWindow {
    /// Create a new sliding window limiter.
    pub fn new(store: Arc<dyn CounterStore>, params: Arc<dyn ParameterSource>) -> Self {
        Self {
            store,
            params,
            lock: Mutex::new(()),
        }
    }

    /// Counts for the current and previous window.
    async fn counts(&self, ctx: &Context, key: &str, position: &WindowPosition) -> Result<(u64, u64)> {
        let current = ctx
            .run(self.store.get(ctx, &window_key(key, position.index)))
            .await?;
        let previous = match position.index.checked_sub(1) {
            Some(index) => ctx.run(self.store.get(ctx, &window_key(key, index))).await?,
            None => 0,
        };
        Ok((current, previous))
    }
}

#[async_trait]
impl RateLimiter for SlidingWindow {
    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }

    async fn allow(&self, ctx: &Context, key: &str) -> Result<bool> {
        let _guard = acquire(ctx, &self.lock).await?;
        let limits = Limits::load(ctx, self.params.as_ref()).await?;

        let position = WindowPosition::now(limits.interval);
        let (current, previous) = self.counts(ctx, key, &position).await?;
        let estimated = weighted_count(current + 1, previous, position.elapsed_fraction());

        trace!(
            key = %key,
            current,
            previous,
            estimated,
            limit = limits.ceiling(),
            "Sliding window check"
        );

        if estimated > limits.ceiling() as f64 {
            debug!(key = %key, estimated, limit = limits.ceiling(), "Sliding window limit exceeded");
            return Ok(false);
        }

        let current_key = window_key(key, position.index);
        let count = ctx.run(self.store.increment(ctx, &current_key)).await?;
        if count == 1 {
            // Keep the count readable as "previous" for one more window.
            let ttl = position.remaining() + position.interval;
            ctx.run(self.store.set_ttl(ctx, &current_key, ttl)).await?;
        }
        Ok(true)
    }

    /// `current` is the weighted estimate, rounded down.
    async fn quota(&self, ctx: &Context, key: &str) -> Result<Quota> {
        let limits = Limits::load(ctx, self.params.as_ref()).await?;
        let position = WindowPosition::now(limits.interval);
        let (current, previous) = self.counts(ctx, key, &position).await?;
        let estimated = weighted_count(current, previous, position.elapsed_fraction());

        Ok(Quota {
            current: estimated.floor() as u64,
            max_requests: limits.max_requests,
            burst_limit: limits.burst_limit,
        })
    }

    /// Zero while another request would be admitted, otherwise the time until
    /// the current window rolls over.
    async fn next_allowed(&self, ctx: &Context, key: &str) -> Result<Duration> {
        let limits = Limits::load(ctx, self.params.as_ref()).await?;
        let position = WindowPosition::now(limits.interval);
        let (current, previous) = self.counts(ctx, key, &position).await?;

        let estimated = weighted_count(current + 1, previous, position.elapsed_fraction());
        if estimated <= limits.ceiling() as f64 {
            return Ok(Duration::ZERO);
        }

        let ttl = ctx
            .run(self.store.ttl(ctx, &window_key(key, position.index)))
            .await?;
        if ttl > position.interval {
            return Ok(ttl - position.interval);
        }
        Ok(position.remaining())
    }
}
