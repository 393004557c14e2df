//! Token bucket rate limiting.
//!
//! The steady rate is policed with a token balance that belongs to the whole
//! limiter instance and lives in the parameter source. Once the balance is
//! spent, each key draws on its own burst allowance, tracked as an overflow
//! counter in the counter store. One instance can therefore enforce an
//! interval-wide rate while still attributing burst abuse to individual keys.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::algorithm::Algorithm;
use super::limiter::{acquire, counter_quota, ttl_wait, Quota, RateLimiter};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::params::ParameterSource;
use crate::store::CounterStore;

/// Token bucket limiter with a background refill task.
///
/// The refill task starts with the limiter and runs until [`RateLimiter::stop`]
/// is called or the limiter is dropped.
pub struct TokenBucket {
    store: Arc<dyn CounterStore>,
    params: Arc<dyn ParameterSource>,
    /// Shared with the refill task
    lock: Arc<Mutex<()>>,
    shutdown: CancellationToken,
    /// Cancelled by the refill task as it exits
    finished: CancellationToken,
}

impl TokenBucket {
    /// Create a limiter that polls for refills once per configured interval.
    pub async fn start(store: Arc<dyn CounterStore>, params: Arc<dyn ParameterSource>) -> Result<Self> {
        let interval = params.interval(&Context::background()).await?;
        Self::with_refill_period(store, params, interval)
    }

    /// Create a limiter that polls for refills every `period`.
    ///
    /// Polling more often than the interval only changes how promptly tokens
    /// appear, never how many.
    pub fn with_refill_period(
        store: Arc<dyn CounterStore>,
        params: Arc<dyn ParameterSource>,
        period: Duration,
    ) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::Config("refill period must be greater than zero".to_string()));
        }

        let lock = Arc::new(Mutex::new(()));
        let shutdown = CancellationToken::new();
        let finished = CancellationToken::new();
        spawn_refill(
            params.clone(),
            lock.clone(),
            shutdown.clone(),
            finished.clone(),
            period,
        );

        debug!(period = ?period, "Token refill started");

        Ok(Self {
            store,
            params,
            lock,
            shutdown,
            finished,
        })
    }

    /// Whether the refill task is still running.
    pub fn is_running(&self) -> bool {
        !self.finished.is_cancelled()
    }
}

fn spawn_refill(
    params: Arc<dyn ParameterSource>,
    lock: Arc<Mutex<()>>,
    shutdown: CancellationToken,
    finished: CancellationToken,
    period: Duration,
) {
    tokio::spawn(async move {
        let _done = finished.drop_guard();
        let ctx = Context::background();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let _guard = lock.lock().await;
                    if shutdown.is_cancelled() {
                        break;
                    }
                    if let Err(e) = refill(&ctx, params.as_ref()).await {
                        warn!(error = %e, "Token refill failed");
                    }
                }
            }
        }

        debug!("Token refill stopped");
    });
}

/// Credit the tokens earned since the last refill.
///
/// Only whole intervals are credited, and the last-refill mark advances by
/// exactly the credited intervals, so polling at any cadence converges on the
/// same balance.
pub(crate) async fn refill(ctx: &Context, params: &dyn ParameterSource) -> Result<()> {
    let interval = params.interval(ctx).await?;
    if interval.is_zero() {
        return Ok(());
    }

    let now = Utc::now();
    let last_refill = params.last_refill(ctx).await?;
    let elapsed = (now - last_refill).to_std().unwrap_or(Duration::ZERO);

    let periods = elapsed.as_nanos() / interval.as_nanos();
    if periods == 0 {
        return Ok(());
    }

    let tokens = params.tokens(ctx).await?;
    let max_tokens = params.max_requests(ctx).await?;
    let added = u64::try_from(periods).unwrap_or(u64::MAX);
    let refilled = tokens.saturating_add(added).min(max_tokens);
    params.set_tokens(ctx, refilled).await?;

    let advance = i64::try_from(interval.as_nanos().saturating_mul(periods)).unwrap_or(i64::MAX);
    params
        .set_last_refill(ctx, last_refill + chrono::Duration::nanoseconds(advance))
        .await?;

    trace!(tokens, refilled, periods = added, "Tokens refilled");
    Ok(())
}

#[async_trait]
impl RateLimiter for TokenBucket {
    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }

    async fn allow(&self, ctx: &Context, key: &str) -> Result<bool> {
        let _guard = acquire(ctx, &self.lock).await?;

        let tokens = ctx.run(self.params.tokens(ctx)).await?;
        let burst_limit = ctx.run(self.params.burst_limit(ctx)).await?;

        if tokens > 0 {
            ctx.run(self.params.set_tokens(ctx, tokens - 1)).await?;
            trace!(key = %key, tokens = tokens - 1, "Token consumed");
            return Ok(true);
        }

        let overflow = ctx.run(self.store.increment(ctx, key)).await?;
        if overflow == 1 {
            let interval = ctx.run(self.params.interval(ctx)).await?;
            ctx.run(self.store.set_ttl(ctx, key, interval)).await?;
        }

        trace!(key = %key, overflow, burst_limit, "Token bucket empty, using burst");

        if overflow > burst_limit {
            debug!(key = %key, overflow, burst_limit, "Token bucket burst exceeded");
            return Ok(false);
        }
        Ok(true)
    }

    /// `current` is the key's burst overflow, not the token balance.
    async fn quota(&self, ctx: &Context, key: &str) -> Result<Quota> {
        counter_quota(ctx, self.store.as_ref(), self.params.as_ref(), key).await
    }

    async fn next_allowed(&self, ctx: &Context, key: &str) -> Result<Duration> {
        ttl_wait(ctx, self.store.as_ref(), key).await
    }

    /// Stop the refill task and wait for it to exit.
    ///
    /// Every caller, concurrent or not, returns only once the task is gone.
    async fn stop(&self) {
        self.shutdown.cancel();
        self.finished.cancelled().await;
    }
}

impl Drop for TokenBucket {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
