//! Leaky bucket rate limiting.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use super::algorithm::Algorithm;
use super::limiter::{acquire, counter_quota, ttl_wait, Limits, Quota, RateLimiter};
use crate::context::Context;
use crate::error::Result;
use crate::params::ParameterSource;
use crate::store::CounterStore;

/// Models a queue draining at a constant rate.
///
/// Each admitted request adds a unit to the key's bucket and schedules a
/// leak that empties the bucket one interval later. The store TTL set on the
/// first unit is the durable fallback when a leak never fires.
pub struct LeakyBucket {
    store: Arc<dyn CounterStore>,
    params: Arc<dyn ParameterSource>,
    /// Shared with pending leaks, which take it before resetting a key
    lock: Arc<Mutex<()>>,
    leaks: TaskTracker,
    shutdown: CancellationToken,
}

impl LeakyBucket {
    /// Create a new leaky bucket limiter.
    pub fn new(store: Arc<dyn CounterStore>, params: Arc<dyn ParameterSource>) -> Self {
        Self {
            store,
            params,
            lock: Arc::new(Mutex::new(())),
            leaks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Number of leaks scheduled but not yet fired.
    pub fn pending_leaks(&self) -> usize {
        self.leaks.len()
    }

    /// Reset `key` once `interval` has passed, unless stopped first.
    fn schedule_leak(&self, key: &str, interval: Duration) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let store = self.store.clone();
        let lock = self.lock.clone();
        let shutdown = self.shutdown.clone();
        let key = key.to_string();

        self.leaks.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    trace!(key = %key, "Leak abandoned on shutdown");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let _guard = lock.lock().await;
            // The caller's context may be long gone by now.
            match store.reset(&Context::background(), &key).await {
                Ok(()) => debug!(key = %key, "Bucket leaked"),
                Err(e) => warn!(key = %key, error = %e, "Failed to leak bucket"),
            }
        });
    }
}

#[async_trait]
impl RateLimiter for LeakyBucket {
    fn algorithm(&self) -> Algorithm {
        Algorithm::LeakyBucket
    }

    async fn allow(&self, ctx: &Context, key: &str) -> Result<bool> {
        let _guard = acquire(ctx, &self.lock).await?;
        let limits = Limits::load(ctx, self.params.as_ref()).await?;

        let count = ctx.run(self.store.increment(ctx, key)).await?;
        if count == 1 {
            ctx.run(self.store.set_ttl(ctx, key, limits.interval)).await?;
        }

        trace!(key = %key, count, limit = limits.ceiling(), "Leaky bucket check");

        if count > limits.ceiling() {
            debug!(key = %key, count, limit = limits.ceiling(), "Leaky bucket overflowed");
            return Ok(false);
        }

        self.schedule_leak(key, limits.interval);
        Ok(true)
    }

    async fn quota(&self, ctx: &Context, key: &str) -> Result<Quota> {
        counter_quota(ctx, self.store.as_ref(), self.params.as_ref(), key).await
    }

    async fn next_allowed(&self, ctx: &Context, key: &str) -> Result<Duration> {
        ttl_wait(ctx, self.store.as_ref(), key).await
    }

    /// Abandon pending leaks and wait for any in flight to finish.
    async fn stop(&self) {
        self.shutdown.cancel();
        self.leaks.close();
        self.leaks.wait().await;
        debug!("Leaky bucket stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::MemoryStore;
    use crate::testing::{params, FaultyStore};
    use tokio_test::assert_err;

    const INTERVAL: Duration = Duration::from_secs(10);

    fn limiter(max: u64, burst: u64) -> (Arc<MemoryStore>, LeakyBucket) {
        let store = Arc::new(MemoryStore::new());
        let limiter = LeakyBucket::new(store.clone(), params(max, INTERVAL, burst));
        (store, limiter)
    }

    #[tokio::test]
    async fn test_admits_up_to_max_plus_burst() {
        let (_, limiter) = limiter(5, 2);
        let ctx = Context::background();

        for i in 1..=7 {
            assert!(limiter.allow(&ctx, "test").await.unwrap(), "Request {} should be admitted", i);
        }
        assert!(!limiter.allow(&ctx, "test").await.unwrap());
        assert_eq!(limiter.pending_leaks(), 7);

        limiter.stop().await;
    }

    #[tokio::test]
    async fn test_first_admission_sets_ttl() {
        let (store, limiter) = limiter(5, 2);
        let ctx = Context::background();

        assert!(limiter.allow(&ctx, "test").await.unwrap());

        let ttl = store.ttl(&ctx, "test").await.unwrap();
        assert!(ttl > Duration::ZERO && ttl <= INTERVAL);

        let wait = limiter.next_allowed(&ctx, "test").await.unwrap();
        assert!(wait > Duration::ZERO && wait <= INTERVAL);

        limiter.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leak_drains_ahead_of_ttl() {
        let (store, limiter) = limiter(5, 0);
        let ctx = Context::background();

        // t=0: opens the bucket, TTL expires at t=10.
        assert!(limiter.allow(&ctx, "test").await.unwrap());
        tokio::time::sleep(Duration::from_secs(6)).await;
        // t=6: leak scheduled for t=16.
        assert!(limiter.allow(&ctx, "test").await.unwrap());
        tokio::time::sleep(Duration::from_secs(5)).await;
        // t=11: TTL expired, this reopens the bucket with TTL until t=21.
        assert!(limiter.allow(&ctx, "test").await.unwrap());
        assert_eq!(store.get(&ctx, "test").await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        // t=17: the leak from t=6 has emptied the bucket before its TTL.
        assert_eq!(store.get(&ctx, "test").await.unwrap(), 0);

        limiter.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_pending_leaks() {
        let (store, limiter) = limiter(5, 0);
        let ctx = Context::background();

        assert!(limiter.allow(&ctx, "test").await.unwrap());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(limiter.allow(&ctx, "test").await.unwrap());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(limiter.allow(&ctx, "test").await.unwrap());

        limiter.stop().await;
        limiter.stop().await;
        assert_eq!(limiter.pending_leaks(), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.get(&ctx, "test").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_denied_request_schedules_no_leak() {
        let (_, limiter) = limiter(1, 0);
        let ctx = Context::background();

        assert!(limiter.allow(&ctx, "test").await.unwrap());
        assert!(!limiter.allow(&ctx, "test").await.unwrap());
        assert_eq!(limiter.pending_leaks(), 1);

        limiter.stop().await;
    }

    #[tokio::test]
    async fn test_quota_reports_bucket_level() {
        let (_, limiter) = limiter(5, 2);
        let ctx = Context::background();

        for _ in 0..3 {
            limiter.allow(&ctx, "test").await.unwrap();
        }
        let quota = limiter.quota(&ctx, "test").await.unwrap();
        assert_eq!(quota.current, 3);
        assert_eq!(quota.remaining(), 4);
        assert_eq!(limiter.quota(&ctx, "test").await.unwrap(), quota);

        limiter.stop().await;
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_closed() {
        let (store, limiter) = limiter(5, 2);
        let ctx = Context::background();
        ctx.cancel();

        let err = assert_err!(limiter.allow(&ctx, "test").await);
        assert!(matches!(err, Error::Cancelled));
        assert!(!limiter.admit(&ctx, "test").await);
        assert!(store.is_empty());
        assert_eq!(limiter.pending_leaks(), 0);

        limiter.stop().await;
    }

    #[tokio::test]
    async fn test_increment_failure_propagates() {
        let store = Arc::new(FaultyStore::failing());
        let limiter = LeakyBucket::new(store, params(5, INTERVAL, 2));
        let ctx = Context::background();

        let err = assert_err!(limiter.allow(&ctx, "test").await);
        assert!(matches!(err, Error::Store(_)));
        assert!(!limiter.admit(&ctx, "test").await);
        assert_eq!(limiter.pending_leaks(), 0);
    }
}
