//! Fixed window rate limiting.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::algorithm::Algorithm;
use super::limiter::{acquire, counter_quota, ttl_wait, Limits, Quota, RateLimiter};
use crate::context::Context;
use crate::error::Result;
use crate::params::ParameterSource;
use crate::store::CounterStore;

/// Admits up to `max_requests + burst_limit` requests per interval.
///
/// The window opens on the first request seen for an idle key and closes
/// when the store expires the key. Bursts straddling a rollover can see up
/// to twice the ceiling in a short span.
pub struct FixedWindow {
    store: Arc<dyn CounterStore>,
    params: Arc<dyn ParameterSource>,
    lock: Mutex<()>,
}

impl FixedWindow {
    /// Create a new fixed window limiter.
    pub fn new(store: Arc<dyn CounterStore>, params: Arc<dyn ParameterSource>) -> Self {
        Self {
            store,
            params,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl RateLimiter for FixedWindow {
    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }

    async fn allow(&self, ctx: &Context, key: &str) -> Result<bool> {
        let _guard = acquire(ctx, &self.lock).await?;
        let limits = Limits::load(ctx, self.params.as_ref()).await?;

        let count = ctx.run(self.store.increment(ctx, key)).await?;
        if count == 1 {
            ctx.run(self.store.set_ttl(ctx, key, limits.interval)).await?;
        }

        trace!(key = %key, count, limit = limits.ceiling(), "Fixed window check");

        if count > limits.ceiling() {
            debug!(key = %key, count, limit = limits.ceiling(), "Fixed window limit exceeded");
            return Ok(false);
        }
        Ok(true)
    }

    async fn quota(&self, ctx: &Context, key: &str) -> Result<Quota> {
        counter_quota(ctx, self.store.as_ref(), self.params.as_ref(), key).await
    }

    async fn next_allowed(&self, ctx: &Context, key: &str) -> Result<Duration> {
        ttl_wait(ctx, self.store.as_ref(), key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::MemoryStore;
    use crate::testing::{params, FaultyStore};
    use tokio_test::assert_err;

    fn limiter(max: u64, interval: Duration, burst: u64) -> (Arc<MemoryStore>, FixedWindow) {
        let store = Arc::new(MemoryStore::new());
        let limiter = FixedWindow::new(store.clone(), params(max, interval, burst));
        (store, limiter)
    }

    #[tokio::test]
    async fn test_admits_up_to_max_plus_burst() {
        let (_, limiter) = limiter(5, Duration::from_secs(60), 2);
        let ctx = Context::background();

        for i in 1..=7 {
            assert!(limiter.allow(&ctx, "key").await.unwrap(), "Request {} should be admitted", i);
        }
        assert!(!limiter.allow(&ctx, "key").await.unwrap());
    }

    #[tokio::test]
    async fn test_first_five_admitted_remaining_denied() {
        let (_, limiter) = limiter(5, Duration::from_secs(60), 0);
        let ctx = Context::background();

        let mut decisions = Vec::new();
        for _ in 0..7 {
            decisions.push(limiter.allow(&ctx, "key").await.unwrap());
        }
        assert_eq!(decisions, vec![true, true, true, true, true, false, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reopens_after_interval() {
        let (_, limiter) = limiter(5, Duration::from_secs(60), 2);
        let ctx = Context::background();

        for _ in 0..7 {
            limiter.allow(&ctx, "key").await.unwrap();
        }
        assert!(!limiter.allow(&ctx, "key").await.unwrap());

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(limiter.allow(&ctx, "key").await.unwrap());
        assert_eq!(limiter.quota(&ctx, "key").await.unwrap().current, 1);
    }

    #[tokio::test]
    async fn test_first_request_sets_ttl() {
        let (_, limiter) = limiter(5, Duration::from_secs(60), 0);
        let ctx = Context::background();

        assert_eq!(limiter.next_allowed(&ctx, "key").await.unwrap(), Duration::ZERO);
        limiter.allow(&ctx, "key").await.unwrap();

        let wait = limiter.next_allowed(&ctx, "key").await.unwrap();
        assert!(wait > Duration::ZERO && wait <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (_, limiter) = limiter(1, Duration::from_secs(60), 0);
        let ctx = Context::background();

        assert!(limiter.allow(&ctx, "a").await.unwrap());
        assert!(!limiter.allow(&ctx, "a").await.unwrap());
        assert!(limiter.allow(&ctx, "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_quota_does_not_mutate() {
        let (_, limiter) = limiter(5, Duration::from_secs(60), 2);
        let ctx = Context::background();

        limiter.allow(&ctx, "key").await.unwrap();
        limiter.allow(&ctx, "key").await.unwrap();

        let first = limiter.quota(&ctx, "key").await.unwrap();
        let second = limiter.quota(&ctx, "key").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first,
            Quota {
                current: 2,
                max_requests: 5,
                burst_limit: 2
            }
        );
    }

    #[tokio::test]
    async fn test_increment_failure_propagates() {
        let store = Arc::new(FaultyStore::failing());
        let limiter = FixedWindow::new(store, params(5, Duration::from_secs(60), 2));
        let ctx = Context::background();

        let err = assert_err!(limiter.allow(&ctx, "key").await);
        assert!(matches!(err, Error::Store(_)));
        assert!(!limiter.admit(&ctx, "key").await);
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_closed() {
        let (store, limiter) = limiter(5, Duration::from_secs(60), 2);
        let ctx = Context::background();
        ctx.cancel();

        let err = assert_err!(limiter.allow(&ctx, "key").await);
        assert!(matches!(err, Error::Cancelled));
        assert!(!limiter.admit(&ctx, "key").await);
        assert_eq!(store.get(&Context::background(), "key").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_respect_ceiling() {
        let (_, limiter) = limiter(10, Duration::from_secs(60), 0);
        let limiter = Arc::new(limiter);

        let tasks: Vec<_> = (0..30)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.allow(&Context::background(), "key").await.unwrap() })
            })
            .collect();

        let admitted = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(admitted, 10);
    }
}
