//! Shared fixtures for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::params::StaticParameters;
use crate::store::{CounterStore, MemoryStore};

/// A memory store whose `increment` can be made to fail.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_increment: AtomicBool,
}

impl FaultyStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.fail_increment.store(true, Ordering::SeqCst);
        store
    }
}

#[async_trait]
impl CounterStore for FaultyStore {
    async fn increment(&self, ctx: &Context, key: &str) -> Result<u64> {
        if self.fail_increment.load(Ordering::SeqCst) {
            return Err(Error::Store("injected increment failure".to_string()));
        }
        self.inner.increment(ctx, key).await
    }

    async fn reset(&self, ctx: &Context, key: &str) -> Result<()> {
        self.inner.reset(ctx, key).await
    }

    async fn get(&self, ctx: &Context, key: &str) -> Result<u64> {
        self.inner.get(ctx, key).await
    }

    async fn set_ttl(&self, ctx: &Context, key: &str, ttl: Duration) -> Result<()> {
        self.inner.set_ttl(ctx, key, ttl).await
    }

    async fn ttl(&self, ctx: &Context, key: &str) -> Result<Duration> {
        self.inner.ttl(ctx, key).await
    }
}

pub fn params(max_requests: u64, interval: Duration, burst_limit: u64) -> Arc<StaticParameters> {
    Arc::new(StaticParameters::new(
        max_requests,
        interval,
        burst_limit,
        0,
        Utc::now(),
    ))
}
