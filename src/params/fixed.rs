//! Parameter source with limits fixed at construction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

use super::ParameterSource;
use crate::config::LimiterSettings;
use crate::context::Context;
use crate::error::Result;

/// Mutable token state.
#[derive(Debug)]
struct TokenState {
    tokens: u64,
    last_refill: DateTime<Utc>,
}

/// A parameter source whose limits never change.
///
/// Only the token balance and last-refill timestamp are mutable.
#[derive(Debug)]
pub struct StaticParameters {
    max_requests: u64,
    interval: Duration,
    burst_limit: u64,
    state: Mutex<TokenState>,
}

impl StaticParameters {
    /// Create a new static parameter source.
    ///
    /// The initial token balance is clamped to `max_requests`.
    pub fn new(
        max_requests: u64,
        interval: Duration,
        burst_limit: u64,
        tokens: u64,
        last_refill: DateTime<Utc>,
    ) -> Self {
        Self {
            max_requests,
            interval,
            burst_limit,
            state: Mutex::new(TokenState {
                tokens: tokens.min(max_requests),
                last_refill,
            }),
        }
    }

    /// Build from loaded settings, with the refill clock starting now.
    pub fn from_settings(settings: &LimiterSettings) -> Self {
        Self::new(
            settings.max_requests,
            settings.interval(),
            settings.burst_limit,
            settings.initial_tokens,
            Utc::now(),
        )
    }
}

#[async_trait]
impl ParameterSource for StaticParameters {
    async fn max_requests(&self, _ctx: &Context) -> Result<u64> {
        Ok(self.max_requests)
    }

    async fn interval(&self, _ctx: &Context) -> Result<Duration> {
        Ok(self.interval)
    }

    async fn burst_limit(&self, _ctx: &Context) -> Result<u64> {
        Ok(self.burst_limit)
    }

    async fn tokens(&self, _ctx: &Context) -> Result<u64> {
        Ok(self.state.lock().tokens)
    }

    async fn set_tokens(&self, _ctx: &Context, tokens: u64) -> Result<()> {
        self.state.lock().tokens = tokens.min(self.max_requests);
        Ok(())
    }

    async fn last_refill(&self, _ctx: &Context) -> Result<DateTime<Utc>> {
        Ok(self.state.lock().last_refill)
    }

    async fn set_last_refill(&self, _ctx: &Context, at: DateTime<Utc>) -> Result<()> {
        self.state.lock().last_refill = at;
        Ok(())
    }
}
