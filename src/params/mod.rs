//! Parameter sources: the tunables a limiter reads on every call.

mod fixed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::context::Context;
use crate::error::Result;

pub use fixed::StaticParameters;

/// Trait for limiter configuration sources.
///
/// The window and bucket algorithms only read the limits. The token fields
/// are used by the token bucket alone, which treats the source as the single
/// owner of its balance and never caches it between calls.
#[async_trait]
pub trait ParameterSource: Send + Sync {
    /// Steady-state ceiling per interval.
    async fn max_requests(&self, ctx: &Context) -> Result<u64>;

    /// Window or refill period.
    async fn interval(&self, ctx: &Context) -> Result<Duration>;

    /// Extra admissions tolerated above `max_requests`.
    async fn burst_limit(&self, ctx: &Context) -> Result<u64>;

    /// Current token balance.
    async fn tokens(&self, ctx: &Context) -> Result<u64>;

    /// Replace the token balance.
    async fn set_tokens(&self, ctx: &Context, tokens: u64) -> Result<()>;

    /// When tokens were last credited.
    async fn last_refill(&self, ctx: &Context) -> Result<DateTime<Utc>>;

    /// Record when tokens were last credited.
    async fn set_last_refill(&self, ctx: &Context, at: DateTime<Utc>) -> Result<()>;
}
