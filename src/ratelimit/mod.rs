//! Rate limiting algorithms.

mod algorithm;
mod fixed_window;
mod leaky_bucket;
mod limiter;
mod sliding_window;
mod token_bucket;

use std::sync::Arc;

pub use algorithm::Algorithm;
pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
pub use limiter::{Quota, RateLimiter};
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use crate::error::Result;
use crate::params::ParameterSource;
use crate::store::CounterStore;

/// Build a limiter for `algorithm` over the given collaborators.
///
/// Token buckets start their refill task here, so this must run inside a
/// Tokio runtime.
pub async fn build(
    algorithm: Algorithm,
    store: Arc<dyn CounterStore>,
    params: Arc<dyn ParameterSource>,
) -> Result<Arc<dyn RateLimiter>> {
    let limiter: Arc<dyn RateLimiter> = match algorithm {
        Algorithm::FixedWindow => Arc::new(FixedWindow::new(store, params)),
        Algorithm::SlidingWindow => Arc::new(SlidingWindow::new(store, params)),
        Algorithm::LeakyBucket => Arc::new(LeakyBucket::new(store, params)),
        Algorithm::TokenBucket => Arc::new(TokenBucket::start(store, params).await?),
    };
    Ok(limiter)
}
