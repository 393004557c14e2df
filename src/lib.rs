//! Ratewarden - Admission Control Primitives
//!
//! This crate decides, per request key, whether a request may proceed. It
//! provides four interchangeable algorithms (fixed window, sliding window,
//! leaky bucket, token bucket) written against two capability traits: a
//! [`store::CounterStore`] holding per-key counters with TTLs, and a
//! [`params::ParameterSource`] supplying the limits.

pub mod config;
pub mod context;
pub mod error;
pub mod params;
pub mod ratelimit;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use context::Context;
pub use error::{Error, Result};
pub use ratelimit::{Algorithm, Quota, RateLimiter};
