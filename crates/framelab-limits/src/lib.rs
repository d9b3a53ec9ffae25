//! Tiered per-user rate limiting for framelab.
//!
//! Quotas are keyed by subscription tier and endpoint category and
//! enforced by one of three interchangeable algorithms (sliding window,
//! fixed window, token bucket). The algorithms live in [`algo`] as pure
//! synchronous state transitions; [`MemoryCounterStore`] runs them in
//! process and [`RedisCounterStore`] runs equivalent Lua scripts so the
//! transition stays atomic across API instances.

pub mod algo;
pub mod config;
pub mod limiter;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use algo::AlgoOutcome;
pub use config::{FailurePolicy, LimitsTable, QuotaSpec, RateLimiterConfig};
pub use limiter::RateLimiter;
pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use store::{CounterKey, CounterStore};
