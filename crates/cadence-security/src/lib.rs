//! Admission control for the Cadence control plane.
//!
//! Bounds request volume per `(scope, client, session)` with a fixed-window
//! counter. The counting itself happens in a pluggable store so several gateway
//! instances can share one set of buckets.
//!
//! # Main types
//!
//! - [`RateLimiter`]: Policy lookup plus enforce/check over a counter store.
//! - [`RateLimitPolicy`]: Limit and window length for one scope.
//! - [`RateLimitDecision`]: Outcome of counting one request.
//! - [`RateLimitCounterStore`]: Atomic increment-or-reset backend trait.
//! - [`InMemoryCounterStore`] / [`SqliteCounterStore`]: Store implementations.

/// Counter store trait and implementations.
pub mod counter_store;
/// Fixed-window rate limiting.
pub mod rate_limit;

pub use counter_store::{
    BucketState, InMemoryCounterStore, RateLimitCounterStore, SqliteCounterStore,
    SWEEP_INTERVAL_SECONDS,
};
pub use rate_limit::{
    bucket_key, default_policies, RateLimitDecision, RateLimitPolicy, RateLimiter, DEFAULT_SCOPE,
};
