//! In-memory feed cache with stale-while-revalidate semantics.
//!
//! # Architecture
//!
//! - [`controller`] - [`FeedCache`]: per-URL entries in a bounded LRU,
//!   request coalescing, generation-ordered result application, static
//!   fallback on failure
//! - [`rate_limit`] - Sliding-window limiter for manual refreshes
//!
//! Nothing is persisted; a new process starts with an empty cache.

pub mod controller;
pub mod rate_limit;

pub use controller::{CacheSettings, FeedCache, FeedSnapshot, FeedState, RefreshError};
pub use rate_limit::RefreshLimiter;
