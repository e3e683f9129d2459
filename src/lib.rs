//! Defensive RSS ingestion for a portfolio blog.
//!
//! A feed URL goes through an ordered list of proxy/converter strategies, a
//! defensive XML parser and a field normalizer, and comes out as a list of
//! [`feed::CanonicalPost`]s. The [`cache::FeedCache`] keeps results per feed
//! with stale-while-revalidate semantics and falls back to a bundled post set
//! when every source fails.

pub mod cache;
pub mod config;
pub mod fallback;
pub mod feed;
pub mod util;
