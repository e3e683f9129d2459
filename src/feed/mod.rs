//! Feed ingestion: fetching, defensive parsing and normalization.
//!
//! This module turns a feed URL into a list of [`CanonicalPost`]s:
//!
//! - **Fetching**: ordered proxy/converter strategies, tried one at a time
//! - **Parsing**: size, unsafe-construct, root and depth checks before any
//!   item is read
//! - **Normalization**: per-field sanitization and defaults for XML and JSON
//!   items alike
//! - **Aggregation**: concurrent fan-out over several feeds, merged by date
//!
//! # Architecture
//!
//! - [`strategy`] - How each proxy/converter is addressed and what it returns
//! - [`xml`] - XML text to element tree, behind the [`XmlTreeParser`] trait
//! - [`parser`] - Defensive checks on top of the tree
//! - [`normalizer`] - `RawItem` to `CanonicalPost`
//! - [`fetcher`] - Strategy loop, HTTP with timeout and byte cap
//! - [`aggregator`] - Multi-feed merge
//!
//! # Example
//!
//! ```no_run
//! use journal_feed::feed::{
//!     build_http_client, build_strategies, default_strategy_configs, FeedFetcher, FeedSource,
//!     FetchSettings,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = FetchSettings::default();
//! let client = build_http_client(settings.timeout)?;
//! let strategies = build_strategies(&default_strategy_configs(), None)?;
//! let fetcher = FeedFetcher::new(client, strategies, settings);
//!
//! let result = fetcher.fetch_feed("https://journal.ishaansrv.com/feed/").await?;
//! for post in &result.posts {
//!     println!("{} ({})", post.title, post.published_at);
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod fetcher;
pub mod normalizer;
pub mod parser;
pub mod strategy;
pub mod types;
pub mod xml;

pub use aggregator::{fetch_multiple, AggregatedFeeds};
pub use fetcher::{build_http_client, FeedError, FeedFetcher, FeedSource, FetchSettings};
pub use normalizer::{normalize_item, ItemContext, RawItem, TextLimits};
pub use parser::{FeedLimits, FeedParseError, FeedParser, RawFeedDocument};
pub use strategy::{
    build_strategies, default_strategy_configs, FeedSourceStrategy, ResponseShape,
    StrategyConfig, StrategyError, UrlRule,
};
pub use types::{CanonicalPost, FeedFetchResult, FetchStatus};
pub use xml::{QuickXmlTreeParser, XmlTreeParser};
