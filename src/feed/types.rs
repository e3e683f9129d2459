use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title used when an item has no usable title.
pub const DEFAULT_TITLE: &str = "Untitled";
/// Author used when an item names no author.
pub const DEFAULT_AUTHOR: &str = "Unknown Author";
/// Excerpt used when an item has no readable body.
pub const NO_EXCERPT: &str = "No excerpt available";
/// Number of categories shown as tags in post listings.
pub const DISPLAY_TAGS: usize = 3;

// ============================================================================
// Canonical Post
// ============================================================================

/// A normalized blog post, independent of the feed or proxy it came from.
///
/// Every field is always populated (defaults are applied during
/// normalization); only `thumbnail_url` and `bundled_image` are optional.
/// Text fields never contain markup. `content` is the one exception: it
/// carries the raw body so a renderer can decide how to present it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalPost {
    /// Unique within one feed: guid, else link, else a synthetic id
    pub id: String,
    pub title: String,
    pub excerpt: String,
    /// Raw description/content body as published
    pub content: String,
    /// An `http`/`https` URL, or empty
    pub link: String,
    /// Publish date in RFC 3339 when it parses, else the sanitized feed text;
    /// the fetch time when the feed has none
    pub published_at: String,
    pub author: String,
    /// Category tags in document order, not deduplicated
    pub categories: Vec<String>,
    /// Image found in the item; always an `http`/`https` URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// File name of an image asset shipped with the site, not a URL. Set on
    /// the fallback posts, and on live posts that have no thumbnail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundled_image: Option<String>,
}

impl CanonicalPost {
    /// Parses `published_at`, accepting RFC 2822 (RSS `pubDate`) and RFC 3339.
    pub fn published_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_feed_date(&self.published_at)
    }

    /// The first few categories, for listings.
    pub fn tags(&self) -> &[String] {
        &self.categories[..self.categories.len().min(DISPLAY_TAGS)]
    }

    /// Estimated reading time at roughly 1000 characters of body per minute.
    pub fn read_time_minutes(&self) -> usize {
        self.content.len().div_ceil(1000).max(1)
    }
}

/// Parses the date formats found in RSS feeds and converter output.
///
/// rss2json emits `2025-07-05 10:00:00` (no zone, UTC), which is accepted as
/// well.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

// ============================================================================
// Fetch Results
// ============================================================================

/// Outcome tag of one feed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Error,
}

/// Result of fetching one feed URL.
///
/// Lives only in memory: held by the cache controller or returned from the
/// aggregator, never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedFetchResult {
    pub feed_url: String,
    pub status: FetchStatus,
    pub posts: Vec<CanonicalPost>,
    pub fetched_at: DateTime<Utc>,
    /// Id of the strategy that produced the posts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FeedFetchResult {
    pub fn success(
        feed_url: impl Into<String>,
        strategy: impl Into<String>,
        posts: Vec<CanonicalPost>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            feed_url: feed_url.into(),
            status: FetchStatus::Success,
            posts,
            fetched_at,
            strategy: Some(strategy.into()),
            error: None,
        }
    }

    pub fn failure(
        feed_url: impl Into<String>,
        error: impl ToString,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            feed_url: feed_url.into(),
            status: FetchStatus::Error,
            posts: Vec::new(),
            fetched_at,
            strategy: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }
}
