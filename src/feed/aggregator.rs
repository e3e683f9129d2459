use chrono::{DateTime, Utc};
use futures::future::join_all;

use super::fetcher::{FeedError, FeedSource};
use super::types::{CanonicalPost, FeedFetchResult};

/// Merged output of [`fetch_multiple`].
#[derive(Debug, Clone)]
pub struct AggregatedFeeds {
    /// Posts from every successful feed, newest first
    pub posts: Vec<CanonicalPost>,
    /// One result per input URL, in input order
    pub results: Vec<FeedFetchResult>,
}

impl AggregatedFeeds {
    pub fn failed_feeds(&self) -> impl Iterator<Item = &FeedFetchResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

/// Fetches several feeds concurrently and merges their posts.
///
/// Every fetch is allowed to settle; failed feeds are logged and contribute
/// nothing. Posts are ordered by publish date, newest first. Posts whose date
/// cannot be parsed sort as if published when their feed was fetched. Ties
/// keep feed order, then document order.
///
/// # Errors
///
/// Returns [`FeedError::FeedUnavailable`] only when every feed failed. An
/// empty URL list is not an error.
pub async fn fetch_multiple(
    source: &dyn FeedSource,
    feed_urls: &[String],
) -> Result<AggregatedFeeds, FeedError> {
    if feed_urls.is_empty() {
        return Ok(AggregatedFeeds {
            posts: Vec::new(),
            results: Vec::new(),
        });
    }

    let outcomes = join_all(feed_urls.iter().map(|url| source.fetch_feed(url))).await;

    let mut results = Vec::with_capacity(outcomes.len());
    for (url, outcome) in feed_urls.iter().zip(outcomes) {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                tracing::warn!(feed_url = %url, error = %e, "Feed failed, excluded from merge");
                results.push(FeedFetchResult::failure(url.as_str(), &e, Utc::now()));
            }
        }
    }

    let succeeded = results.iter().filter(|r| r.is_success()).count();
    if succeeded == 0 {
        return Err(FeedError::FeedUnavailable {
            attempts: feed_urls.len(),
        });
    }

    tracing::debug!(
        feeds = feed_urls.len(),
        succeeded = succeeded,
        "Feeds aggregated"
    );

    Ok(AggregatedFeeds {
        posts: merge_by_date(&results),
        results,
    })
}

/// Merges successful results into one list, newest first.
pub fn merge_by_date(results: &[FeedFetchResult]) -> Vec<CanonicalPost> {
    let mut keyed: Vec<(DateTime<Utc>, CanonicalPost)> = results
        .iter()
        .filter(|r| r.is_success())
        .flat_map(|r| {
            r.posts.iter().map(move |post| {
                let date = post.published_timestamp().unwrap_or(r.fetched_at);
                (date, post.clone())
            })
        })
        .collect();

    // sort_by is stable, so equal dates keep input order
    keyed.sort_by(|(a, _), (b, _)| b.cmp(a));
    keyed.into_iter().map(|(_, post)| post).collect()
}
