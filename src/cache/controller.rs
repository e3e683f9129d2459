use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use super::rate_limit::RefreshLimiter;
use crate::fallback::{assign_default_images, static_fallback_posts};
use crate::feed::{CanonicalPost, FeedError, FeedFetchResult, FeedSource};

/// Default freshness window (10 minutes).
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(600);
/// Default manual refreshes allowed per window, per feed.
pub const DEFAULT_REFRESH_LIMIT: usize = 5;
/// Default manual refresh window.
pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_secs(60);
/// Default number of feeds kept in memory.
pub const DEFAULT_MAX_CACHED_FEEDS: usize = 32;
/// Default extra attempts after a failed fetch.
pub const DEFAULT_FETCH_RETRIES: u32 = 2;
/// Delay before the first retry; doubles on each further one.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

// ============================================================================
// Public Types
// ============================================================================

/// Cache tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Age after which live posts are stale
    pub stale_after: Duration,
    pub refresh_limit: usize,
    pub refresh_window: Duration,
    /// Revalidate stale entries in the background instead of blocking the caller
    pub background_revalidate: bool,
    pub max_cached_feeds: usize,
    /// Extra attempts when a fetch fails, with exponential backoff between
    pub fetch_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            refresh_limit: DEFAULT_REFRESH_LIMIT,
            refresh_window: DEFAULT_REFRESH_WINDOW,
            background_revalidate: true,
            max_cached_feeds: DEFAULT_MAX_CACHED_FEEDS,
            fetch_retries: DEFAULT_FETCH_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
        }
    }
}

impl CacheSettings {
    /// Backoff before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped at `retry_max_delay`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.retry_max_delay)
    }
}

/// Lifecycle of one cached feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    /// Never requested
    Idle,
    /// First fetch in progress, nothing live to show yet
    Fetching,
    /// Live posts within the freshness window
    Fresh,
    /// Live posts older than the freshness window (or invalidated)
    Stale,
    /// Every source failed and there are no live posts
    Failed,
}

/// What a consumer sees for one feed at one moment.
///
/// `posts` is never empty once a fetch has completed: it holds either live
/// posts or the static fallback set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub feed_url: String,
    pub posts: Vec<CanonicalPost>,
    pub state: FeedState,
    /// A fetch is running and there is nothing live to show
    pub is_loading: bool,
    /// A fetch is running
    pub is_refreshing: bool,
    /// The latest completed fetch failed
    pub is_error: bool,
    /// `posts` came from the feed rather than the fallback set
    pub using_live_feed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the live posts were fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Why a manual refresh did not produce fresh posts.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    /// Too many manual refreshes for this feed
    #[error("Refresh limit reached, try again in {}s", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },
    /// The fetch ran and failed; cached or fallback posts are still served
    #[error("{0}")]
    Unavailable(Arc<FeedError>),
}

// ============================================================================
// Entries
// ============================================================================

type SharedFetch = Shared<BoxFuture<'static, Result<(), Arc<FeedError>>>>;

struct InFlight {
    generation: u64,
    task: SharedFetch,
}

struct LivePosts {
    posts: Vec<CanonicalPost>,
    fetched_at: DateTime<Utc>,
    stored_at: Instant,
}

#[derive(Default)]
struct FeedEntry {
    live: Option<LivePosts>,
    error: Option<Arc<FeedError>>,
    failed_at: Option<Instant>,
    in_flight: Option<InFlight>,
    /// Generation handed to the most recently started fetch
    next_generation: u64,
    /// Generation of the most recently applied result
    applied_generation: u64,
    invalidated: bool,
}

impl FeedEntry {
    /// Live posts or a recorded failure (which serves the fallback set).
    fn has_posts_to_show(&self) -> bool {
        self.live.is_some() || self.error.is_some()
    }

    fn is_stale(&self, now: Instant, stale_after: Duration) -> bool {
        self.invalidated
            || self
                .live
                .as_ref()
                .is_some_and(|live| now.duration_since(live.stored_at) >= stale_after)
    }

    fn state(&self, now: Instant, stale_after: Duration) -> FeedState {
        match (&self.live, &self.in_flight, &self.error) {
            (Some(_), _, _) if self.is_stale(now, stale_after) => FeedState::Stale,
            (Some(_), _, _) => FeedState::Fresh,
            (None, Some(_), _) => FeedState::Fetching,
            (None, None, Some(_)) => FeedState::Failed,
            (None, None, None) => FeedState::Idle,
        }
    }
}

struct CacheInner {
    source: Arc<dyn FeedSource>,
    settings: CacheSettings,
    entries: Mutex<LruCache<String, FeedEntry>>,
    limiter: Mutex<RefreshLimiter>,
    fallback: Vec<CanonicalPost>,
}

impl CacheInner {
    fn lock_entries(&self) -> MutexGuard<'_, LruCache<String, FeedEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetches `feed_url`, retrying failures with exponential backoff.
    async fn fetch_with_retries(&self, feed_url: &str) -> Result<FeedFetchResult, FeedError> {
        let mut attempt = 0;
        loop {
            match self.source.fetch_feed(feed_url).await {
                Err(e) if e.is_retryable() && attempt < self.settings.fetch_retries => {
                    let delay = self.settings.retry_delay(attempt);
                    tracing::info!(
                        feed_url = %feed_url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Feed fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    /// Stores a finished fetch, unless a later-started fetch already landed.
    ///
    /// A superseded result is still stored (marked stale) when the entry has
    /// nothing else to show and no other fetch is running, so a completed
    /// fetch never leaves the feed empty.
    fn apply(
        &self,
        feed_url: &str,
        generation: u64,
        outcome: Result<FeedFetchResult, FeedError>,
    ) -> Result<(), Arc<FeedError>> {
        let outcome = outcome.map_err(Arc::new);
        let mut entries = self.lock_entries();

        let Some(entry) = entries.peek_mut(feed_url) else {
            tracing::debug!(feed_url = %feed_url, "Feed evicted before fetch completed");
            return outcome.map(|_| ());
        };

        if entry
            .in_flight
            .as_ref()
            .is_some_and(|flight| flight.generation == generation)
        {
            entry.in_flight = None;
        }

        let superseded = generation <= entry.applied_generation;
        if superseded && (entry.has_posts_to_show() || entry.in_flight.is_some()) {
            tracing::debug!(
                feed_url = %feed_url,
                generation = generation,
                applied = entry.applied_generation,
                "Discarding superseded fetch result"
            );
            return outcome.map(|_| ());
        }
        entry.applied_generation = entry.applied_generation.max(generation);

        match outcome {
            Ok(result) if !result.posts.is_empty() => {
                entry.live = Some(LivePosts {
                    posts: result.posts,
                    fetched_at: result.fetched_at,
                    stored_at: Instant::now(),
                });
                entry.error = None;
                entry.failed_at = None;
                entry.invalidated = superseded;
                Ok(())
            }
            // FeedSource promises non-empty posts; treat a broken promise as a failure
            Ok(_) => self.record_failure(feed_url, entry, Arc::new(FeedError::EmptyFeed)),
            Err(e) => self.record_failure(feed_url, entry, e),
        }
    }

    fn record_failure(
        &self,
        feed_url: &str,
        entry: &mut FeedEntry,
        error: Arc<FeedError>,
    ) -> Result<(), Arc<FeedError>> {
        if entry.live.is_some() {
            tracing::warn!(feed_url = %feed_url, error = %error, "Feed refresh failed, keeping cached posts");
        } else {
            tracing::warn!(feed_url = %feed_url, error = %error, "Feed unavailable, serving fallback posts");
        }
        entry.error = Some(Arc::clone(&error));
        entry.failed_at = Some(Instant::now());
        Err(error)
    }

    fn snapshot_of(&self, feed_url: &str, entry: Option<&FeedEntry>, limit: Option<usize>) -> FeedSnapshot {
        let now = Instant::now();
        let Some(entry) = entry else {
            return FeedSnapshot {
                feed_url: feed_url.to_string(),
                posts: Vec::new(),
                state: FeedState::Idle,
                is_loading: false,
                is_refreshing: false,
                is_error: false,
                using_live_feed: false,
                error: None,
                fetched_at: None,
            };
        };

        let posts: &[CanonicalPost] = match (&entry.live, &entry.error) {
            (Some(live), _) => &live.posts,
            (None, Some(_)) => &self.fallback,
            (None, None) => &[],
        };
        let limit = limit.unwrap_or(usize::MAX);

        FeedSnapshot {
            feed_url: feed_url.to_string(),
            posts: posts.iter().take(limit).cloned().collect(),
            state: entry.state(now, self.settings.stale_after),
            is_loading: entry.in_flight.is_some() && entry.live.is_none(),
            is_refreshing: entry.in_flight.is_some(),
            is_error: entry.error.is_some(),
            using_live_feed: entry.live.is_some(),
            error: entry.error.as_ref().map(|e| e.to_string()),
            fetched_at: entry.live.as_ref().map(|live| live.fetched_at),
        }
    }
}

// ============================================================================
// Feed Cache
// ============================================================================

/// Stale-while-revalidate cache of feed posts, keyed by feed URL.
///
/// Cheap to clone; clones share one cache. Concurrent requests for a feed
/// share a single in-flight fetch. Results are applied in request-start
/// order: a fetch that started earlier never overwrites one that started
/// later, whichever finishes first.
///
/// Fetches run on spawned tokio tasks so they complete even when every
/// caller waiting on them goes away. All methods that may start a fetch must
/// therefore run inside a tokio runtime.
#[derive(Clone)]
pub struct FeedCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for FeedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedCache")
            .field("settings", &self.inner.settings)
            .field("feeds", &self.len())
            .finish_non_exhaustive()
    }
}

impl FeedCache {
    pub fn new(source: Arc<dyn FeedSource>, settings: CacheSettings) -> Self {
        Self::with_fallback(source, settings, static_fallback_posts())
    }

    /// Builds a cache that serves `fallback` when a feed has no live posts.
    pub fn with_fallback(
        source: Arc<dyn FeedSource>,
        settings: CacheSettings,
        fallback: Vec<CanonicalPost>,
    ) -> Self {
        let capacity = NonZeroUsize::new(settings.max_cached_feeds).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(CacheInner {
                source,
                settings,
                entries: Mutex::new(LruCache::new(capacity)),
                limiter: Mutex::new(RefreshLimiter::new(
                    settings.refresh_limit,
                    settings.refresh_window,
                )),
                fallback,
            }),
        }
    }

    pub fn settings(&self) -> CacheSettings {
        self.inner.settings
    }

    /// Number of feeds currently cached.
    pub fn len(&self) -> usize {
        self.inner.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns posts for `feed_url`, fetching when needed.
    ///
    /// - Nothing cached: fetches and waits (shares an in-flight fetch if one
    ///   is running).
    /// - Fresh: returned as is.
    /// - Stale: returned at once while a background revalidation runs, or
    ///   refetched in the foreground when background revalidation is off.
    /// - Failed: fallback posts; retried once the failure is older than the
    ///   freshness window.
    ///
    /// `limit` truncates the returned posts.
    pub async fn posts(&self, feed_url: &str, limit: Option<usize>) -> FeedSnapshot {
        let settings = self.inner.settings;
        let mut wait = {
            let mut entries = self.inner.lock_entries();
            let entry = entries.get_or_insert_mut(feed_url.to_string(), FeedEntry::default);
            let now = Instant::now();

            if let Some(flight) = &entry.in_flight {
                // Someone already fetching: only wait when there is nothing to show
                (!entry.has_posts_to_show()).then(|| flight.task.clone())
            } else if entry.live.is_some() {
                if entry.is_stale(now, settings.stale_after) {
                    tracing::debug!(feed_url = %feed_url, "Cached posts are stale, revalidating");
                    let task = self.start_fetch(feed_url, entry);
                    (!settings.background_revalidate).then_some(task)
                } else {
                    tracing::trace!(feed_url = %feed_url, "Feed cache hit");
                    None
                }
            } else if let Some(failed_at) = entry.failed_at {
                if now.duration_since(failed_at) >= settings.stale_after {
                    tracing::debug!(feed_url = %feed_url, "Retrying failed feed");
                    let task = self.start_fetch(feed_url, entry);
                    (!settings.background_revalidate).then_some(task)
                } else {
                    None
                }
            } else {
                Some(self.start_fetch(feed_url, entry))
            }
        };

        while let Some(task) = wait {
            // Failures are recorded on the entry and show up in the snapshot
            let _ = task.await;
            // The awaited fetch may have been superseded by one still running
            wait = self.pending_fetch(feed_url);
        }
        self.snapshot(feed_url, limit)
    }

    /// The in-flight fetch of an entry that has nothing to show yet.
    fn pending_fetch(&self, feed_url: &str) -> Option<SharedFetch> {
        let entries = self.inner.lock_entries();
        let entry = entries.peek(feed_url)?;
        if entry.has_posts_to_show() {
            return None;
        }
        entry.in_flight.as_ref().map(|flight| flight.task.clone())
    }

    /// Current state of `feed_url` without triggering any fetch.
    pub fn snapshot(&self, feed_url: &str, limit: Option<usize>) -> FeedSnapshot {
        let entries = self.inner.lock_entries();
        self.inner.snapshot_of(feed_url, entries.peek(feed_url), limit)
    }

    /// Manual refresh: fetches now, joining a fetch that is already running.
    ///
    /// # Errors
    ///
    /// - [`RefreshError::RateLimited`] when the per-feed refresh budget is
    ///   spent; nothing is fetched
    /// - [`RefreshError::Unavailable`] when the fetch failed; the entry keeps
    ///   serving its previous posts (or the fallback set)
    pub async fn refresh(&self, feed_url: &str) -> Result<FeedSnapshot, RefreshError> {
        self.manual_refresh(feed_url, false).await
    }

    /// Manual refresh that always starts a new fetch.
    ///
    /// A fetch already in flight keeps running, but its result is discarded if
    /// it finishes after this one.
    ///
    /// # Errors
    ///
    /// Same as [`FeedCache::refresh`].
    pub async fn force_refresh(&self, feed_url: &str) -> Result<FeedSnapshot, RefreshError> {
        self.manual_refresh(feed_url, true).await
    }

    /// Marks `feed_url` stale and detaches its in-flight fetch.
    ///
    /// Cached posts keep being served until the next fetch lands. A detached
    /// fetch of a feed with nothing cached is still stored when it lands,
    /// marked stale. Returns `false` if the feed was not cached.
    pub fn invalidate(&self, feed_url: &str) -> bool {
        let mut entries = self.inner.lock_entries();
        let Some(entry) = entries.peek_mut(feed_url) else {
            return false;
        };
        entry.invalidated = true;
        if entry.in_flight.take().is_some() {
            tracing::debug!(feed_url = %feed_url, "Detached in-flight fetch");
        }
        // Anything started before now is discarded when it lands
        entry.applied_generation = entry.next_generation;
        true
    }

    async fn manual_refresh(
        &self,
        feed_url: &str,
        supersede: bool,
    ) -> Result<FeedSnapshot, RefreshError> {
        {
            let mut limiter = self
                .inner
                .limiter
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Err(retry_after) = limiter.try_acquire(feed_url) {
                tracing::info!(
                    feed_url = %feed_url,
                    retry_after_secs = retry_after.as_secs(),
                    "Manual refresh rate limited"
                );
                return Err(RefreshError::RateLimited { retry_after });
            }
        }

        let task = {
            let mut entries = self.inner.lock_entries();
            let entry = entries.get_or_insert_mut(feed_url.to_string(), FeedEntry::default);
            let joined = if supersede {
                None
            } else {
                entry.in_flight.as_ref().map(|flight| flight.task.clone())
            };
            match joined {
                Some(task) => task,
                None => self.start_fetch(feed_url, entry),
            }
        };

        task.await.map_err(RefreshError::Unavailable)?;
        Ok(self.snapshot(feed_url, None))
    }

    /// Starts a fetch with the next generation and records it as in flight.
    ///
    /// Must be called with the entries lock held; the spawned task only takes
    /// the lock after the fetch finishes.
    fn start_fetch(&self, feed_url: &str, entry: &mut FeedEntry) -> SharedFetch {
        entry.next_generation += 1;
        let generation = entry.next_generation;

        let inner = Arc::clone(&self.inner);
        let key = feed_url.to_string();
        let task = async move {
            let outcome = inner.fetch_with_retries(&key).await.map(|mut result| {
                assign_default_images(&mut result.posts);
                result
            });
            inner.apply(&key, generation, outcome)
        }
        .boxed()
        .shared();

        entry.in_flight = Some(InFlight {
            generation,
            task: task.clone(),
        });
        tokio::spawn(task.clone());

        tracing::debug!(feed_url = %feed_url, generation = generation, "Feed fetch started");
        task
    }
}
