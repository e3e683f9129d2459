use crate::feed::normalizer::{normalize_items, RawItem, TextLimits};
use crate::feed::parser::{FeedLimits, FeedParseError, FeedParser};
use crate::feed::strategy::{FeedSourceStrategy, ResponseShape};
use crate::feed::types::{CanonicalPost, FeedFetchResult};
use crate::util::{validate_feed_url, UrlValidationError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::redirect::Policy;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default cap on a proxy response body. Larger than the feed ceiling so a
/// JSON-wrapped feed at the ceiling still fits after escaping.
pub const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while fetching a feed.
///
/// Everything except [`FeedError::InvalidFeedUrl`] and
/// [`FeedError::FeedUnavailable`] describes a single failed strategy attempt;
/// the fetcher logs those and moves on to the next strategy.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Feed URL is not an absolute http/https URL with a host
    #[error("Invalid feed URL: {0}")]
    InvalidFeedUrl(#[from] UrlValidationError),
    /// Feed text was rejected by the defensive parser
    #[error(transparent)]
    Parse(#[from] FeedParseError),
    /// Attempt exceeded the configured timeout
    #[error("Request timed out after {}s", .0.as_secs())]
    NetworkTimeout(Duration),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the configured byte cap
    #[error("Response too large (limit {0} bytes)")]
    ResponseTooLarge(usize),
    /// Body was not valid UTF-8
    #[error("Response is not valid UTF-8")]
    InvalidUtf8,
    /// Proxy JSON did not have the expected envelope
    #[error("Unexpected proxy response: {0}")]
    InvalidEnvelope(String),
    /// Converter reported a status other than `ok`
    #[error("Converter returned status '{0}'")]
    ConverterStatus(String),
    /// Feed was fetched and parsed but held no items
    #[error("Feed contains no posts")]
    EmptyFeed,
    /// Every strategy failed
    #[error("Feed unavailable: all {attempts} strategies failed")]
    FeedUnavailable { attempts: usize },
}

impl FeedError {
    /// Whether fetching the same URL again could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidFeedUrl(_))
    }
}

/// Something that can turn a feed URL into normalized posts.
///
/// The cache controller and aggregator depend on this rather than on
/// [`FeedFetcher`] directly, so tests can substitute a scripted source.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetches and normalizes one feed.
    ///
    /// A successful result always carries at least one post.
    async fn fetch_feed(&self, feed_url: &str) -> Result<FeedFetchResult, FeedError>;
}

/// Tunables for [`FeedFetcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub max_response_bytes: usize,
    pub feed_limits: FeedLimits,
    pub text_limits: TextLimits,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_response_bytes: MAX_RESPONSE_BYTES,
            feed_limits: FeedLimits::default(),
            text_limits: TextLimits::default(),
        }
    }
}

/// Fetches feeds through an ordered list of proxy/converter strategies.
///
/// Strategies are tried strictly one after another; the first attempt that
/// yields at least one post wins. No retries within a strategy: the next
/// strategy is the retry.
#[derive(Debug)]
pub struct FeedFetcher {
    client: reqwest::Client,
    strategies: Vec<FeedSourceStrategy>,
    parser: FeedParser,
    settings: FetchSettings,
}

impl FeedFetcher {
    pub fn new(
        client: reqwest::Client,
        strategies: Vec<FeedSourceStrategy>,
        settings: FetchSettings,
    ) -> Self {
        Self {
            client,
            strategies,
            parser: FeedParser::new(settings.feed_limits),
            settings,
        }
    }

    pub fn strategies(&self) -> &[FeedSourceStrategy] {
        &self.strategies
    }

    /// Runs a single strategy against an already-validated feed URL.
    ///
    /// # Errors
    ///
    /// Any per-attempt [`FeedError`]; never `FeedUnavailable`.
    pub async fn fetch_with(
        &self,
        strategy: &FeedSourceStrategy,
        feed_url: &Url,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<CanonicalPost>, FeedError> {
        let request_url = strategy.request_url(feed_url);
        let timeout = self.settings.timeout;

        // The whole download (headers and body) shares one deadline
        let body = tokio::time::timeout(timeout, self.download(request_url))
            .await
            .map_err(|_| FeedError::NetworkTimeout(timeout))??;

        let items = match strategy.shape() {
            ResponseShape::WrappedXml => {
                let envelope: WrappedEnvelope = serde_json::from_slice(&body)
                    .map_err(|e| FeedError::InvalidEnvelope(e.to_string()))?;
                let contents = envelope
                    .contents
                    .filter(|c| !c.trim().is_empty())
                    .ok_or(FeedError::EmptyFeed)?;
                self.parse_xml(&contents)?
            }
            ResponseShape::RawXml => {
                let text = String::from_utf8(body).map_err(|_| FeedError::InvalidUtf8)?;
                if text.trim().is_empty() {
                    return Err(FeedError::EmptyFeed);
                }
                self.parse_xml(&text)?
            }
            ResponseShape::PreNormalizedJson => self.parse_converter(&body)?,
        };

        let posts = normalize_items(
            &items,
            feed_url.as_str(),
            fetched_at,
            &self.settings.text_limits,
        );
        if posts.is_empty() {
            return Err(FeedError::EmptyFeed);
        }
        Ok(posts)
    }

    async fn download(&self, url: Url) -> Result<Vec<u8>, FeedError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FeedError::Network)?;

        if !response.status().is_success() {
            return Err(FeedError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.settings.max_response_bytes).await
    }

    fn parse_xml(&self, text: &str) -> Result<Vec<RawItem>, FeedError> {
        let document = self.parser.parse(text)?;
        Ok(document.items.iter().map(RawItem::from_element).collect())
    }

    fn parse_converter(&self, body: &[u8]) -> Result<Vec<RawItem>, FeedError> {
        let envelope: ConverterEnvelope = serde_json::from_slice(body)
            .map_err(|e| FeedError::InvalidEnvelope(e.to_string()))?;

        if envelope.status != "ok" {
            return Err(FeedError::ConverterStatus(
                envelope.message.unwrap_or(envelope.status),
            ));
        }

        let items = envelope.items.ok_or(FeedError::EmptyFeed)?;
        Ok(items
            .iter()
            .take(self.settings.feed_limits.max_items)
            .map(RawItem::from_json)
            .collect())
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch_feed(&self, feed_url: &str) -> Result<FeedFetchResult, FeedError> {
        // Fail fast: no strategy is contacted for a bad URL
        let url = validate_feed_url(feed_url)?;

        for strategy in &self.strategies {
            let fetched_at = Utc::now();
            match self.fetch_with(strategy, &url, fetched_at).await {
                Ok(posts) => {
                    tracing::debug!(
                        feed_url = %url,
                        strategy = %strategy.id(),
                        posts = posts.len(),
                        "Feed fetched"
                    );
                    return Ok(FeedFetchResult::success(
                        feed_url,
                        strategy.id(),
                        posts,
                        fetched_at,
                    ));
                }
                Err(e) => {
                    tracing::warn!(
                        feed_url = %url,
                        strategy = %strategy.id(),
                        error = %e,
                        "Feed strategy failed, trying next"
                    );
                }
            }
        }

        Err(FeedError::FeedUnavailable {
            attempts: self.strategies.len(),
        })
    }
}

#[derive(Deserialize)]
struct WrappedEnvelope {
    contents: Option<String>,
}

#[derive(Deserialize)]
struct ConverterEnvelope {
    #[serde(default)]
    status: String,
    message: Option<String>,
    items: Option<Vec<serde_json::Value>>,
}

/// Builds the HTTP client used for proxy requests.
///
/// # Errors
///
/// Returns the builder error if the TLS backend cannot be initialised.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(create_redirect_policy())
        .pool_idle_timeout(Duration::from_secs(30))
        .connect_timeout(timeout)
        .build()
}

fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            "Following redirect"
        );
        attempt.follow()
    })
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FeedError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FeedError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FeedError::Network)?;
        // SEC-003: Use saturating_add to prevent integer overflow in size check
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FeedError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
