//! Configuration file parser for `journal-feed.toml`.
//!
//! The config file is optional. A missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheSettings;
use crate::fallback::JOURNAL_FEED_URL;
use crate::feed::normalizer::{EXCERPT_CHARS, MAX_TEXT_CHARS};
use crate::feed::parser::{MAX_ELEMENT_DEPTH, MAX_FEED_BYTES, MAX_ITEMS};
use crate::feed::{
    build_strategies, default_strategy_configs, FeedLimits, FeedSourceStrategy, FetchSettings,
    StrategyConfig, StrategyError, TextLimits,
};

/// Environment variable that overrides `rss2json_api_key`.
pub const API_KEY_ENV: &str = "RSS2JSON_API_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// SEC-015: Custom Debug impl masks `rss2json_api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed URLs to load. One feed uses the cache; several are aggregated.
    pub feeds: Vec<String>,

    /// Per-attempt network timeout.
    pub request_timeout_secs: u64,

    /// Age after which cached posts are revalidated.
    pub stale_after_secs: u64,

    /// Largest feed document accepted by the parser.
    pub max_feed_bytes: usize,

    /// Largest proxy response body read from the network.
    pub max_response_bytes: usize,

    pub max_items: usize,

    /// Deepest element nesting accepted (root = 0).
    pub max_depth: usize,

    pub excerpt_chars: usize,

    pub max_text_chars: usize,

    /// Manual refreshes allowed per window, per feed.
    pub refresh_limit: usize,

    pub refresh_window_secs: u64,

    /// Serve stale posts while refetching in the background.
    pub background_revalidate: bool,

    pub max_cached_feeds: usize,

    /// Extra attempts after a failed fetch of the whole strategy list.
    pub fetch_retries: u32,

    /// Backoff before the first retry; doubles per retry up to the max.
    pub retry_base_delay_ms: u64,

    pub retry_max_delay_ms: u64,

    /// rss2json API key (alternative to the RSS2JSON_API_KEY env var).
    /// Env var takes precedence over config file.
    pub rss2json_api_key: Option<String>,

    /// Replaces the built-in strategy list when set.
    pub strategies: Option<Vec<StrategyConfig>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feeds: vec![JOURNAL_FEED_URL.to_string()],
            request_timeout_secs: 10,
            stale_after_secs: 600,
            max_feed_bytes: MAX_FEED_BYTES,
            max_response_bytes: crate::feed::fetcher::MAX_RESPONSE_BYTES,
            max_items: MAX_ITEMS,
            max_depth: MAX_ELEMENT_DEPTH,
            excerpt_chars: EXCERPT_CHARS,
            max_text_chars: MAX_TEXT_CHARS,
            refresh_limit: 5,
            refresh_window_secs: 60,
            background_revalidate: true,
            max_cached_feeds: 32,
            fetch_retries: 2,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 10_000,
            rss2json_api_key: None,
            strategies: None,
        }
    }
}

/// SEC-015: Mask rss2json_api_key in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("feeds", &self.feeds)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("stale_after_secs", &self.stale_after_secs)
            .field("max_feed_bytes", &self.max_feed_bytes)
            .field("max_response_bytes", &self.max_response_bytes)
            .field("max_items", &self.max_items)
            .field("max_depth", &self.max_depth)
            .field("excerpt_chars", &self.excerpt_chars)
            .field("max_text_chars", &self.max_text_chars)
            .field("refresh_limit", &self.refresh_limit)
            .field("refresh_window_secs", &self.refresh_window_secs)
            .field("background_revalidate", &self.background_revalidate)
            .field("max_cached_feeds", &self.max_cached_feeds)
            .field("fetch_retries", &self.fetch_retries)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field(
                "rss2json_api_key",
                &self.rss2json_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("strategies", &self.strategies)
            .finish()
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 18] = [
        "feeds",
        "request_timeout_secs",
        "stale_after_secs",
        "max_feed_bytes",
        "max_response_bytes",
        "max_items",
        "max_depth",
        "excerpt_chars",
        "max_text_chars",
        "refresh_limit",
        "refresh_window_secs",
        "background_revalidate",
        "max_cached_feeds",
        "fetch_retries",
        "retry_base_delay_ms",
        "retry_max_delay_ms",
        "rss2json_api_key",
        "strategies",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text. Blank text yields the defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(feeds = config.feeds.len(), "Loaded configuration");
        Ok(config)
    }

    /// The converter API key: `RSS2JSON_API_KEY` if set, else the config value.
    pub fn converter_key(&self) -> Option<SecretString> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.rss2json_api_key.clone())
            .map(SecretString::from)
    }

    /// Builds the strategy list: configured overrides, or the built-in three.
    pub fn build_strategies(&self) -> Result<Vec<FeedSourceStrategy>, StrategyError> {
        let key = self.converter_key();
        match &self.strategies {
            Some(configs) => build_strategies(configs, key.as_ref()),
            None => build_strategies(&default_strategy_configs(), key.as_ref()),
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            // A zero timeout would fail every attempt
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_response_bytes: self.max_response_bytes,
            feed_limits: FeedLimits {
                max_feed_bytes: self.max_feed_bytes,
                max_depth: self.max_depth,
                max_items: self.max_items,
            },
            text_limits: TextLimits {
                excerpt_chars: self.excerpt_chars,
                max_text_chars: self.max_text_chars,
            },
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            stale_after: Duration::from_secs(self.stale_after_secs),
            refresh_limit: self.refresh_limit,
            refresh_window: Duration::from_secs(self.refresh_window_secs),
            background_revalidate: self.background_revalidate,
            max_cached_feeds: self.max_cached_feeds,
            fetch_retries: self.fetch_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
