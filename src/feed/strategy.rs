//! Feed source strategies: how to reach a feed through a proxy or converter.
//!
//! A browser cannot fetch a third-party feed directly, so every fetch goes
//! through one of a small set of public services. Each service differs in
//! two ways only: how the request URL is built and what the response looks
//! like. [`FeedSourceStrategy`] captures exactly those two things.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{form_urlencoded, Url};

/// Query parameter used to pass the converter API key.
const API_KEY_PARAM: &str = "api_key";

/// What a strategy's endpoint returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    /// JSON envelope with the feed XML as a string: `{"contents": "<rss..."}`
    WrappedXml,
    /// The feed body verbatim
    RawXml,
    /// Converter JSON with already-parsed items: `{"status": "ok", "items": [...]}`
    PreNormalizedJson,
}

/// How the feed URL is attached to the strategy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UrlRule {
    /// `endpoint?{param}={encoded feed url}`
    QueryParam { param: String },
    /// `endpoint?{encoded feed url}`
    BareQuery,
}

/// Errors raised while building a strategy.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// Endpoint is not a valid absolute URL
    #[error("Invalid endpoint for strategy '{id}': {source}")]
    InvalidEndpoint {
        id: String,
        #[source]
        source: url::ParseError,
    },
    /// Endpoint uses plain HTTP on a non-local host
    #[error("Strategy '{0}' must use HTTPS (HTTP is only allowed for localhost)")]
    InsecureEndpoint(String),
    /// Two strategies share one id
    #[error("Duplicate strategy id '{0}'")]
    DuplicateId(String),
}

/// One way of fetching a feed.
///
/// Immutable once built; the ordered list handed to the fetcher is the trial
/// order.
#[derive(Clone)]
pub struct FeedSourceStrategy {
    id: String,
    endpoint: Url,
    rule: UrlRule,
    shape: ResponseShape,
    api_key: Option<SecretString>,
}

// Custom Debug so the API key never ends up in logs
impl std::fmt::Debug for FeedSourceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSourceStrategy")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint.as_str())
            .field("rule", &self.rule)
            .field("shape", &self.shape)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl FeedSourceStrategy {
    /// Builds a strategy, validating its endpoint.
    ///
    /// # Errors
    ///
    /// - [`StrategyError::InvalidEndpoint`] if `endpoint` does not parse
    /// - [`StrategyError::InsecureEndpoint`] for `http://` endpoints other
    ///   than `localhost`/`127.0.0.1`
    pub fn new(
        id: impl Into<String>,
        endpoint: &str,
        rule: UrlRule,
        shape: ResponseShape,
    ) -> Result<Self, StrategyError> {
        let id = id.into();
        let endpoint = Url::parse(endpoint).map_err(|source| StrategyError::InvalidEndpoint {
            id: id.clone(),
            source,
        })?;

        // SEC-002: Feed URLs (and the converter key) travel in the query
        // string, so endpoints must be HTTPS. Loopback HTTP is for tests.
        match endpoint.scheme() {
            "https" => {}
            "http" if is_loopback(&endpoint) => {
                tracing::debug!(strategy = %id, endpoint = %endpoint, "Using non-HTTPS strategy endpoint (loopback only)");
            }
            _ => return Err(StrategyError::InsecureEndpoint(id)),
        }

        Ok(Self {
            id,
            endpoint,
            rule,
            shape,
            api_key: None,
        })
    }

    /// Attaches an API key, sent as the `api_key` query parameter.
    pub fn with_api_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Builds the request URL for `feed_url`.
    ///
    /// The feed URL is always percent-encoded, so its own query string and
    /// fragment cannot leak into the proxy's parameters.
    pub fn request_url(&self, feed_url: &Url) -> Url {
        let mut url = self.endpoint.clone();
        match &self.rule {
            UrlRule::QueryParam { param } => {
                url.query_pairs_mut().append_pair(param, feed_url.as_str());
            }
            UrlRule::BareQuery => {
                let encoded: String =
                    form_urlencoded::byte_serialize(feed_url.as_str().as_bytes()).collect();
                url.set_query(Some(&encoded));
            }
        }
        if let Some(key) = &self.api_key {
            url.query_pairs_mut()
                .append_pair(API_KEY_PARAM, key.expose_secret());
        }
        url
    }
}

fn is_loopback(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"))
}

// ============================================================================
// Configuration
// ============================================================================

/// Serializable description of a strategy, as written in the config file.
///
/// ```toml
/// [[strategies]]
/// id = "allorigins"
/// endpoint = "https://api.allorigins.win/get"
/// rule = { kind = "query_param", param = "url" }
/// shape = "wrapped_xml"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    pub endpoint: String,
    pub rule: UrlRule,
    pub shape: ResponseShape,
}

/// The three public services the journal feed is fetched through, in trial
/// order.
pub fn default_strategy_configs() -> Vec<StrategyConfig> {
    vec![
        StrategyConfig {
            id: "allorigins".to_string(),
            endpoint: "https://api.allorigins.win/get".to_string(),
            rule: UrlRule::QueryParam {
                param: "url".to_string(),
            },
            shape: ResponseShape::WrappedXml,
        },
        StrategyConfig {
            id: "corsproxy".to_string(),
            endpoint: "https://corsproxy.io/".to_string(),
            rule: UrlRule::BareQuery,
            shape: ResponseShape::RawXml,
        },
        StrategyConfig {
            id: "rss2json".to_string(),
            endpoint: "https://api.rss2json.com/v1/api.json".to_string(),
            rule: UrlRule::QueryParam {
                param: "rss_url".to_string(),
            },
            shape: ResponseShape::PreNormalizedJson,
        },
    ]
}

/// Builds the ordered strategy list from config entries.
///
/// The converter key, when present, is attached to every
/// [`ResponseShape::PreNormalizedJson`] strategy and to nothing else.
///
/// # Errors
///
/// Fails on the first invalid endpoint or a repeated id.
pub fn build_strategies(
    configs: &[StrategyConfig],
    converter_key: Option<&SecretString>,
) -> Result<Vec<FeedSourceStrategy>, StrategyError> {
    let mut strategies: Vec<FeedSourceStrategy> = Vec::with_capacity(configs.len());
    for config in configs {
        if strategies.iter().any(|s| s.id == config.id) {
            return Err(StrategyError::DuplicateId(config.id.clone()));
        }
        let mut strategy = FeedSourceStrategy::new(
            config.id.clone(),
            &config.endpoint,
            config.rule.clone(),
            config.shape,
        )?;
        if let (Some(key), ResponseShape::PreNormalizedJson) = (converter_key, config.shape) {
            strategy = strategy.with_api_key(key.clone());
        }
        strategies.push(strategy);
    }
    Ok(strategies)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> Url {
        Url::parse("https://journal.example.com/feed/?a=1&b=2").unwrap()
    }

    fn defaults() -> Vec<FeedSourceStrategy> {
        build_strategies(&default_strategy_configs(), None).unwrap()
    }

    #[test]
    fn test_default_order() {
        let ids: Vec<_> = defaults().iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids, ["allorigins", "corsproxy", "rss2json"]);
    }

    #[test]
    fn test_query_param_encodes_feed_url() {
        let url = defaults()[0].request_url(&feed());
        assert_eq!(
            url.as_str(),
            "https://api.allorigins.win/get?url=https%3A%2F%2Fjournal.example.com%2Ffeed%2F%3Fa%3D1%26b%3D2"
        );
    }

    #[test]
    fn test_bare_query_encodes_feed_url() {
        let url = defaults()[1].request_url(&feed());
        assert_eq!(
            url.as_str(),
            "https://corsproxy.io/?https%3A%2F%2Fjournal.example.com%2Ffeed%2F%3Fa%3D1%26b%3D2"
        );
    }

    #[test]
    fn test_api_key_only_on_converter() {
        let key = SecretString::from("k-123");
        let strategies = build_strategies(&default_strategy_configs(), Some(&key)).unwrap();

        assert!(!strategies[0].has_api_key());
        assert!(!strategies[1].has_api_key());
        assert!(strategies[2].has_api_key());

        let url = strategies[2].request_url(&feed());
        assert!(url.as_str().ends_with("&api_key=k-123"));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let strategy = FeedSourceStrategy::new(
            "conv",
            "https://conv.example.com/api",
            UrlRule::BareQuery,
            ResponseShape::PreNormalizedJson,
        )
        .unwrap()
        .with_api_key(SecretString::from("super-secret"));

        let debug = format!("{strategy:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_http_endpoint_rejected() {
        let result = FeedSourceStrategy::new(
            "plain",
            "http://proxy.example.com/",
            UrlRule::BareQuery,
            ResponseShape::RawXml,
        );
        assert!(matches!(result, Err(StrategyError::InsecureEndpoint(_))));
    }

    #[test]
    fn test_loopback_http_allowed() {
        for endpoint in ["http://127.0.0.1:8080/get", "http://localhost/get"] {
            assert!(FeedSourceStrategy::new(
                "local",
                endpoint,
                UrlRule::BareQuery,
                ResponseShape::RawXml
            )
            .is_ok());
        }
    }

    #[test]
    fn test_invalid_endpoint() {
        let result =
            FeedSourceStrategy::new("bad", "not a url", UrlRule::BareQuery, ResponseShape::RawXml);
        assert!(matches!(result, Err(StrategyError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut configs = default_strategy_configs();
        configs.push(configs[0].clone());
        assert!(matches!(
            build_strategies(&configs, None),
            Err(StrategyError::DuplicateId(id)) if id == "allorigins"
        ));
    }

    #[test]
    fn test_config_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategies: Vec<StrategyConfig>,
        }

        let wrapper: Wrapper = toml::from_str(
            r#"
            [[strategies]]
            id = "mirror"
            endpoint = "https://mirror.example.com/raw"
            rule = { kind = "bare_query" }
            shape = "raw_xml"
            "#,
        )
        .unwrap();

        assert_eq!(wrapper.strategies[0].rule, UrlRule::BareQuery);
        assert_eq!(wrapper.strategies[0].shape, ResponseShape::RawXml);
    }
}
