use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a URL string for use as a feed address.
///
/// Feeds are fetched by third-party proxies rather than by this process, so
/// the only policy enforced here is the scheme (`http`/`https`) and the
/// presence of a host. Anything else (`file:`, `javascript:`, `data:`) is
/// rejected before a single request is made.
///
/// # Errors
///
/// - [`UrlValidationError::InvalidUrl`] if the string does not parse
/// - [`UrlValidationError::UnsupportedScheme`] for non-HTTP(S) schemes
/// - [`UrlValidationError::MissingHost`] if the URL has no host
///
/// # Examples
///
/// ```
/// use journal_feed::util::validate_feed_url;
///
/// let url = validate_feed_url("https://journal.example.com/feed/").unwrap();
/// assert_eq!(url.host_str(), Some("journal.example.com"));
///
/// assert!(validate_feed_url("javascript:alert(1)").is_err());
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url)
}

/// Normalizes a link taken from feed content.
///
/// Returns the serialized URL when it parses with an `http`/`https` scheme and
/// an empty string otherwise, so dangerous schemes never reach a consumer.
pub fn sanitize_link(raw: &str) -> String {
    validate_feed_url(raw)
        .map(|url| url.to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
        assert!(validate_feed_url("http://news.example.org").is_ok());
        assert!(validate_feed_url("  https://example.com/feed/  ").is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_feed_url("ftp://example.com"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_feed_url("file:///etc/passwd").is_err());
        assert!(validate_feed_url("javascript:alert(1)").is_err());
        assert!(validate_feed_url("data:text/html,<b>x</b>").is_err());
    }

    #[test]
    fn test_unparseable() {
        assert!(matches!(
            validate_feed_url("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
        assert!(validate_feed_url("").is_err());
    }

    #[test]
    fn test_sanitize_link_keeps_http() {
        assert_eq!(
            sanitize_link("https://example.com/post?id=1"),
            "https://example.com/post?id=1"
        );
        // Serialization adds the root path like a browser URL parser does
        assert_eq!(sanitize_link("https://example.com"), "https://example.com/");
    }

    #[test]
    fn test_sanitize_link_drops_dangerous_schemes() {
        assert_eq!(sanitize_link("javascript:alert(1)"), "");
        assert_eq!(sanitize_link("data:text/html;base64,PHNjcmlwdD4="), "");
        assert_eq!(sanitize_link("vbscript:msgbox"), "");
        assert_eq!(sanitize_link(""), "");
    }
}
