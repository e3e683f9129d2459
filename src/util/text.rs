use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

/// Ellipsis appended to truncated excerpts
const ELLIPSIS: &str = "...";

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("Valid regex"))
}

fn img_src_pattern() -> &'static Regex {
    static IMG: OnceLock<Regex> = OnceLock::new();
    IMG.get_or_init(|| Regex::new(r#"<img[^>]+src="([^">]+)""#).expect("Valid regex"))
}

/// Removes anything that looks like a markup tag (`<...>`).
///
/// Unterminated tags (`<b` with no closing `>`) are left in place as text,
/// which matches what a browser would render for the same string.
pub fn strip_markup(s: &str) -> Cow<'_, str> {
    tag_pattern().replace_all(s, "")
}

/// Decodes character references that survive XML unescaping.
///
/// Feed bodies are frequently HTML that was escaped once for transport, so
/// after the XML layer they still carry `&#8217;`, `&amp;` and friends.
/// `&nbsp;` is mapped to a plain space first because the XML unescaper does
/// not know it. Anything else it rejects is returned untouched.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    let spaced = s.replace("&nbsp;", " ");
    match quick_xml::escape::unescape(&spaced) {
        Ok(decoded) => Cow::Owned(decoded.into_owned()),
        Err(_) => Cow::Owned(spaced),
    }
}

/// Strips ASCII control characters and DEL, keeping tab, newline and CR.
///
/// Returns `Cow::Borrowed` when there is nothing to strip (the common case).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| c == '\u{7f}' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'));

    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|c| !is_control(*c)).collect())
}

/// Returns at most `max_chars` characters of `s`, never splitting a code point.
pub fn take_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Produces plain text from an untrusted fragment of feed markup.
///
/// Entities are decoded before tags are stripped so that escaped markup
/// (`&lt;script&gt;`) cannot reappear as a live tag afterwards. The result is
/// trimmed and capped at `max_chars` characters.
pub fn sanitize_text(raw: &str, max_chars: usize) -> String {
    let decoded = decode_entities(raw);
    let stripped = strip_markup(&decoded);
    let clean = strip_control_chars(&stripped);
    take_chars(clean.trim(), max_chars).trim_end().to_string()
}

/// Derives a short plain-text excerpt from an HTML body.
///
/// Bodies longer than `max_chars` characters are cut at `max_chars` and get a
/// trailing `...`. Returns `None` when nothing readable is left after
/// stripping, so the caller can substitute its placeholder.
pub fn excerpt(raw: &str, max_chars: usize) -> Option<String> {
    let decoded = decode_entities(raw);
    let stripped = strip_markup(&decoded);
    let clean = strip_control_chars(&stripped);
    let text = clean.trim();

    if text.is_empty() {
        return None;
    }
    if text.chars().count() > max_chars {
        Some(format!("{}{}", take_chars(text, max_chars), ELLIPSIS))
    } else {
        Some(text.to_string())
    }
}

/// Returns the `src` of the first `<img>` tag in `html`, if any.
pub fn first_img_src(html: &str) -> Option<&str> {
    img_src_pattern()
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markup_removes_tags() {
        assert_eq!(strip_markup("<p>Hello <b>world</b></p>"), "Hello world");
        assert_eq!(strip_markup("<script>alert(1)</script>"), "alert(1)");
    }

    #[test]
    fn test_strip_markup_clean_text_borrowed() {
        assert!(matches!(strip_markup("plain text"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("it&#8217;s"), "it\u{2019}s");
        assert_eq!(decode_entities("a&nbsp;b"), "a b");
        assert_eq!(decode_entities("Q&amp;A"), "Q&A");
        // Unknown entity leaves input untouched
        assert_eq!(decode_entities("&copy; 2025"), "&copy; 2025");
    }

    #[test]
    fn test_sanitize_text_escaped_markup_does_not_survive() {
        let out = sanitize_text("&lt;script&gt;alert(1)&lt;/script&gt;Title", 500);
        assert_eq!(out, "alert(1)Title");
        assert!(!out.contains('<'));
    }

    #[test]
    fn test_sanitize_text_caps_length() {
        let long = "x".repeat(1000);
        assert_eq!(sanitize_text(&long, 500).chars().count(), 500);
    }

    #[test]
    fn test_sanitize_text_multibyte_cap() {
        let s = "日本語".repeat(10);
        assert_eq!(sanitize_text(&s, 4), "日本語日");
    }

    #[test]
    fn test_strip_control_chars() {
        assert_eq!(strip_control_chars("he\x00ll\x07o\x7f"), "hello");
        assert!(matches!(strip_control_chars("tab\tnl\n"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_excerpt_short_text_untouched() {
        assert_eq!(excerpt("<p>Short body</p>", 150).as_deref(), Some("Short body"));
    }

    #[test]
    fn test_excerpt_truncates_with_ellipsis() {
        let body = format!("<p>{}</p>", "a".repeat(200));
        let out = excerpt(&body, 150).unwrap();
        assert_eq!(out.chars().count(), 153);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_excerpt_exactly_at_limit_has_no_ellipsis() {
        let body = "b".repeat(150);
        assert_eq!(excerpt(&body, 150).unwrap(), body);
    }

    #[test]
    fn test_excerpt_empty_after_strip() {
        assert_eq!(excerpt("<img src=\"x.png\"/>", 150), None);
        assert_eq!(excerpt("   ", 150), None);
    }

    #[test]
    fn test_first_img_src() {
        let html = r#"<p>x</p><img class="a" src="https://cdn.example.com/a.png" alt=""><img src="b.png">"#;
        assert_eq!(first_img_src(html), Some("https://cdn.example.com/a.png"));
        assert_eq!(first_img_src("<p>no images</p>"), None);
    }
}
