use std::sync::OnceLock;

use regex::RegexSet;
use thiserror::Error;

use super::xml::{QuickXmlTreeParser, XmlElement, XmlTreeParser};

/// Maximum feed size accepted by the parser (1 MiB).
pub const MAX_FEED_BYTES: usize = 1024 * 1024;
/// Maximum element nesting depth, counting the root as 0.
pub const MAX_ELEMENT_DEPTH: usize = 10;
/// Maximum number of items kept from one feed.
pub const MAX_ITEMS: usize = 50;

/// Root element names accepted as a feed (compared case-insensitively).
pub const RECOGNIZED_ROOTS: [&str; 3] = ["rss", "feed", "rdf:RDF"];

/// SEC-002: Constructs rejected before the text reaches any XML parser.
/// Labels are used in the error message; order matches the regex set.
const UNSAFE_PATTERNS: [(&str, &str); 6] = [
    ("entity declaration", r"(?i)<!ENTITY"),
    ("DOCTYPE internal subset", r"(?i)<!DOCTYPE[^>]*\["),
    ("SYSTEM identifier", r#"(?i)SYSTEM\s+["']"#),
    ("PUBLIC identifier", r#"(?i)PUBLIC\s+["']"#),
    ("script URI in CDATA", r"(?i)<!\[CDATA\[.*?javascript:"),
    ("NOTATION declaration", r"(?i)<!NOTATION"),
];

fn unsafe_pattern_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(UNSAFE_PATTERNS.iter().map(|(_, pattern)| *pattern)).expect("Valid regex")
    })
}

/// Reasons a feed document is rejected by [`FeedParser`].
///
/// None of these are fatal to a fetch: the source selector treats each one as
/// "this strategy failed" and moves on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedParseError {
    #[error("Feed too large: {size} bytes (max {limit})")]
    FeedTooLarge { size: usize, limit: usize },
    #[error("Feed contains potentially unsafe content: {0}")]
    UnsafeFeedContent(&'static str),
    #[error("Malformed feed XML: {0}")]
    MalformedFeedXml(String),
    #[error("Unrecognized feed format: root element <{0}>")]
    UnrecognizedFeedFormat(String),
    #[error("Feed structure too deep: depth {depth} exceeds {limit}")]
    FeedStructureTooDeep { depth: usize, limit: usize },
}

/// Ceilings applied to every feed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedLimits {
    pub max_feed_bytes: usize,
    pub max_depth: usize,
    pub max_items: usize,
}

impl Default for FeedLimits {
    fn default() -> Self {
        Self {
            max_feed_bytes: MAX_FEED_BYTES,
            max_depth: MAX_ELEMENT_DEPTH,
            max_items: MAX_ITEMS,
        }
    }
}

/// A feed document that passed every check.
///
/// Only the item-level elements are retained; the rest of the tree is
/// dropped once they have been extracted.
#[derive(Debug, Clone)]
pub struct RawFeedDocument {
    /// Root element name as written (`rss`, `feed`, `rdf:RDF`)
    pub root_name: String,
    /// Item elements in document order, capped at `max_items`
    pub items: Vec<XmlElement>,
    /// Number of items in the document before the cap was applied
    pub total_items: usize,
}

/// Returns the label of the first unsafe construct found in `text`.
pub fn find_unsafe_pattern(text: &str) -> Option<&'static str> {
    unsafe_pattern_set()
        .matches(text)
        .iter()
        .next()
        .map(|idx| UNSAFE_PATTERNS[idx].0)
}

/// Parser for untrusted feed text.
///
/// Checks run in a fixed order and the first failure wins:
///
/// 1. byte length against `max_feed_bytes`
/// 2. unsafe constructs (entity declarations, DOCTYPE subsets, external
///    identifiers, `javascript:` in CDATA, notations)
/// 3. well-formedness
/// 4. root element name
/// 5. nesting depth
///
/// Items beyond `max_items` are dropped silently.
pub struct FeedParser {
    limits: FeedLimits,
    tree: Box<dyn XmlTreeParser>,
}

impl std::fmt::Debug for FeedParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedParser")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Default for FeedParser {
    fn default() -> Self {
        Self::new(FeedLimits::default())
    }
}

impl FeedParser {
    pub fn new(limits: FeedLimits) -> Self {
        Self::with_tree_parser(limits, Box::new(QuickXmlTreeParser))
    }

    pub fn with_tree_parser(limits: FeedLimits, tree: Box<dyn XmlTreeParser>) -> Self {
        Self { limits, tree }
    }

    pub fn limits(&self) -> FeedLimits {
        self.limits
    }

    /// Validates and parses `text` into a [`RawFeedDocument`].
    ///
    /// # Errors
    ///
    /// Returns the [`FeedParseError`] for the first check that fails. A
    /// rejected document never yields partial items.
    pub fn parse(&self, text: &str) -> Result<RawFeedDocument, FeedParseError> {
        let limits = self.limits;

        if text.len() > limits.max_feed_bytes {
            return Err(FeedParseError::FeedTooLarge {
                size: text.len(),
                limit: limits.max_feed_bytes,
            });
        }

        if let Some(label) = find_unsafe_pattern(text) {
            tracing::warn!(pattern = label, "Rejecting feed with unsafe XML construct");
            return Err(FeedParseError::UnsafeFeedContent(label));
        }

        // Keep one level past the ceiling so the depth check sees the overflow
        let document = self
            .tree
            .parse_tree(text, limits.max_depth.saturating_add(1))
            .map_err(|e| FeedParseError::MalformedFeedXml(e.to_string()))?;

        let root_name = document.root.name.clone();
        if !RECOGNIZED_ROOTS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(&root_name))
        {
            return Err(FeedParseError::UnrecognizedFeedFormat(root_name));
        }

        if document.max_depth > limits.max_depth {
            return Err(FeedParseError::FeedStructureTooDeep {
                depth: document.max_depth,
                limit: limits.max_depth,
            });
        }

        let (items, total_items) = take_items(document.root, limits.max_items);
        if total_items > items.len() {
            tracing::debug!(
                total = total_items,
                kept = items.len(),
                "Feed item count capped"
            );
        }

        Ok(RawFeedDocument {
            root_name,
            items,
            total_items,
        })
    }
}

/// Moves `item` elements out of the tree in document order.
///
/// Returns the first `max_items` items and the total number found. Items are
/// not searched for nested items.
fn take_items(root: XmlElement, max_items: usize) -> (Vec<XmlElement>, usize) {
    use super::xml::XmlNode;

    let mut items = Vec::new();
    let mut total = 0;
    let mut stack = vec![root];

    while let Some(element) = stack.pop() {
        if element.name == "item" {
            total += 1;
            if items.len() < max_items {
                items.push(element);
            }
            continue;
        }
        let children = element.children.into_iter().rev().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            XmlNode::Text(_) => None,
        });
        stack.extend(children);
    }

    (items, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rss_with_items(count: usize) -> String {
        let items: String = (0..count)
            .map(|i| format!("<item><guid>g{i}</guid><title>Post {i}</title></item>"))
            .collect();
        format!(r#"<?xml version="1.0"?><rss version="2.0"><channel>{items}</channel></rss>"#)
    }

    #[test]
    fn test_valid_feed_parses() {
        let doc = FeedParser::default().parse(&rss_with_items(3)).unwrap();
        assert_eq!(doc.root_name, "rss");
        assert_eq!(doc.items.len(), 3);
        assert_eq!(doc.total_items, 3);
        assert_eq!(doc.items[1].child_text("title"), "Post 1");
    }

    #[test]
    fn test_oversized_feed_rejected_before_parsing() {
        let limits = FeedLimits {
            max_feed_bytes: 64,
            ..FeedLimits::default()
        };
        let result = FeedParser::new(limits).parse(&rss_with_items(10));
        assert!(matches!(
            result,
            Err(FeedParseError::FeedTooLarge { limit: 64, .. })
        ));
    }

    #[test]
    fn test_size_limit_is_inclusive() {
        let text = rss_with_items(1);
        let limits = FeedLimits {
            max_feed_bytes: text.len(),
            ..FeedLimits::default()
        };
        assert!(FeedParser::new(limits).parse(&text).is_ok());
    }

    #[test]
    fn test_entity_declaration_rejected() {
        let xxe = r#"<?xml version="1.0"?>
<!DOCTYPE foo [ <!ENTITY xxe SYSTEM "file:///etc/passwd"> ]>
<rss><channel><item><title>&xxe;</title></item></channel></rss>"#;
        assert!(matches!(
            FeedParser::default().parse(xxe),
            Err(FeedParseError::UnsafeFeedContent(_))
        ));
    }

    #[test]
    fn test_each_unsafe_pattern_detected() {
        let cases = [
            ("<!entity a 'b'>", "entity declaration"),
            ("<!DOCTYPE rss [\n]>", "DOCTYPE internal subset"),
            (r#"<x SYSTEM "http://evil"/>"#, "SYSTEM identifier"),
            ("<x PUBLIC 'id'/>", "PUBLIC identifier"),
            ("<d><![CDATA[<a href=\"javascript:alert(1)\">]]></d>", "script URI in CDATA"),
            ("<!NOTATION jpeg>", "NOTATION declaration"),
        ];
        for (input, expected) in cases {
            assert_eq!(find_unsafe_pattern(input), Some(expected), "input: {input}");
        }
    }

    #[test]
    fn test_plain_doctype_allowed() {
        let text = r#"<?xml version="1.0"?><!DOCTYPE rss><rss><channel></channel></rss>"#;
        assert!(FeedParser::default().parse(text).is_ok());
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            FeedParser::default().parse("<rss><channel><item></channel></rss>"),
            Err(FeedParseError::MalformedFeedXml(_))
        ));
        assert!(matches!(
            FeedParser::default().parse("<not valid xml"),
            Err(FeedParseError::MalformedFeedXml(_))
        ));
    }

    #[test]
    fn test_unrecognized_root() {
        let result = FeedParser::default().parse("<html><body>hi</body></html>");
        assert_eq!(
            result.unwrap_err(),
            FeedParseError::UnrecognizedFeedFormat("html".to_string())
        );
    }

    #[test]
    fn test_recognized_roots() {
        let parser = FeedParser::default();
        assert!(parser.parse("<feed></feed>").is_ok());
        assert!(parser.parse("<rdf:RDF><item/></rdf:RDF>").is_ok());
        assert!(parser.parse("<RSS></RSS>").is_ok());
    }

    #[test]
    fn test_depth_at_ceiling_accepted() {
        // rss is depth 0, so ten nested <n> reach exactly depth 10
        let text = format!("<rss>{}{}</rss>", "<n>".repeat(10), "</n>".repeat(10));
        assert!(FeedParser::default().parse(&text).is_ok());
    }

    #[test]
    fn test_depth_over_ceiling_rejected() {
        let text = format!("<rss>{}{}</rss>", "<n>".repeat(11), "</n>".repeat(11));
        assert_eq!(
            FeedParser::default().parse(&text).unwrap_err(),
            FeedParseError::FeedStructureTooDeep {
                depth: 11,
                limit: 10
            }
        );
    }

    #[test]
    fn test_very_deep_input_rejected_without_blowing_up() {
        let text = format!("<rss>{}{}</rss>", "<n>".repeat(50_000), "</n>".repeat(50_000));
        assert!(matches!(
            FeedParser::default().parse(&text),
            Err(FeedParseError::FeedStructureTooDeep { .. })
        ));
    }

    #[test]
    fn test_item_cap_keeps_document_order() {
        let doc = FeedParser::default().parse(&rss_with_items(500)).unwrap();
        assert_eq!(doc.items.len(), MAX_ITEMS);
        assert_eq!(doc.total_items, 500);
        let guids: Vec<String> = doc.items.iter().map(|i| i.child_text("guid")).collect();
        let expected: Vec<String> = (0..MAX_ITEMS).map(|i| format!("g{i}")).collect();
        assert_eq!(guids, expected);
    }

    #[test]
    fn test_size_check_precedes_pattern_check() {
        let limits = FeedLimits {
            max_feed_bytes: 10,
            ..FeedLimits::default()
        };
        let result = FeedParser::new(limits).parse("<!ENTITY x 'y'><rss/>");
        assert!(matches!(result, Err(FeedParseError::FeedTooLarge { .. })));
    }
}
