//! Item normalization: one feed item in, one [`CanonicalPost`] out.
//!
//! Both source paths (XML items and converter JSON items) are first lowered
//! into a [`RawItem`] so the field rules live in exactly one place.
//! Normalization never fails; a missing or malformed field falls back to its
//! default.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::types::{parse_feed_date, CanonicalPost, DEFAULT_AUTHOR, DEFAULT_TITLE, NO_EXCERPT};
use super::xml::XmlElement;
use crate::util::{excerpt, first_img_src, sanitize_link, sanitize_text};

/// Default excerpt length in characters (before the ellipsis).
pub const EXCERPT_CHARS: usize = 150;
/// Default cap for title, author, id and category text.
pub const MAX_TEXT_CHARS: usize = 500;

/// Length limits used while normalizing text fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextLimits {
    pub excerpt_chars: usize,
    pub max_text_chars: usize,
}

impl Default for TextLimits {
    fn default() -> Self {
        Self {
            excerpt_chars: EXCERPT_CHARS,
            max_text_chars: MAX_TEXT_CHARS,
        }
    }
}

/// Where an item sits: which feed, which position, fetched when.
///
/// Everything time- or position-dependent in a post comes from here, so
/// normalizing the same item with the same context is deterministic.
#[derive(Debug, Clone, Copy)]
pub struct ItemContext<'a> {
    pub feed_url: &'a str,
    pub index: usize,
    pub fetched_at: DateTime<Utc>,
}

/// An `<enclosure>` (or converter equivalent).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: String,
}

/// Source-agnostic item fields, still unsanitized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub guid: String,
    pub title: String,
    pub link: String,
    /// Explicit summary supplied by the source, if any
    pub summary: String,
    pub description: String,
    /// Body kept as `CanonicalPost::content`
    pub body: String,
    pub published: String,
    pub author: String,
    pub categories: Vec<String>,
    pub media_thumbnail: String,
    pub enclosure: Option<Enclosure>,
}

impl RawItem {
    /// Reads an RSS `<item>` element.
    pub fn from_element(item: &XmlElement) -> Self {
        let description = item.child_text("description");
        let encoded = item.child_text("content:encoded");
        let body = if description.is_empty() {
            encoded
        } else {
            description.clone()
        };

        let author = Some(item.child_text("dc:creator"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| item.child_text("author"));

        let categories = item
            .descendants()
            .filter(|el| el.name == "category")
            .map(|el| el.text().trim().to_string())
            .collect();

        let media_thumbnail = item
            .descendants()
            .find(|el| el.name == "media:thumbnail" || el.name == "thumbnail")
            .and_then(|el| el.attr("url"))
            .unwrap_or_default()
            .to_string();

        let enclosure = item.find("enclosure").map(|el| Enclosure {
            url: el.attr("url").unwrap_or_default().to_string(),
            mime_type: el.attr("type").unwrap_or_default().to_string(),
        });

        Self {
            guid: item.child_text("guid"),
            title: item.child_text("title"),
            link: item.child_text("link"),
            summary: String::new(),
            description,
            body,
            published: item.child_text("pubDate"),
            author,
            categories,
            media_thumbnail,
            enclosure,
        }
    }

    /// Reads one item object from an RSS-to-JSON converter response.
    ///
    /// Non-object values and fields of the wrong type are treated as missing.
    pub fn from_json(item: &Value) -> Self {
        let text = |key: &str| -> String {
            item.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string()
        };

        let description = text("description");
        let content = text("content");
        let body = if content.is_empty() {
            description.clone()
        } else {
            content
        };

        let summary = Some(text("excerpt"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| text("summary"));

        let categories = item
            .get("categories")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .collect()
            })
            .unwrap_or_default();

        let enclosure = item.get("enclosure").and_then(|enc| {
            let url = enc.get("link").or_else(|| enc.get("url"))?.as_str()?;
            Some(Enclosure {
                url: url.to_string(),
                mime_type: enc
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        });

        Self {
            guid: text("guid"),
            title: text("title"),
            link: text("link"),
            summary,
            description,
            body,
            published: text("pubDate"),
            author: text("author"),
            categories,
            media_thumbnail: text("thumbnail"),
            enclosure,
        }
    }
}

/// Builds the canonical post for one item.
///
/// Field rules:
/// - `title`/`author`: sanitized plain text, defaulting to "Untitled" /
///   "Unknown Author"
/// - `link`: kept only when it is an `http`/`https` URL
/// - `excerpt`: explicit summary, else derived from the description or body;
///   always capped at `excerpt_chars` with an ellipsis
/// - `published_at`: RFC 3339 when the date parses, else the sanitized text,
///   else the fetch time
/// - `id`: guid, else link, else `item-{index}-{feed hash}`
/// - `thumbnail_url`: media thumbnail, else image enclosure, else first
///   `<img src>` in the description or body
pub fn normalize_item(raw: &RawItem, ctx: &ItemContext<'_>, limits: &TextLimits) -> CanonicalPost {
    let title = non_empty(sanitize_text(&raw.title, limits.max_text_chars))
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let link = sanitize_link(&raw.link);

    let excerpt = excerpt(&raw.summary, limits.excerpt_chars)
        .or_else(|| excerpt(&raw.description, limits.excerpt_chars))
        .or_else(|| excerpt(&raw.body, limits.excerpt_chars))
        .unwrap_or_else(|| NO_EXCERPT.to_string());

    let published = sanitize_text(&raw.published, limits.max_text_chars);
    let published_at = match parse_feed_date(&published) {
        Some(date) => date.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => non_empty(published)
            .unwrap_or_else(|| ctx.fetched_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    };

    let author = non_empty(sanitize_text(&raw.author, limits.max_text_chars))
        .unwrap_or_else(|| DEFAULT_AUTHOR.to_string());

    let id = non_empty(sanitize_text(&raw.guid, limits.max_text_chars))
        .or_else(|| non_empty(link.clone()))
        .unwrap_or_else(|| synthetic_id(ctx.feed_url, ctx.index));

    let categories = raw
        .categories
        .iter()
        .map(|c| sanitize_text(c, limits.max_text_chars))
        .filter(|c| !c.is_empty())
        .collect();

    CanonicalPost {
        id,
        title,
        excerpt,
        content: raw.body.clone(),
        link,
        published_at,
        author,
        categories,
        thumbnail_url: resolve_thumbnail(raw),
        bundled_image: None,
    }
}

/// Normalizes a batch of items, numbering them from 0 in the order given.
pub fn normalize_items<'a, I>(
    items: I,
    feed_url: &str,
    fetched_at: DateTime<Utc>,
    limits: &TextLimits,
) -> Vec<CanonicalPost>
where
    I: IntoIterator<Item = &'a RawItem>,
{
    items
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let ctx = ItemContext {
                feed_url,
                index,
                fetched_at,
            };
            normalize_item(raw, &ctx, limits)
        })
        .collect()
}

fn resolve_thumbnail(raw: &RawItem) -> Option<String> {
    let media = || checked_url(&raw.media_thumbnail);
    let enclosure = || {
        raw.enclosure
            .as_ref()
            .filter(|enc| enc.mime_type.trim().starts_with("image/"))
            .and_then(|enc| checked_url(&enc.url))
    };
    let inline = |html: &str| first_img_src(html).and_then(checked_url);

    media()
        .or_else(enclosure)
        .or_else(|| inline(&raw.description))
        .or_else(|| inline(&raw.body))
}

fn checked_url(candidate: &str) -> Option<String> {
    non_empty(sanitize_link(candidate))
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Synthetic id for items with neither guid nor link.
///
/// The short feed hash keeps ids from different feeds apart once their posts
/// are merged.
fn synthetic_id(feed_url: &str, index: usize) -> String {
    let hash = Sha256::digest(feed_url.as_bytes());
    let short: String = hash.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("item-{index}-{short}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::xml::{QuickXmlTreeParser, XmlTreeParser};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const FEED: &str = "https://journal.example.com/feed/";

    fn ctx(index: usize) -> ItemContext<'static> {
        ItemContext {
            feed_url: FEED,
            index,
            fetched_at: Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap(),
        }
    }

    fn item(xml: &str) -> RawItem {
        let doc = QuickXmlTreeParser.parse_tree(xml, 16).unwrap();
        RawItem::from_element(&doc.root)
    }

    fn normalize(raw: &RawItem) -> CanonicalPost {
        normalize_item(raw, &ctx(0), &TextLimits::default())
    }

    #[test]
    fn test_full_item() {
        let raw = item(
            r#"<item>
                <title>Static <em>Code</em> Analysis</title>
                <link>https://journal.example.com/2025/07/05/static/</link>
                <guid>https://journal.example.com/?p=42</guid>
                <pubDate>Sat, 05 Jul 2025 10:00:00 +0000</pubDate>
                <dc:creator><![CDATA[Ishaan]]></dc:creator>
                <category>Static Analysis</category>
                <category><![CDATA[Reverse Engineering]]></category>
                <description><![CDATA[<p>Imagine a clock.</p>]]></description>
            </item>"#,
        );
        let post = normalize(&raw);

        assert_eq!(post.id, "https://journal.example.com/?p=42");
        assert_eq!(post.title, "Static Code Analysis");
        assert_eq!(post.link, "https://journal.example.com/2025/07/05/static/");
        assert_eq!(post.published_at, "2025-07-05T10:00:00Z");
        assert_eq!(post.author, "Ishaan");
        assert_eq!(post.categories, ["Static Analysis", "Reverse Engineering"]);
        assert_eq!(post.excerpt, "Imagine a clock.");
        assert_eq!(post.content, "<p>Imagine a clock.</p>");
        assert_eq!(post.thumbnail_url, None);
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let post = normalize(&item("<item><description></description></item>"));

        assert_eq!(post.title, DEFAULT_TITLE);
        assert_eq!(post.author, DEFAULT_AUTHOR);
        assert_eq!(post.excerpt, NO_EXCERPT);
        assert_eq!(post.link, "");
        assert_eq!(post.published_at, "2025-08-01T12:00:00Z");
        assert!(post.id.starts_with("item-0-"));
        assert_eq!(post.id.len(), "item-0-".len() + 8);
    }

    #[test]
    fn test_id_falls_back_to_link() {
        let post = normalize(&item("<item><link>https://example.com/a</link></item>"));
        assert_eq!(post.id, "https://example.com/a");
    }

    #[test]
    fn test_synthetic_ids_unique_within_feed() {
        let raws = vec![RawItem::default(), RawItem::default(), RawItem::default()];
        let posts = normalize_items(&raws, FEED, ctx(0).fetched_at, &TextLimits::default());
        let mut ids: Vec<_> = posts.iter().map(|p| p.id.clone()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_synthetic_ids_differ_across_feeds() {
        assert_ne!(synthetic_id("https://a.test/feed", 0), synthetic_id("https://b.test/feed", 0));
    }

    #[test]
    fn test_javascript_link_stripped() {
        let post = normalize(&item("<item><link>javascript:alert(1)</link></item>"));
        assert_eq!(post.link, "");
        // A dangerous link must not leak in through the id either
        assert!(post.id.starts_with("item-"));
    }

    #[test]
    fn test_author_prefers_dc_creator() {
        let post = normalize(&item(
            "<item><author>mail@example.com (Mail)</author><dc:creator>Creator</dc:creator></item>",
        ));
        assert_eq!(post.author, "Creator");

        let post = normalize(&item("<item><author>Plain Author</author></item>"));
        assert_eq!(post.author, "Plain Author");
    }

    #[test]
    fn test_title_markup_only_defaults() {
        let post = normalize(&item("<item><title><![CDATA[<br/>]]></title></item>"));
        assert_eq!(post.title, DEFAULT_TITLE);
    }

    #[test]
    fn test_long_title_capped() {
        let raw = RawItem {
            title: "t".repeat(2000),
            ..RawItem::default()
        };
        assert_eq!(normalize(&raw).title.chars().count(), MAX_TEXT_CHARS);
    }

    #[test]
    fn test_empty_categories_dropped_duplicates_kept() {
        let post = normalize(&item(
            "<item><category>Go</category><category> </category><category>Go</category></item>",
        ));
        assert_eq!(post.categories, ["Go", "Go"]);
    }

    #[test]
    fn test_thumbnail_priority_media_first() {
        let post = normalize(&item(
            r#"<item>
                <media:thumbnail url="https://cdn.test/media.jpg"/>
                <enclosure url="https://cdn.test/enc.jpg" type="image/jpeg"/>
                <description><![CDATA[<img src="https://cdn.test/inline.jpg">]]></description>
            </item>"#,
        ));
        assert_eq!(post.thumbnail_url.as_deref(), Some("https://cdn.test/media.jpg"));
    }

    #[test]
    fn test_thumbnail_enclosure_requires_image_type() {
        let post = normalize(&item(
            r#"<item>
                <enclosure url="https://cdn.test/episode.mp3" type="audio/mpeg"/>
                <description><![CDATA[<p><img src="https://cdn.test/inline.jpg"></p>]]></description>
            </item>"#,
        ));
        assert_eq!(post.thumbnail_url.as_deref(), Some("https://cdn.test/inline.jpg"));

        let post = normalize(&item(
            r#"<item><enclosure url="https://cdn.test/cover.png" type="image/png"/></item>"#,
        ));
        assert_eq!(post.thumbnail_url.as_deref(), Some("https://cdn.test/cover.png"));
    }

    #[test]
    fn test_thumbnail_skips_unsafe_urls() {
        let post = normalize(&item(
            r#"<item><media:thumbnail url="javascript:alert(1)"/></item>"#,
        ));
        assert_eq!(post.thumbnail_url, None);
    }

    #[test]
    fn test_body_falls_back_to_content_encoded() {
        let post = normalize(&item(
            "<item><content:encoded><![CDATA[<p>Full body</p>]]></content:encoded></item>",
        ));
        assert_eq!(post.content, "<p>Full body</p>");
        assert_eq!(post.excerpt, "Full body");
    }

    #[test]
    fn test_json_item() {
        let value = json!({
            "title": "Hex Appeal",
            "pubDate": "2025-05-23 08:00:00",
            "link": "https://journal.example.com/hex/",
            "guid": "https://journal.example.com/?p=7",
            "author": "Ishaan",
            "thumbnail": "",
            "description": "<p>Understanding the adversary.</p>",
            "content": "<p>Understanding the adversary.</p><img src=\"https://cdn.test/hex.jpg\">",
            "enclosure": {},
            "categories": ["Malware Analysis", 3, "Static Analysis"]
        });
        let post = normalize(&RawItem::from_json(&value));

        assert_eq!(post.title, "Hex Appeal");
        assert_eq!(post.id, "https://journal.example.com/?p=7");
        assert_eq!(post.excerpt, "Understanding the adversary.");
        assert!(post.content.contains("<img"));
        assert_eq!(post.categories, ["Malware Analysis", "Static Analysis"]);
        assert_eq!(post.thumbnail_url.as_deref(), Some("https://cdn.test/hex.jpg"));
    }

    #[test]
    fn test_json_non_object_degrades_to_defaults() {
        let post = normalize(&RawItem::from_json(&json!("not an item")));
        assert_eq!(post.title, DEFAULT_TITLE);
        assert_eq!(post.author, DEFAULT_AUTHOR);
        assert_eq!(post.excerpt, NO_EXCERPT);
    }

    #[test]
    fn test_json_explicit_excerpt_preferred() {
        let value = json!({"excerpt": "Short summary", "description": "Long description"});
        assert_eq!(normalize(&RawItem::from_json(&value)).excerpt, "Short summary");
    }

    #[test]
    fn test_json_long_summary_capped_like_derived_excerpt() {
        let long = "word ".repeat(100);
        let from_summary = normalize(&RawItem::from_json(&json!({ "summary": long })));
        let from_body = normalize(&RawItem::from_json(&json!({ "description": long })));

        assert_eq!(from_summary.excerpt, from_body.excerpt);
        assert!(from_summary.excerpt.ends_with("..."));
        assert_eq!(from_summary.excerpt.chars().count(), EXCERPT_CHARS + 3);
    }

    #[test]
    fn test_pub_date_markup_stripped() {
        let post = normalize(&item(
            "<item><pubDate><![CDATA[<script>alert(1)</script>]]></pubDate></item>",
        ));
        assert!(!post.published_at.contains('<'));
        assert_eq!(post.published_at, "alert(1)");
    }

    #[test]
    fn test_pub_date_written_as_rfc3339() {
        let post = normalize(&item(
            "<item><pubDate><![CDATA[ <b>Fri, 23 May 2025 08:00:00 +0200</b> ]]></pubDate></item>",
        ));
        assert_eq!(post.published_at, "2025-05-23T06:00:00Z");

        let post = normalize(&RawItem::from_json(&json!({ "pubDate": "2025-05-23 08:00:00" })));
        assert_eq!(post.published_at, "2025-05-23T08:00:00Z");
    }

    #[test]
    fn test_pub_date_capped() {
        let raw = RawItem {
            published: "x".repeat(2000),
            ..RawItem::default()
        };
        assert_eq!(normalize(&raw).published_at.chars().count(), MAX_TEXT_CHARS);
    }

    #[test]
    fn test_json_and_xml_paths_agree() {
        let xml = item(
            r#"<item><title>Same</title><link>https://example.com/same</link>
            <description>Body text</description><category>A</category></item>"#,
        );
        let json = RawItem::from_json(&json!({
            "title": "Same",
            "link": "https://example.com/same",
            "description": "Body text",
            "categories": ["A"]
        }));
        assert_eq!(normalize(&xml), normalize(&json));
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let raw = item("<item><title>x</title></item>");
        assert_eq!(normalize(&raw), normalize(&raw));
    }
}
