//! Bundled posts shown when no live feed data can be obtained.

use crate::feed::CanonicalPost;

/// The journal feed these posts mirror.
pub const JOURNAL_FEED_URL: &str = "https://journal.ishaansrv.com/feed/";

const AUTHOR: &str = "Ishaan Srivastava";

struct FallbackEntry {
    title: &'static str,
    published_at: &'static str,
    excerpt: &'static str,
    link: &'static str,
    image: &'static str,
    tags: [&'static str; 3],
}

const ENTRIES: [FallbackEntry; 3] = [
    FallbackEntry {
        title: "Static Code Analysis",
        published_at: "2025-07-05T00:00:00Z",
        excerpt: "Imagine you're trying to understand how a complex clock works, but you can't actually wind it up or let its gears turn. This is like static analysis in cybersecurity - examining software without running it.",
        link: "https://journal.ishaansrv.com/2025/07/05/static-code-analysis/",
        image: "blog-static-code-analysis.png",
        tags: ["Static Analysis", "Reverse Engineering", "Cybersecurity"],
    },
    FallbackEntry {
        title: "Hex Appeal Part 1: Unraveling the Art of Malware Analysis",
        published_at: "2025-05-23T00:00:00Z",
        excerpt: "Understanding how the adversary operates is paramount to mounting a proper defense. Malware analysis is a deep technical investigation into the heart of malicious code - a craft demanding skill and dedication.",
        link: "https://journal.ishaansrv.com/2025/05/23/hex-appeal-part-1-unraveling-the-art-of-malware-analysis/",
        image: "blog-hex-appeal.jpg",
        tags: ["Malware Analysis", "Static Analysis", "Dynamic Analysis"],
    },
    FallbackEntry {
        title: "Introducing you to Threat Hunting",
        published_at: "2025-03-30T00:00:00Z",
        excerpt: "Threat Hunting is proactive and rigorously looking after threats in your environment. Learn how to establish effective threat hunting with the right data, baseline understanding, and hypothesis development.",
        link: "https://journal.ishaansrv.com/2025/03/30/introducing-you-to-threat-hunting/",
        image: "blog-threat-hunting.png",
        tags: ["Threat Hunting", "MITRE ATT&CK", "Proactive Defense"],
    },
];

/// The static fallback set, newest first.
///
/// Posts use their article URL as id and carry the excerpt as content. Their
/// images are bundled asset names, held in `bundled_image`.
pub fn static_fallback_posts() -> Vec<CanonicalPost> {
    ENTRIES
        .iter()
        .map(|entry| CanonicalPost {
            id: entry.link.to_string(),
            title: entry.title.to_string(),
            excerpt: entry.excerpt.to_string(),
            content: entry.excerpt.to_string(),
            link: entry.link.to_string(),
            published_at: entry.published_at.to_string(),
            author: AUTHOR.to_string(),
            categories: entry.tags.iter().map(|t| t.to_string()).collect(),
            thumbnail_url: None,
            bundled_image: Some(entry.image.to_string()),
        })
        .collect()
}

/// Gives every post without a thumbnail one of the bundled images, cycling
/// through them by position.
pub fn assign_default_images(posts: &mut [CanonicalPost]) {
    for (index, post) in posts.iter_mut().enumerate() {
        if post.thumbnail_url.is_none() && post.bundled_image.is_none() {
            post.bundled_image = Some(ENTRIES[index % ENTRIES.len()].image.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_posts_newest_first() {
        let posts = static_fallback_posts();
        assert_eq!(posts.len(), 3);

        let dates: Vec<_> = posts
            .iter()
            .map(|p| p.published_timestamp().unwrap())
            .collect();
        assert!(dates.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_posts_are_complete() {
        for post in static_fallback_posts() {
            assert!(!post.title.is_empty());
            assert!(post.link.starts_with("https://journal.ishaansrv.com/"));
            assert_eq!(post.author, AUTHOR);
            assert_eq!(post.categories.len(), 3);
            assert_eq!(post.thumbnail_url, None);
            assert!(post.bundled_image.is_some());
        }
    }

    #[test]
    fn test_default_images_cycle_by_position() {
        let mut posts = static_fallback_posts();
        posts.extend(static_fallback_posts());
        for post in &mut posts {
            post.bundled_image = None;
        }
        posts[1].thumbnail_url = Some("https://cdn.test/own.jpg".to_string());

        assign_default_images(&mut posts);

        let images: Vec<_> = posts.iter().map(|p| p.bundled_image.as_deref()).collect();
        assert_eq!(
            images,
            [
                Some("blog-static-code-analysis.png"),
                None,
                Some("blog-threat-hunting.png"),
                Some("blog-static-code-analysis.png"),
                Some("blog-hex-appeal.jpg"),
                Some("blog-threat-hunting.png"),
            ]
        );
    }
}
