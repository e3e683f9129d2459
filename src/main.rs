use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use journal_feed::cache::{FeedCache, FeedSnapshot};
use journal_feed::config::Config;
use journal_feed::feed::{build_http_client, fetch_multiple, CanonicalPost, FeedFetcher};

#[derive(Parser, Debug)]
#[command(
    name = "journal-feed",
    version,
    about = "Fetch, sanitize and print blog posts from RSS feeds"
)]
struct Args {
    /// Config file (TOML). Missing file means defaults.
    #[arg(long, value_name = "FILE", default_value = "journal-feed.toml")]
    config: PathBuf,

    /// Feed URL to load; repeat for several. Overrides configured feeds.
    #[arg(long = "feed", value_name = "URL")]
    feeds: Vec<String>,

    /// Maximum number of posts to print
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Print posts as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if !args.feeds.is_empty() {
        config.feeds = args.feeds.clone();
    }
    if config.feeds.is_empty() {
        anyhow::bail!("No feeds configured: pass --feed <URL> or set `feeds` in the config file");
    }
    tracing::debug!(config = ?config, "Effective configuration");

    let settings = config.fetch_settings();
    let client = build_http_client(settings.timeout).context("Failed to build HTTP client")?;
    let strategies = config
        .build_strategies()
        .context("Invalid strategy configuration")?;
    let fetcher = FeedFetcher::new(client, strategies, settings);

    if let [feed_url] = config.feeds.as_slice() {
        let cache = FeedCache::new(Arc::new(fetcher), config.cache_settings());
        let snapshot = cache.posts(feed_url, args.limit).await;
        report_snapshot(&snapshot);
        print_posts(&snapshot.posts, args.json)?;
        return Ok(());
    }

    let merged = fetch_multiple(&fetcher, &config.feeds)
        .await
        .context("Every configured feed failed")?;
    for failed in merged.failed_feeds() {
        eprintln!(
            "warning: {} failed: {}",
            failed.feed_url,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }

    let limit = args.limit.unwrap_or(usize::MAX);
    let posts: Vec<CanonicalPost> = merged.posts.into_iter().take(limit).collect();
    print_posts(&posts, args.json)
}

fn report_snapshot(snapshot: &FeedSnapshot) {
    if snapshot.using_live_feed {
        return;
    }
    eprintln!(
        "warning: {} is unavailable ({}); showing bundled posts",
        snapshot.feed_url,
        snapshot.error.as_deref().unwrap_or("no data")
    );
}

fn print_posts(posts: &[CanonicalPost], json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(posts).context("Failed to serialize posts")?;
        println!("{out}");
        return Ok(());
    }

    for post in posts {
        println!("{}", post.title);
        println!(
            "  {} · {} · {} min read",
            post.published_at,
            post.author,
            post.read_time_minutes()
        );
        if !post.tags().is_empty() {
            println!("  [{}]", post.tags().join(", "));
        }
        if !post.link.is_empty() {
            println!("  {}", post.link);
        }
        println!("  {}", post.excerpt);
        println!();
    }
    Ok(())
}
