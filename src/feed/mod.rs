pub mod parser;
pub mod rss;
pub mod types;

use async_trait::async_trait;
use types::FeedEntry;

pub use rss::RssFeed;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} when fetching {url}")]
    Status { url: String, status: reqwest::StatusCode },

    #[error("Failed to parse feed: {0}")]
    Parse(String),
}

/// Anything that can turn a feed URL into entries, newest first as published.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_entries(&self, url: &str) -> Result<Vec<FeedEntry>, FeedError>;
}
