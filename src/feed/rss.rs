use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::parser::parse_feed;
use super::types::FeedEntry;
use super::{FeedError, FeedSource};
use crate::config::FeedsConfig;

/// Fetches RSS/Atom documents over HTTP.
pub struct RssFeed {
    client: Client,
}

impl RssFeed {
    pub fn new(config: &FeedsConfig) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FeedSource for RssFeed {
    async fn fetch_entries(&self, url: &str) -> Result<Vec<FeedEntry>, FeedError> {
        tracing::debug!(feed = %url, "fetching feed");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                url: url.to_string(),
                status,
            });
        }

        let bytes = response.bytes().await?;
        let entries = parse_feed(&bytes)?;

        tracing::debug!(feed = %url, count = entries.len(), "parsed feed");
        Ok(entries)
    }
}
