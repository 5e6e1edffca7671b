//! Optional delivery of newly found items to an HTTP collection endpoint.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::config::SinkConfig;
use crate::feed::types::FeedItem;
use crate::publish::Credential;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

#[async_trait]
pub trait ItemSink: Send + Sync {
    /// Deliver items one by one. Individual failures are counted, never raised.
    async fn deliver(&self, items: &[FeedItem]) -> DeliveryReport;
}

/// Body posted for each item.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPayload<'a> {
    pub title: &'a str,
    pub summary: &'a str,
    pub image: &'a str,
    pub link: &'a str,
    pub category: &'a str,
    pub published_date: &'a str,
    pub featured: bool,
}

impl<'a> From<&'a FeedItem> for CollectionPayload<'a> {
    fn from(item: &'a FeedItem) -> Self {
        Self {
            title: &item.title,
            summary: &item.description,
            image: item.image_url.as_deref().unwrap_or(""),
            link: &item.link,
            category: &item.category,
            published_date: &item.published_date,
            featured: false,
        }
    }
}

pub struct HttpCollectionSink {
    client: Client,
    url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("invalid sink header {name:?}")]
    Header { name: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl HttpCollectionSink {
    pub fn new(config: &SinkConfig, token: Option<&Credential>) -> Result<Self, SinkError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| SinkError::Header { name: name.clone() })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| SinkError::Header { name: name.clone() })?;
            headers.insert(header_name, header_value);
        }
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(token.expose())
                .map_err(|_| SinkError::Header { name: AUTHORIZATION.to_string() })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl ItemSink for HttpCollectionSink {
    async fn deliver(&self, items: &[FeedItem]) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for item in items {
            let payload = CollectionPayload::from(item);
            let result = self.client.post(&self.url).json(&payload).send().await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    report.sent += 1;
                    tracing::debug!(title = %item.title, "delivered item");
                }
                Ok(resp) => {
                    report.failed += 1;
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    tracing::warn!(title = %item.title, %status, body = %body, "sink rejected item");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(title = %item.title, error = %e, "failed to send item to sink");
                }
            }
        }

        tracing::info!(sent = report.sent, failed = report.failed, "sink delivery finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let item = FeedItem {
            title: "Rates update".into(),
            link: "https://example.gov/rates".into(),
            published_date: "Mon, 02 Mar 2026 10:00:00 GMT".into(),
            description: "Rates moved.".into(),
            image_url: None,
            category: "Finance".into(),
        };
        let json = serde_json::to_value(CollectionPayload::from(&item)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "title": "Rates update",
                "summary": "Rates moved.",
                "image": "",
                "link": "https://example.gov/rates",
                "category": "Finance",
                "publishedDate": "Mon, 02 Mar 2026 10:00:00 GMT",
                "featured": false
            })
        );
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut config = SinkConfig {
            url: "https://collections.example/items".into(),
            token_env: "UNUSED".into(),
            headers: Default::default(),
            request_timeout_ms: 1000,
        };
        config.headers.insert("bad header".into(), "x".into());
        assert!(matches!(
            HttpCollectionSink::new(&config, None),
            Err(SinkError::Header { .. })
        ));
    }
}
