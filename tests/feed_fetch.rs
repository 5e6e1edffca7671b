// HTTP contract tests for feed fetching and sink delivery

#[cfg(test)]
mod tests {
    use feedpipe::config::{FeedsConfig, SinkConfig};
    use feedpipe::feed::types::FeedItem;
    use feedpipe::feed::{FeedError, FeedSource, RssFeed};
    use feedpipe::publish::Credential;
    use feedpipe::sink::{DeliveryReport, HttpCollectionSink, ItemSink};
    use serde_json::json;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>HUD User Publications</title>
    <link>https://www.huduser.gov</link>
    <item>
      <title>Worst Case Housing Needs</title>
      <link>https://www.huduser.gov/portal/publications/wcn.html</link>
      <pubDate>Tue, 03 Mar 2026 14:00:00 GMT</pubDate>
      <category>Research</category>
      <description><![CDATA[<p><img src="https://www.huduser.gov/img/wcn.png"/>Report to Congress.</p>]]></description>
    </item>
    <item>
      <title>Fair Market Rents</title>
      <link>https://www.huduser.gov/portal/datasets/fmr.html</link>
      <pubDate>Mon, 02 Mar 2026 09:00:00 GMT</pubDate>
      <media:thumbnail url="https://www.huduser.gov/img/fmr.jpg"/>
    </item>
  </channel>
</rss>"#;

    fn item(title: &str, link: &str) -> FeedItem {
        FeedItem {
            title: title.into(),
            link: link.into(),
            published_date: "Mon, 02 Mar 2026 09:00:00 GMT".into(),
            description: "Summary".into(),
            image_url: None,
            category: "Research".into(),
        }
    }

    fn sink_config(server: &MockServer) -> SinkConfig {
        let mut headers = BTreeMap::new();
        headers.insert("wix-site-id".to_string(), "site-123".to_string());
        SinkConfig {
            url: format!("{}/items", server.uri()),
            token_env: "UNUSED".into(),
            headers,
            request_timeout_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn test_fetch_parses_rss_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss.xml"))
            .and(header("user-agent", "Mozilla/5.0"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(RSS, "application/rss+xml"))
            .expect(1)
            .mount(&server)
            .await;

        let feed = RssFeed::new(&FeedsConfig::default()).unwrap();
        let entries = feed
            .fetch_entries(&format!("{}/rss.xml", server.uri()))
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Worst Case Housing Needs");
        assert_eq!(entries[0].category, "Research");
        assert_eq!(
            entries[0].image_url.as_deref(),
            Some("https://www.huduser.gov/img/wcn.png")
        );
        assert_eq!(
            entries[1].image_url.as_deref(),
            Some("https://www.huduser.gov/img/fmr.jpg")
        );
    }

    #[tokio::test]
    async fn test_fetch_non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let feed = RssFeed::new(&FeedsConfig::default()).unwrap();
        let err = feed
            .fetch_entries(&format!("{}/gone.xml", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Status { status, .. } if status.as_u16() == 404));
    }

    #[tokio::test]
    async fn test_sink_posts_each_item_with_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items"))
            .and(header("authorization", "sink-token"))
            .and(header("wix-site-id", "site-123"))
            .and(body_partial_json(json!({ "featured": false, "category": "Research" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(2)
            .mount(&server)
            .await;

        let sink = HttpCollectionSink::new(&sink_config(&server), Some(&Credential::new("sink-token"))).unwrap();
        let report = sink
            .deliver(&[item("One", "https://x/1"), item("Two", "https://x/2")])
            .await;
        assert_eq!(report, DeliveryReport { sent: 2, failed: 0 });
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_remaining_items() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "link": "https://x/1" })))
            .respond_with(ResponseTemplate::new(500).set_body_string("collection unavailable"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sink = HttpCollectionSink::new(&sink_config(&server), None).unwrap();
        let report = sink
            .deliver(&[
                item("One", "https://x/1"),
                item("Two", "https://x/2"),
                item("Three", "https://x/3"),
            ])
            .await;
        assert_eq!(report, DeliveryReport { sent: 2, failed: 1 });
    }
}
