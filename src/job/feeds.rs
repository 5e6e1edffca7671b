use async_trait::async_trait;
use std::collections::HashSet;

use super::{JobError, JobRunner, JobSummary};
use crate::config::FeedsConfig;
use crate::feed::types::{FeedItem, FeedState};
use crate::feed::FeedSource;
use crate::sink::ItemSink;
use crate::store::{LocalDataStore, WriteOutcome};

/// Built-in job: poll feeds, keep unseen entries, persist them, hand them to the sink.
pub struct FeedJob {
    source: Box<dyn FeedSource>,
    urls: Vec<String>,
    max_entries_per_feed: usize,
    max_retained_items: usize,
    output_file: String,
    sink: Option<Box<dyn ItemSink>>,
}

impl FeedJob {
    pub fn new(source: Box<dyn FeedSource>, config: &FeedsConfig) -> Self {
        Self {
            source,
            urls: config.urls.clone(),
            max_entries_per_feed: config.max_entries_per_feed,
            max_retained_items: config.max_retained_items,
            output_file: config.output_file.clone(),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn ItemSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Fetch every feed in order and return entries not in `seen`.
    /// A failing feed is logged and contributes nothing.
    async fn collect_new(&self, seen: &mut HashSet<String>) -> (Vec<FeedItem>, usize) {
        let mut new_items = Vec::new();
        let mut failed = 0;

        for url in &self.urls {
            tracing::info!(feed = %url, "fetching feed");
            let entries = match self.source.fetch_entries(url).await {
                Ok(entries) => entries,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(feed = %url, error = %e, "feed fetch failed");
                    continue;
                }
            };

            let before = new_items.len();
            for entry in entries.into_iter().take(self.max_entries_per_feed) {
                if seen.insert(entry.dedup_key().to_string()) {
                    new_items.push(FeedItem::from(entry));
                }
            }
            tracing::debug!(feed = %url, new = new_items.len() - before, "feed processed");
        }

        (new_items, failed)
    }
}

#[async_trait]
impl JobRunner for FeedJob {
    async fn run(&self, store: &LocalDataStore) -> Result<JobSummary, JobError> {
        // Read first: a corrupt state file aborts before any network traffic.
        let state: FeedState = store.read_state(&self.output_file)?.unwrap_or_default();
        let mut seen: HashSet<String> = state
            .items
            .iter()
            .map(|item| item.dedup_key().to_string())
            .collect();

        let (new_items, feeds_failed) = self.collect_new(&mut seen).await;
        tracing::info!(new = new_items.len(), known = state.items.len(), "found new items");
        if feeds_failed == self.urls.len() && !self.urls.is_empty() {
            tracing::warn!(feeds = feeds_failed, "every feed failed this run");
        }

        let mut items = new_items.clone();
        items.extend(state.items);
        items.truncate(self.max_retained_items);
        let retained_items = items.len();

        let outcome = store.write_state(&self.output_file, &FeedState { items })?;

        let delivery = match (&self.sink, new_items.is_empty()) {
            (Some(sink), false) => Some(sink.deliver(&new_items).await),
            _ => None,
        };

        Ok(JobSummary {
            feeds_total: self.urls.len(),
            feeds_failed,
            new_items: new_items.len(),
            retained_items,
            state_written: outcome == WriteOutcome::Written,
            delivery,
        })
    }
}
