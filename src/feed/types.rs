use serde::{Deserialize, Serialize};

pub const UNTITLED: &str = "No Title";

/// Normalized entry parsed from an RSS `<item>` or Atom `<entry>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published: String,
    pub description: String,
    pub category: String,
    pub image_url: Option<String>,
}

/// Identity used for dedup across runs: the link, or the title for linkless entries.
pub fn dedup_key<'a>(link: &'a str, title: &'a str) -> &'a str {
    if link.is_empty() {
        title
    } else {
        link
    }
}

impl FeedEntry {
    pub fn dedup_key(&self) -> &str {
        dedup_key(&self.link, &self.title)
    }
}

/// Persisted form of an entry inside the state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub published_date: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub category: String,
}

impl FeedItem {
    pub fn dedup_key(&self) -> &str {
        dedup_key(&self.link, &self.title)
    }
}

impl From<FeedEntry> for FeedItem {
    fn from(entry: FeedEntry) -> Self {
        Self {
            title: entry.title,
            link: entry.link,
            published_date: entry.published,
            description: entry.description,
            image_url: entry.image_url,
            category: entry.category,
        }
    }
}

/// Contents of the state file: everything seen so far, newest batch first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedState {
    #[serde(default)]
    pub items: Vec<FeedItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, link: &str) -> FeedEntry {
        FeedEntry {
            title: title.into(),
            link: link.into(),
            published: String::new(),
            description: String::new(),
            category: String::new(),
            image_url: None,
        }
    }

    #[test]
    fn test_entry_and_item_share_dedup_key() {
        for e in [entry("Notice", "https://x/1"), entry("Notice", "")] {
            let key = e.dedup_key().to_string();
            assert_eq!(FeedItem::from(e).dedup_key(), key);
        }
        assert_eq!(entry("Notice", "").dedup_key(), "Notice");
        assert_eq!(entry("Notice", "https://x/1").dedup_key(), "https://x/1");
    }
}
