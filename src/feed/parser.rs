use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::types::{FeedEntry, UNTITLED};
use super::FeedError;

/// Parse an RSS 2.0 or Atom document into entries, in document order.
pub fn parse_feed(xml: &[u8]) -> Result<Vec<FeedEntry>, FeedError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();

    // Element names from the document root down to the current element.
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<(usize, EntryBuilder)> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = element_name(&e);
                if current.is_none() && (name == "item" || name == "entry") {
                    current = Some((stack.len(), EntryBuilder::default()));
                } else if let Some((_, builder)) = current.as_mut() {
                    builder.read_attributes(&name, &e);
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                if let Some((_, builder)) = current.as_mut() {
                    builder.read_attributes(&element_name(&e), &e);
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
                if current.as_ref().is_some_and(|(depth, _)| *depth == stack.len()) {
                    if let Some((_, builder)) = current.take() {
                        entries.push(builder.build());
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let text = match e.unescape() {
                    Ok(t) => t.into_owned(),
                    // Unknown HTML entities (&nbsp; and friends) are kept verbatim.
                    Err(_) => String::from_utf8_lossy(&e).into_owned(),
                };
                push_field_text(&mut current, &stack, &text);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                push_field_text(&mut current, &stack, &text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FeedError::Parse(format!(
                    "XML parse error at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn element_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart, key: &str) -> Option<String> {
    e.try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Text only counts when it sits directly under the entry element.
fn push_field_text(current: &mut Option<(usize, EntryBuilder)>, stack: &[String], text: &str) {
    let Some((depth, builder)) = current.as_mut() else { return };
    if stack.len() != *depth + 2 || text.is_empty() {
        return;
    }
    if let Some(field) = stack.last() {
        builder.append(field, text);
    }
}

#[derive(Default)]
struct EntryBuilder {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    content_encoded: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    pub_date: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    dc_date: Option<String>,
    category: Option<String>,
    categories_seen: usize,
    enclosure_image: Option<String>,
    media_image: Option<String>,
}

impl EntryBuilder {
    fn append(&mut self, field: &str, text: &str) {
        let slot = match field {
            "title" => &mut self.title,
            "link" => &mut self.link,
            "description" => &mut self.description,
            "content:encoded" => &mut self.content_encoded,
            "summary" => &mut self.summary,
            "content" => &mut self.content,
            "pubDate" => &mut self.pub_date,
            "published" => &mut self.published,
            "updated" => &mut self.updated,
            "dc:date" => &mut self.dc_date,
            // Only the first category is kept.
            "category" if self.categories_seen <= 1 => &mut self.category,
            _ => return,
        };
        slot.get_or_insert_with(String::new).push_str(text);
    }

    fn read_attributes(&mut self, name: &str, e: &BytesStart) {
        match name {
            // Atom: <link rel="alternate" href="..."/>
            "link" if self.link.is_none() => {
                let rel = attribute(e, "rel");
                if rel.as_deref().is_none_or(|r| r == "alternate") {
                    self.link = attribute(e, "href");
                }
            }
            "category" => {
                self.categories_seen += 1;
                if self.categories_seen == 1 {
                    self.category = attribute(e, "term");
                }
            }
            "enclosure" if self.enclosure_image.is_none() => {
                let is_image = attribute(e, "type").is_some_and(|t| t.starts_with("image/"));
                if is_image {
                    self.enclosure_image = attribute(e, "url");
                }
            }
            "media:thumbnail" | "media:content" if self.media_image.is_none() => {
                let medium = attribute(e, "medium");
                let mime = attribute(e, "type");
                let looks_like_image = name == "media:thumbnail"
                    || medium.as_deref() == Some("image")
                    || mime.is_some_and(|t| t.starts_with("image/"));
                if looks_like_image {
                    self.media_image = attribute(e, "url");
                }
            }
            _ => {}
        }
    }

    fn build(self) -> FeedEntry {
        let description = first_non_empty([
            self.description,
            self.content_encoded,
            self.summary,
            self.content,
        ]);
        let image_url = extract_image_url(&description)
            .or(self.enclosure_image)
            .or(self.media_image);

        let mut title = first_non_empty([self.title]).trim().to_string();
        if title.is_empty() {
            title = UNTITLED.to_string();
        }

        FeedEntry {
            title,
            link: first_non_empty([self.link]).trim().to_string(),
            published: first_non_empty([self.pub_date, self.published, self.updated, self.dc_date])
                .trim()
                .to_string(),
            category: first_non_empty([self.category]).trim().to_string(),
            description: description.trim().to_string(),
            image_url,
        }
    }
}

fn first_non_empty<const N: usize>(candidates: [Option<String>; N]) -> String {
    candidates
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .unwrap_or_default()
}

/// First `<img ... src="...">` inside an HTML fragment.
pub fn extract_image_url(html: &str) -> Option<String> {
    let mut rest = html;
    while let Some(start) = rest.find("<img") {
        let tag = &rest[start + 4..];
        let tag = &tag[..tag.find('>').unwrap_or(tag.len())];

        if let Some(pos) = tag.find("src=") {
            let value = &tag[pos + 4..];
            if let Some(quote) = value.chars().next().filter(|c| *c == '"' || *c == '\'') {
                let value = &value[1..];
                if let Some(end) = value.find(quote) {
                    let url = value[..end].trim();
                    if !url.is_empty() {
                        return Some(url.to_string());
                    }
                }
            }
        }
        rest = &rest[start + 4..];
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Housing News</title>
    <link>https://example.gov/</link>
    <item>
      <title>Rates update</title>
      <link>https://example.gov/rates</link>
      <description><![CDATA[<p><img class="lead" src="https://example.gov/img/rates.png" /> Rates moved.</p>]]></description>
      <pubDate>Mon, 02 Mar 2026 10:00:00 GMT</pubDate>
      <category>Finance</category>
      <category>Ignored</category>
    </item>
    <item>
      <link>https://example.gov/untitled</link>
      <description>Plain &amp; simple</description>
      <dc:date>2026-03-01T08:00:00Z</dc:date>
      <source url="https://elsewhere.example/rss">Elsewhere</source>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:media="http://search.yahoo.com/mrss/">
  <title>Appraisal blog</title>
  <link href="https://blog.example/"/>
  <entry>
    <title>Market outlook</title>
    <link rel="self" href="https://blog.example/self/1"/>
    <link rel="alternate" href="https://blog.example/posts/1"/>
    <updated>2026-03-03T12:00:00Z</updated>
    <summary>Quarterly outlook</summary>
    <category term="market"/>
    <media:thumbnail url="https://blog.example/thumb.jpg"/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_items() {
        let entries = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.title, "Rates update");
        assert_eq!(first.link, "https://example.gov/rates");
        assert_eq!(first.published, "Mon, 02 Mar 2026 10:00:00 GMT");
        assert_eq!(first.category, "Finance");
        assert_eq!(first.image_url.as_deref(), Some("https://example.gov/img/rates.png"));
        assert!(first.description.contains("Rates moved."));
    }

    #[test]
    fn test_missing_title_defaults_and_nested_elements_ignored() {
        let entries = parse_feed(RSS.as_bytes()).unwrap();
        let second = &entries[1];
        assert_eq!(second.title, UNTITLED);
        assert_eq!(second.description, "Plain & simple");
        assert_eq!(second.published, "2026-03-01T08:00:00Z");
        assert_eq!(second.link, "https://example.gov/untitled");
        assert!(second.image_url.is_none());
        assert_eq!(second.category, "");
    }

    #[test]
    fn test_parse_atom_entry() {
        let entries = parse_feed(ATOM.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.title, "Market outlook");
        assert_eq!(entry.link, "https://blog.example/posts/1");
        assert_eq!(entry.published, "2026-03-03T12:00:00Z");
        assert_eq!(entry.description, "Quarterly outlook");
        assert_eq!(entry.category, "market");
        assert_eq!(entry.image_url.as_deref(), Some("https://blog.example/thumb.jpg"));
    }

    #[test]
    fn test_enclosure_image_fallback() {
        let xml = r#"<rss><channel><item>
            <title>Pic</title><link>https://x.example/1</link>
            <enclosure url="https://x.example/a.mp3" type="audio/mpeg"/>
            <enclosure url="https://x.example/a.jpg" type="image/jpeg"/>
        </item></channel></rss>"#;
        let entries = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(entries[0].image_url.as_deref(), Some("https://x.example/a.jpg"));
    }

    #[test]
    fn test_document_without_items() {
        let entries = parse_feed(b"<rss><channel><title>Empty</title></channel></rss>").unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_malformed_xml_is_parse_error() {
        let err = parse_feed(b"<rss><channel><item><title>x</channel></rss>").unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));
    }

    #[test]
    fn test_extract_image_url() {
        assert_eq!(
            extract_image_url(r#"<img src='https://a.example/x.png'>"#).as_deref(),
            Some("https://a.example/x.png")
        );
        assert_eq!(
            extract_image_url(r#"<p>text</p><img alt="a" src="https://a.example/y.gif" />"#).as_deref(),
            Some("https://a.example/y.gif")
        );
        assert_eq!(extract_image_url(r#"<img alt="none">"#), None);
        assert_eq!(extract_image_url("no images here"), None);
    }
}
