//! Generic RSS 2.0 / Atom item reader for blog feeds.
//!
//! Only the fields a digest needs are read: title, link, summary or content,
//! date, and author. Namespaced elements (`content:encoded`, `dc:creator`,
//! `dc:date`) are matched on their local name.

use chrono::{DateTime, Utc};
use paperfeeder_shared::{PaperFeederError, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// One `<item>` (RSS) or `<entry>` (Atom).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    /// `description`/`summary`, falling back to full content. May hold HTML.
    pub summary: String,
    pub published: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

#[derive(Default)]
struct ItemBuilder {
    title: String,
    link: String,
    summary: String,
    content: String,
    published: String,
    updated: String,
    author: String,
}

impl ItemBuilder {
    fn push_text(&mut self, path: &[Vec<u8>], text: &str) {
        let field = match path {
            [name] => match name.as_slice() {
                b"title" => &mut self.title,
                b"link" => &mut self.link,
                b"description" | b"summary" => &mut self.summary,
                b"content" | b"encoded" => &mut self.content,
                b"pubDate" | b"published" | b"issued" => &mut self.published,
                b"updated" | b"date" => &mut self.updated,
                b"author" | b"creator" => &mut self.author,
                _ => return,
            },
            [parent, child] if parent == b"author" && child == b"name" => &mut self.author,
            _ => return,
        };
        field.push_str(text);
    }

    /// Atom links carry the URL in `href`; the first alternate link wins.
    fn link_from_attrs(&mut self, tag: &BytesStart<'_>) {
        if !self.link.trim().is_empty() {
            return;
        }
        let mut href = None;
        let mut rel = None;
        for attr in tag.attributes().flatten() {
            let value = attr.unescape_value().map(|v| v.into_owned()).unwrap_or_default();
            match attr.key.local_name().as_ref() {
                b"href" => href = Some(value),
                b"rel" => rel = Some(value),
                _ => {}
            }
        }
        if let Some(href) = href.filter(|_| rel.as_deref().is_none_or(|r| r == "alternate")) {
            self.link = href;
        }
    }

    fn build(self) -> FeedItem {
        let summary = if self.summary.trim().is_empty() {
            self.content
        } else {
            self.summary
        };
        let published = parse_feed_date(self.published.trim())
            .or_else(|| parse_feed_date(self.updated.trim()));
        let author = Some(self.author.trim().to_string()).filter(|a| !a.is_empty());
        FeedItem {
            title: self.title.trim().to_string(),
            link: self.link.trim().to_string(),
            summary: summary.trim().to_string(),
            published,
            author,
        }
    }
}

fn is_item(name: &[u8]) -> bool {
    name == b"item" || name == b"entry"
}

/// Parse every item of an RSS or Atom document, in document order.
pub fn parse_items(xml: &str) -> Result<Vec<FeedItem>> {
    let mut reader = Reader::from_str(xml);
    let mut items = Vec::new();
    let mut current: Option<ItemBuilder> = None;
    // Elements open inside the current item.
    let mut path: Vec<Vec<u8>> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| PaperFeederError::parse(format!("feed XML: {e}")))?;
        match event {
            Event::Start(tag) => {
                let name = tag.local_name().as_ref().to_vec();
                match current.as_mut() {
                    None => {
                        if is_item(&name) {
                            current = Some(ItemBuilder::default());
                            path.clear();
                        }
                    }
                    Some(item) => {
                        if path.is_empty() && name == b"link" {
                            item.link_from_attrs(&tag);
                        }
                        path.push(name);
                    }
                }
            }
            Event::Empty(tag) => {
                if let Some(item) = current.as_mut() {
                    if path.is_empty() && tag.local_name().as_ref() == b"link" {
                        item.link_from_attrs(&tag);
                    }
                }
            }
            Event::Text(text) => {
                if let Some(item) = current.as_mut() {
                    let text = text
                        .unescape()
                        .map_err(|e| PaperFeederError::parse(format!("feed text: {e}")))?;
                    item.push_text(&path, &text);
                }
            }
            Event::CData(data) => {
                if let Some(item) = current.as_mut() {
                    let raw = data.into_inner();
                    item.push_text(&path, &String::from_utf8_lossy(&raw));
                }
            }
            Event::End(tag) => {
                if current.is_some() {
                    if path.is_empty() && is_item(tag.local_name().as_ref()) {
                        if let Some(item) = current.take() {
                            items.push(item.build());
                        }
                    } else {
                        path.pop();
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(items)
}

/// RSS uses RFC 2822 dates, Atom RFC 3339.
fn parse_feed_date(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
