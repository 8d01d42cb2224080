//! Minimal Atom feed reader for arXiv API responses.
//!
//! The arXiv feed is small, flat and machine-generated, so entries are located
//! by tag search rather than through a full XML parser.

use chrono::{DateTime, Utc};

/// One `<entry>` of an arXiv Atom feed.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomEntry {
    /// Versioned id, e.g. `2401.01234v2`.
    pub arxiv_id: String,
    pub abs_url: String,
    pub title: String,
    pub summary: String,
    pub authors: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub categories: Vec<String>,
    pub pdf_url: Option<String>,
}

/// Parse every well-formed entry of a feed. Malformed entries are skipped.
pub fn parse_feed(xml: &str) -> Vec<AtomEntry> {
    blocks(xml, "entry")
        .into_iter()
        .filter_map(|block| {
            let entry = parse_entry(block);
            if entry.is_none() {
                tracing::debug!("skipping malformed atom entry");
            }
            entry
        })
        .collect()
}

fn parse_entry(entry: &str) -> Option<AtomEntry> {
    let id_url = tag_text(entry, "id")?;
    let arxiv_id = arxiv_id_from_id_url(&id_url);
    let title = normalize_whitespace(&tag_text(entry, "title")?);
    if title.is_empty() {
        return None;
    }
    let summary = normalize_whitespace(&tag_text(entry, "summary").unwrap_or_default());

    let authors = blocks(entry, "author")
        .into_iter()
        .filter_map(|a| tag_text(a, "name"))
        .map(|n| normalize_whitespace(&n))
        .filter(|n| !n.is_empty())
        .collect();

    let published = tag_text(entry, "published")
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let categories = empty_tags(entry, "category")
        .into_iter()
        .filter_map(|t| attribute(t, "term"))
        .collect();

    let mut pdf_url = None;
    let mut abs_url = id_url.clone();
    for link in empty_tags(entry, "link") {
        let href = attribute(link, "href").unwrap_or_default();
        let title_attr = attribute(link, "title").unwrap_or_default();
        let link_type = attribute(link, "type").unwrap_or_default();
        if title_attr == "pdf" || link_type == "application/pdf" {
            pdf_url = Some(href);
        } else if link_type == "text/html" && href.contains("/abs/") {
            abs_url = href;
        }
    }

    Some(AtomEntry {
        arxiv_id,
        abs_url,
        title,
        summary,
        authors,
        published,
        categories,
        pdf_url,
    })
}

// ---------------------------------------------------------------------------
// Tag search helpers
// ---------------------------------------------------------------------------

/// All `<tag ...>...</tag>` blocks, in document order.
fn blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut from = 0;

    while let Some(pos) = xml[from..].find(&open) {
        let start = from + pos;
        // `<author` must not match `<authors`.
        let next = xml[start + open.len()..].chars().next();
        if !matches!(next, Some('>' | ' ' | '\n' | '\t' | '\r')) {
            from = start + open.len();
            continue;
        }
        let Some(end_pos) = xml[start..].find(&close) else {
            break;
        };
        let end = start + end_pos + close.len();
        out.push(&xml[start..end]);
        from = end;
    }
    out
}

/// All opening (usually self-closing) `<tag .../>` strings.
fn empty_tags<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag} ");
    let mut out = Vec::new();
    let mut from = 0;

    while let Some(pos) = xml[from..].find(&open) {
        let start = from + pos;
        let Some(end_pos) = xml[start..].find('>') else {
            break;
        };
        let end = start + end_pos + 1;
        out.push(&xml[start..end]);
        from = end;
    }
    out
}

/// Text content of the first `<tag>text</tag>`, entity-decoded and trimmed.
fn tag_text(xml: &str, tag: &str) -> Option<String> {
    let block = blocks(xml, tag).into_iter().next()?;
    let content_start = block.find('>')? + 1;
    let content_end = block.rfind("</")?;
    if content_end < content_start {
        return None;
    }
    Some(unescape_xml(block[content_start..content_end].trim()))
}

fn attribute(tag: &str, attr: &str) -> Option<String> {
    let search = format!(" {attr}=\"");
    let start = tag.find(&search)? + search.len();
    let end = tag[start..].find('"')? + start;
    Some(unescape_xml(&tag[start..end]))
}

/// Decode predefined entities and numeric character references. Text with a
/// malformed reference is kept as-is.
fn unescape_xml(s: &str) -> String {
    match quick_xml::escape::unescape(s) {
        Ok(text) => text.into_owned(),
        Err(_) => s.to_string(),
    }
}

/// `http://arxiv.org/abs/2401.01234v2` → `2401.01234v2`.
fn arxiv_id_from_id_url(url: &str) -> String {
    match url.rfind("/abs/") {
        Some(pos) => url[pos + 5..].to_string(),
        None => url.to_string(),
    }
}

/// Collapse runs of whitespace into single spaces.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRY: &str = r#"<entry>
    <id>http://arxiv.org/abs/2401.01234v2</id>
    <published>2024-01-02T18:00:00Z</published>
    <title>Diffusion Language Models
      Learn Latent Reasoning</title>
    <summary>  We study   diffusion &amp; reasoning.  </summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name></author>
    <link href="http://arxiv.org/abs/2401.01234v2" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2401.01234v2" rel="related" type="application/pdf"/>
    <arxiv:primary_category xmlns:arxiv="http://arxiv.org/schemas/atom" term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>"#;

    #[test]
    fn parses_all_entry_fields() {
        let feed = format!("<feed><title>ArXiv Query</title>{ENTRY}</feed>");
        let entries = parse_feed(&feed);
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.arxiv_id, "2401.01234v2");
        assert_eq!(e.title, "Diffusion Language Models Learn Latent Reasoning");
        assert_eq!(e.summary, "We study diffusion & reasoning.");
        assert_eq!(e.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(e.categories, vec!["cs.CL", "cs.LG"]);
        assert_eq!(e.pdf_url.as_deref(), Some("http://arxiv.org/pdf/2401.01234v2"));
        assert_eq!(
            e.published.map(|d| d.to_rfc3339()),
            Some("2024-01-02T18:00:00+00:00".to_string())
        );
    }

    #[test]
    fn feed_without_entries_is_empty() {
        assert!(parse_feed("<feed><title>ArXiv Query</title></feed>").is_empty());
    }

    #[test]
    fn entry_without_title_is_skipped() {
        let feed = "<feed><entry><id>http://arxiv.org/abs/1</id></entry></feed>";
        assert!(parse_feed(feed).is_empty());
    }

    #[test]
    fn decodes_numeric_character_references() {
        assert_eq!(unescape_xml("Don&#39;t &amp; won&#x2019;t"), "Don't & won\u{2019}t");
        assert_eq!(unescape_xml("a &#x2014; b &lt;c&gt;"), "a \u{2014} b <c>");
        assert_eq!(unescape_xml("broken &#xZZ; ref"), "broken &#xZZ; ref");
    }

    #[test]
    fn whitespace_is_normalized() {
        assert_eq!(normalize_whitespace("  a \n  b\tc "), "a b c");
    }
}
