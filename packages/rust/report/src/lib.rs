//! Digest rendering: standalone HTML, a plain-text alternative, and the
//! content fingerprint.
//!
//! All user-controlled text (titles, abstracts, model output) is escaped
//! before it reaches the HTML document.

use paperfeeder_shared::{PaperFeederError, Report, ReportSection, Result, RunMetadata};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

/// Email subject for a digest generated on `report`'s run date.
pub fn subject_line(report: &Report) -> String {
    format!("Daily Paper Digest - {}", report.metadata.window_end)
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct FingerprintInput<'a> {
    title: &'a str,
    metadata: &'a RunMetadata,
    highlights: &'a [ReportSection],
    sections: &'a [ReportSection],
}

/// Sections without their generated write-up.
fn deterministic(sections: &[ReportSection]) -> Vec<ReportSection> {
    sections
        .iter()
        .map(|s| ReportSection {
            analysis: None,
            ..s.clone()
        })
        .collect()
}

/// SHA-256 (hex) over title, metadata, highlights and sections.
///
/// The overview and per-section write-ups are excluded so a narrator outage
/// never changes the fingerprint of otherwise identical input.
pub fn fingerprint(
    title: &str,
    metadata: &RunMetadata,
    highlights: &[ReportSection],
    sections: &[ReportSection],
) -> Result<String> {
    let bytes = serde_json::to_vec(&FingerprintInput {
        title,
        metadata,
        highlights: &deterministic(highlights),
        sections: &deterministic(sections),
    })
    .map_err(|e| PaperFeederError::Conversion(format!("fingerprint serialization failed: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

const STYLE: &str = "body{font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,sans-serif;\
max-width:760px;margin:0 auto;padding:24px;color:#1f2328;line-height:1.55}\
h1{font-size:24px;margin-bottom:4px}.meta{color:#656d76;font-size:13px}\
.overview{background:#f6f8fa;border-left:4px solid #0969da;padding:12px 16px;margin:20px 0}\
.paper{border-top:1px solid #d0d7de;padding:16px 0}.paper h3{font-size:18px;margin:0 0 6px}\
.paper h3 a{color:#0969da;text-decoration:none}.authors{color:#656d76;font-size:13px}\
.tags{font-size:12px;color:#1a7f37}.analysis{background:#fff8c5;padding:8px 12px;border-radius:6px}\
.highlights{margin:20px 0}.highlights h2.group,.papers h2.group{font-size:20px;margin:24px 0 4px}\
.footer{color:#8c959f;font-size:11px;margin-top:32px}";

/// Escape text for inclusion in HTML element content or quoted attributes.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Only http(s) links are emitted as anchors.
fn safe_href(url: &str) -> Option<String> {
    let lower = url.trim().to_ascii_lowercase();
    (lower.starts_with("https://") || lower.starts_with("http://")).then(|| escape_html(url.trim()))
}

/// Render a standalone HTML document.
#[instrument(skip_all, fields(sections = report.sections.len(), highlights = report.highlights.len()))]
pub fn render_html(report: &Report) -> String {
    let meta = &report.metadata;
    let counts = &meta.counts;
    let mut html = String::with_capacity(4096);

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", escape_html(&report.title)));
    html.push_str(&format!("<style>{STYLE}</style>\n</head>\n<body>\n"));

    html.push_str(&format!("<h1>{}</h1>\n", escape_html(&report.title)));
    html.push_str(&format!(
        "<p class=\"meta\">{} · fetched {} · keyword {} · coarse {} · enriched {} · selected {}</p>\n",
        escape_html(&date_label(meta)),
        counts.fetched,
        counts.keyword,
        counts.coarse,
        counts.enriched,
        counts.ranked,
    ));

    if let Some(overview) = &report.overview {
        html.push_str("<div class=\"overview\">\n");
        for para in paragraphs(overview) {
            html.push_str(&format!("<p>{}</p>\n", escape_html(para)));
        }
        html.push_str("</div>\n");
    }

    if !report.highlights.is_empty() {
        html.push_str("<div class=\"highlights\">\n<h2 class=\"group\">Blog Highlights</h2>\n");
        for section in &report.highlights {
            render_section(&mut html, section);
        }
        html.push_str("</div>\n");
    }

    html.push_str("<div class=\"papers\">\n");
    if !report.highlights.is_empty() {
        html.push_str("<h2 class=\"group\">Papers</h2>\n");
    }
    if report.sections.is_empty() {
        html.push_str("<p>No papers matched today.</p>\n");
    }
    for section in &report.sections {
        render_section(&mut html, section);
    }
    html.push_str("</div>\n");

    html.push_str(&format!(
        "<p class=\"footer\">Generated by PaperFeeder · {}</p>\n",
        escape_html(short_fingerprint(&report.fingerprint))
    ));
    html.push_str("</body>\n</html>\n");

    debug!(bytes = html.len(), "report rendered");
    html
}

fn render_section(html: &mut String, section: &ReportSection) {
    html.push_str("<div class=\"paper\">\n<h3>");
    if let Some(rank) = section.rank {
        html.push_str(&format!("{rank}. "));
    }
    match safe_href(&section.url) {
        Some(href) => html.push_str(&format!(
            "<a href=\"{href}\">{}</a>",
            escape_html(&section.title)
        )),
        None => html.push_str(&escape_html(&section.title)),
    }
    html.push_str("</h3>\n");

    if !section.authors.is_empty() {
        html.push_str(&format!(
            "<p class=\"authors\">{}</p>\n",
            escape_html(&section.authors)
        ));
    }

    let mut tags = Vec::new();
    if let Some(score) = section.coarse_score {
        tags.push(format!("score {score:.1}/10"));
    }
    if !section.keywords.is_empty() {
        tags.push(section.keywords.join(", "));
    }
    if !tags.is_empty() {
        html.push_str(&format!(
            "<p class=\"tags\">{}</p>\n",
            escape_html(&tags.join(" · "))
        ));
    }

    for para in &section.body {
        html.push_str(&format!("<p>{}</p>\n", escape_html(para)));
    }
    if let Some(analysis) = &section.analysis {
        html.push_str("<div class=\"analysis\">\n");
        for para in paragraphs(analysis) {
            html.push_str(&format!("<p>{}</p>\n", escape_html(para)));
        }
        html.push_str("</div>\n");
    }
    html.push_str("</div>\n");
}

fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n").map(str::trim).filter(|p| !p.is_empty())
}

/// `2024-01-02` or `2024-01-01 → 2024-01-02`.
fn date_label(meta: &RunMetadata) -> String {
    if meta.window_start == meta.window_end {
        meta.window_end.to_string()
    } else {
        format!("{} → {}", meta.window_start, meta.window_end)
    }
}

fn short_fingerprint(fp: &str) -> &str {
    fp.get(..12).unwrap_or(fp)
}

// ---------------------------------------------------------------------------
// Plain text
// ---------------------------------------------------------------------------

/// Plain-text alternative derived from the rendered HTML.
pub fn render_text(html: &str) -> Result<String> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["head", "style", "script"])
        .build();

    converter
        .convert(html)
        .map(|text| text.trim().to_string())
        .map_err(|e| PaperFeederError::Conversion(format!("htmd conversion failed: {e}")))
}
