//! Core domain types: papers, their identifiers, and the digest report.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{PaperFeederError, Result};

/// Reason recorded when a paper could not be scored.
pub const SCORING_FAILED_REASON: &str = "scoring failed";

static ARXIV_NEW_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}\.\d{4,5})(?:v\d+)?$").expect("valid regex")
});

static ARXIV_OLD_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z\-]+(?:\.[A-Z]{2})?/\d{7})(?:v\d+)?$").expect("valid regex")
});

static ARXIV_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"arxiv\.org/(?:abs|pdf)/([^?#]+?)(?:\.pdf)?/?(?:[?#].*)?$").expect("valid regex")
});

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 identifying one pipeline invocation (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PaperId
// ---------------------------------------------------------------------------

/// Normalized paper identifier, used for deduplication and ranking references.
///
/// arXiv-backed records normalize to `arxiv:<id>` with any version suffix
/// removed, so the same paper fetched from arXiv, the HF feed and the manual
/// list collapses to one key. Everything else normalizes to a lowercase-host,
/// fragment-free URL without a trailing slash. Query pairs are kept, sorted,
/// since sites like OpenReview identify papers by `?id=`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaperId(String);

impl PaperId {
    /// Build an identifier from a bare arXiv id such as `2401.01234v2`.
    pub fn arxiv(raw_id: &str) -> Self {
        let id = raw_id.trim().trim_start_matches("arxiv:");
        let base = ARXIV_NEW_ID_RE
            .captures(id)
            .or_else(|| ARXIV_OLD_ID_RE.captures(id))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(id);
        Self(format!("arxiv:{base}"))
    }

    /// Build an identifier from a URL, recognizing arXiv abs/pdf links.
    pub fn from_url(raw_url: &str) -> Self {
        let raw_url = raw_url.trim();
        if let Some(arxiv_id) = arxiv_id_from_url(raw_url) {
            return Self::arxiv(&arxiv_id);
        }

        match Url::parse(raw_url) {
            Ok(url) => {
                let host = url.host_str().unwrap_or_default().to_lowercase();
                let path = url.path().trim_end_matches('/');
                let mut pairs: Vec<(String, String)> = url
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                if pairs.is_empty() {
                    return Self(format!("{host}{path}"));
                }
                pairs.sort();
                let query = pairs
                    .iter()
                    .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
                    .collect::<Vec<_>>()
                    .join("&");
                Self(format!("{host}{path}?{query}"))
            }
            Err(_) => Self(raw_url.to_lowercase()),
        }
    }

    /// Parse any user-supplied identifier: `arxiv:` prefix, bare arXiv id, or URL.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("arxiv:") || is_arxiv_id(raw) {
            Self::arxiv(raw)
        } else {
            Self::from_url(raw)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare arXiv id, if this identifier is arXiv-backed.
    pub fn arxiv_id(&self) -> Option<&str> {
        self.0.strip_prefix("arxiv:")
    }
}

impl std::fmt::Display for PaperId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether `s` looks like an arXiv id (new `YYMM.NNNNN` or old `cat/NNNNNNN` form).
pub fn is_arxiv_id(s: &str) -> bool {
    let s = s.trim();
    ARXIV_NEW_ID_RE.is_match(s) || ARXIV_OLD_ID_RE.is_match(s)
}

/// Extract the arXiv id from an `arxiv.org/abs/...` or `arxiv.org/pdf/...` URL.
pub fn arxiv_id_from_url(url: &str) -> Option<String> {
    ARXIV_URL_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|id| is_arxiv_id(id))
}

// ---------------------------------------------------------------------------
// Paper
// ---------------------------------------------------------------------------

/// Where a paper record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Arxiv,
    Huggingface,
    Manual,
    Blog,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arxiv => "arxiv",
            Self::Huggingface => "huggingface",
            Self::Manual => "manual",
            Self::Blog => "blog",
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A paper in the working set.
///
/// Metadata is fixed at construction. Stage annotations (keyword matches,
/// coarse score, research notes, fine rank) are write-once: each setter
/// rejects a second write, so a paper only ever gains information as it moves
/// through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    id: PaperId,
    url: String,
    title: String,
    #[serde(rename = "abstract")]
    abstract_text: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    published_at: Option<DateTime<Utc>>,
    source: SourceTag,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pdf_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
    /// Priority blog posts bypass filtering and research.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    priority: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    matched_keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    coarse_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    coarse_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    research_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fine_rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fine_reason: Option<String>,
}

impl Paper {
    /// Create a paper with the required metadata; optional metadata is added
    /// with the `with_*` builders before the paper enters the working set.
    pub fn new(
        id: PaperId,
        url: impl Into<String>,
        title: impl Into<String>,
        abstract_text: impl Into<String>,
        source: SourceTag,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            title: title.into(),
            abstract_text: abstract_text.into(),
            authors: Vec::new(),
            published_at: None,
            source,
            categories: Vec::new(),
            pdf_url: None,
            notes: None,
            priority: false,
            matched_keywords: None,
            coarse_score: None,
            coarse_reason: None,
            research_notes: None,
            fine_rank: None,
            fine_reason: None,
        }
    }

    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    pub fn with_published_at(mut self, published_at: Option<DateTime<Utc>>) -> Self {
        self.published_at = published_at;
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_pdf_url(mut self, pdf_url: Option<String>) -> Self {
        self.pdf_url = pdf_url;
        self
    }

    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    // -- metadata ----------------------------------------------------------

    pub fn id(&self) -> &PaperId {
        &self.id
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn abstract_text(&self) -> &str {
        &self.abstract_text
    }
    pub fn authors(&self) -> &[String] {
        &self.authors
    }
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }
    pub fn source(&self) -> SourceTag {
        self.source
    }
    pub fn categories(&self) -> &[String] {
        &self.categories
    }
    pub fn pdf_url(&self) -> Option<&str> {
        self.pdf_url.as_deref()
    }
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
    pub fn is_priority(&self) -> bool {
        self.priority
    }

    /// A rough "completeness" weight used by the `richest` dedup policy.
    pub fn richness(&self) -> (usize, usize) {
        (self.abstract_text.len(), self.authors.len())
    }

    /// Authors formatted for prompts and reports: first `limit`, then "et al.".
    pub fn author_line(&self, limit: usize) -> String {
        if self.authors.is_empty() {
            return "Unknown authors".to_string();
        }
        let shown = self.authors.iter().take(limit).cloned().collect::<Vec<_>>();
        let mut line = shown.join(", ");
        if self.authors.len() > limit {
            line.push_str(&format!(" et al. ({} authors)", self.authors.len()));
        }
        line
    }

    // -- stage annotations -------------------------------------------------

    pub fn matched_keywords(&self) -> &[String] {
        self.matched_keywords.as_deref().unwrap_or_default()
    }
    pub fn coarse_score(&self) -> Option<f32> {
        self.coarse_score
    }
    pub fn coarse_reason(&self) -> Option<&str> {
        self.coarse_reason.as_deref()
    }
    pub fn research_notes(&self) -> Option<&str> {
        self.research_notes.as_deref()
    }
    pub fn fine_rank(&self) -> Option<u32> {
        self.fine_rank
    }
    pub fn fine_reason(&self) -> Option<&str> {
        self.fine_reason.as_deref()
    }

    pub fn set_matched_keywords(&mut self, keywords: Vec<String>) -> Result<()> {
        write_once(&mut self.matched_keywords, keywords, "matched_keywords", &self.id)
    }

    /// Record the coarse verdict. Scores must lie in `0.0..=10.0`.
    pub fn set_coarse(&mut self, score: f32, reason: impl Into<String>) -> Result<()> {
        if !score.is_finite() || !(0.0..=10.0).contains(&score) {
            return Err(PaperFeederError::validation(format!(
                "coarse score {score} for {} outside 0..=10",
                self.id
            )));
        }
        write_once(&mut self.coarse_score, score, "coarse_score", &self.id)?;
        write_once(&mut self.coarse_reason, reason.into(), "coarse_reason", &self.id)
    }

    pub fn set_research_notes(&mut self, notes: impl Into<String>) -> Result<()> {
        write_once(&mut self.research_notes, notes.into(), "research_notes", &self.id)
    }

    /// Record the fine ranking. Rank 1 is best.
    pub fn set_fine(&mut self, rank: u32, reason: impl Into<String>) -> Result<()> {
        if rank == 0 {
            return Err(PaperFeederError::validation(format!(
                "fine rank for {} must start at 1",
                self.id
            )));
        }
        write_once(&mut self.fine_rank, rank, "fine_rank", &self.id)?;
        write_once(&mut self.fine_reason, reason.into(), "fine_reason", &self.id)
    }
}

fn write_once<T>(slot: &mut Option<T>, value: T, field: &str, id: &PaperId) -> Result<()> {
    if slot.is_some() {
        return Err(PaperFeederError::validation(format!(
            "{field} already set for {id}"
        )));
    }
    *slot = Some(value);
    Ok(())
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Working-set size after each stage, reported in the digest header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub fetched: usize,
    pub keyword: usize,
    pub coarse: usize,
    pub enriched: usize,
    pub ranked: usize,
}

/// Run metadata handed to synthesis alongside the ranked papers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Inclusive start of the lookback window.
    pub window_start: NaiveDate,
    /// Inclusive end of the lookback window (the run date).
    pub window_end: NaiveDate,
    pub counts: StageCounts,
}

/// One report section, describing one selected paper or blog post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    /// Plain-text paragraphs; renderers decide the markup.
    pub body: Vec<String>,
    pub paper_ids: Vec<PaperId>,
    pub url: String,
    pub authors: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coarse_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Generated write-up. Not covered by the fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

/// The digest produced once by synthesis and consumed once by delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub title: String,
    pub metadata: RunMetadata,
    /// Optional generated overview paragraph. Not covered by the fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    /// Priority blog posts, shown ahead of the papers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlights: Vec<ReportSection>,
    pub sections: Vec<ReportSection>,
    /// SHA-256 over title, metadata, highlights and sections.
    pub fingerprint: String,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.highlights.is_empty()
    }

    /// Highlights followed by paper sections.
    pub fn all_sections(&self) -> impl Iterator<Item = &ReportSection> {
        self.highlights.iter().chain(&self.sections)
    }

    pub fn titles(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.title.as_str()).collect()
    }
}
