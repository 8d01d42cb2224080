//! Manually curated paper list.
//!
//! The list is a JSON file `{"papers": [...]}` read once at construction.
//! Entries are either literal records or bare references (arXiv id or URL)
//! that are resolved at fetch time.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use paperfeeder_shared::{
    Paper, PaperFeederError, PaperId, Result, SourceTag, TaskPool, arxiv_id_from_url,
    is_arxiv_id,
};
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::arxiv::{ArxivClient, entry_to_paper};
use crate::atom::normalize_whitespace;
use crate::{FetchWindow, PaperSource};

/// Title given to references whose metadata could not be resolved.
pub const PLACEHOLDER_TITLE: &str = "[Metadata not fetched]";

static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));

static DESCRIPTION_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[name="description"], meta[property="og:description"]"#)
        .expect("valid selector")
});

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ManualFile {
    #[serde(default)]
    papers: Vec<ManualEntry>,
}

/// One entry of the manual list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ManualEntry {
    /// Bare arXiv id or URL.
    Reference(String),
    Record(ManualRecord),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManualRecord {
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    pub url: String,
    #[serde(default)]
    pub arxiv_id: Option<String>,
    #[serde(default)]
    pub authors: Vec<ManualAuthor>,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ManualAuthor {
    Name(String),
    Object { name: String },
}

impl ManualAuthor {
    fn into_name(self) -> String {
        match self {
            Self::Name(name) | Self::Object { name } => name,
        }
    }
}

impl ManualRecord {
    fn into_paper(self) -> Paper {
        let id = match self.arxiv_id.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(arxiv_id) => PaperId::arxiv(arxiv_id),
            None => PaperId::from_url(&self.url),
        };
        let published_at = self.published_date.as_deref().and_then(parse_date);
        Paper::new(
            id,
            self.url,
            normalize_whitespace(&self.title),
            normalize_whitespace(&self.abstract_text),
            SourceTag::Manual,
        )
        .with_authors(self.authors.into_iter().map(ManualAuthor::into_name).collect())
        .with_published_at(published_at)
        .with_categories(self.categories)
        .with_pdf_url(self.pdf_url)
        .with_notes(self.notes)
    }
}

/// Accept RFC 3339 timestamps or bare `YYYY-MM-DD` dates.
fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

// ---------------------------------------------------------------------------
// ManualSource
// ---------------------------------------------------------------------------

/// Papers listed by hand in a local JSON file.
#[derive(Debug, Clone)]
pub struct ManualSource {
    path: PathBuf,
    entries: Vec<ManualEntry>,
    load_error: Option<String>,
    resolver: Resolver,
    pool: TaskPool,
}

impl ManualSource {
    /// Read the list at `path`. A missing file yields an empty list with a
    /// warning; an unreadable or malformed file surfaces as a fetch error.
    ///
    /// References are resolved through `pool`, so its limit bounds concurrent
    /// lookups and its deadline bounds the whole resolution.
    pub fn load(
        path: impl AsRef<Path>,
        client: Client,
        arxiv: ArxivClient,
        pool: TaskPool,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        let (entries, load_error) = match read_entries(&path) {
            Ok(entries) => (entries, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };
        Self {
            path,
            entries,
            load_error,
            resolver: Resolver { client, arxiv },
            pool,
        }
    }

    pub fn entries(&self) -> &[ManualEntry] {
        &self.entries
    }
}

/// Turns a bare reference into a paper.
#[derive(Debug, Clone)]
struct Resolver {
    client: Client,
    arxiv: ArxivClient,
}

impl Resolver {
    async fn resolve(&self, reference: &str) -> Paper {
        let reference = reference.trim();
        if let Some(arxiv_id) = reference_arxiv_id(reference) {
            match self.arxiv.lookup(&arxiv_id).await {
                Ok(Some(entry)) => return entry_to_paper(entry, SourceTag::Manual),
                Ok(None) => warn!(%arxiv_id, "arXiv returned no entry for manual reference"),
                Err(e) => warn!(%arxiv_id, error = %e, "arXiv lookup failed for manual reference"),
            }
            return placeholder(reference);
        }

        match self.scrape_page(reference).await {
            Ok(paper) => paper,
            Err(e) => {
                warn!(url = %reference, error = %e, "could not fetch manual reference metadata");
                placeholder(reference)
            }
        }
    }

    async fn scrape_page(&self, url: &str) -> Result<Paper> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PaperFeederError::Network(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PaperFeederError::Network(format!("{url}: HTTP {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| PaperFeederError::Network(format!("{url}: failed to read body: {e}")))?;

        let (title, description) = page_metadata(&body);
        let title = title.ok_or_else(|| PaperFeederError::parse(format!("{url}: no <title>")))?;
        Ok(Paper::new(
            PaperId::from_url(url),
            url,
            title,
            description.unwrap_or_default(),
            SourceTag::Manual,
        ))
    }
}

fn reference_arxiv_id(reference: &str) -> Option<String> {
    if is_arxiv_id(reference) {
        Some(reference.to_string())
    } else {
        arxiv_id_from_url(reference)
    }
}

fn read_entries(path: &Path) -> Result<Vec<ManualEntry>> {
    if !path.exists() {
        warn!(?path, "manual papers file not found, skipping");
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| PaperFeederError::io(path, e))?;
    let file: ManualFile = serde_json::from_str(&content)
        .map_err(|e| PaperFeederError::parse(format!("{}: {e}", path.display())))?;
    debug!(?path, entries = file.papers.len(), "manual list loaded");
    Ok(file.papers)
}

/// `<title>` and description meta of an HTML page, whitespace-normalized.
fn page_metadata(html: &str) -> (Option<String>, Option<String>) {
    let doc = Html::parse_document(html);
    let title = doc
        .select(&TITLE_SELECTOR)
        .next()
        .map(|t| normalize_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());
    let description = doc
        .select(&DESCRIPTION_SELECTOR)
        .filter_map(|m| m.value().attr("content"))
        .map(normalize_whitespace)
        .find(|d| !d.is_empty());
    (title, description)
}

/// Stand-in for a reference whose metadata could not be resolved.
fn placeholder(reference: &str) -> Paper {
    let reference = reference.trim();
    let (id, url) = match reference_arxiv_id(reference) {
        Some(arxiv_id) => (
            PaperId::arxiv(&arxiv_id),
            format!("https://arxiv.org/abs/{arxiv_id}"),
        ),
        None => (PaperId::from_url(reference), reference.to_string()),
    };
    Paper::new(id, url, PLACEHOLDER_TITLE, "", SourceTag::Manual)
        .with_notes(Some("Manually added; metadata needs to be fetched".into()))
}

#[async_trait]
impl PaperSource for ManualSource {
    fn name(&self) -> &str {
        "manual"
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn fetch(&self, _window: &FetchWindow) -> Result<Vec<Paper>> {
        if let Some(e) = &self.load_error {
            return Err(PaperFeederError::parse(format!("manual list unusable: {e}")));
        }

        let references: Vec<String> = self
            .entries
            .iter()
            .filter_map(|entry| match entry {
                ManualEntry::Reference(reference) => Some(reference.clone()),
                ManualEntry::Record(_) => None,
            })
            .collect();

        let resolver = self.resolver.clone();
        let resolved = self
            .pool
            .run("manual", references, move |reference| {
                let resolver = resolver.clone();
                async move { resolver.resolve(&reference).await }
            })
            .await;

        let mut resolved = resolved.into_iter();
        let mut papers = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let paper = match entry {
                ManualEntry::Record(record) => record.clone().into_paper(),
                ManualEntry::Reference(reference) => match resolved.next().flatten() {
                    Some(paper) => paper,
                    None => {
                        warn!(%reference, "reference not resolved before the deadline");
                        placeholder(reference)
                    }
                },
            };
            papers.push(paper);
        }
        info!(count = papers.len(), "manual papers loaded");
        Ok(papers)
    }
}
