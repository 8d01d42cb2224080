//! Paper source adapters: arXiv, HuggingFace daily papers, a manual list, and
//! research blog feeds.
//!
//! Each adapter implements [`PaperSource`] and returns normalized [`Paper`]s.
//! [`fetch_all`] runs every enabled adapter concurrently under a stage
//! deadline, isolates per-source failures, and collapses duplicates with the
//! configured [`DedupPolicy`].

mod arxiv;
mod atom;
mod blog;
mod feed;
mod huggingface;
mod manual;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paperfeeder_shared::{
    DedupPolicy, Paper, PaperFeederError, PaperId, Result, RunConfig, TaskPool,
};
use reqwest::Client;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

pub use arxiv::{ArxivClient, ArxivSource};
pub use atom::{AtomEntry, normalize_whitespace, parse_feed};
pub use blog::BlogSource;
pub use feed::{FeedItem, parse_items};
pub use huggingface::HuggingFaceSource;
pub use manual::{ManualEntry, ManualSource};

/// User-Agent string for source requests.
const USER_AGENT: &str = concat!("PaperFeeder/", env!("CARGO_PKG_VERSION"));

/// Connection timeout shared by all source clients.
const CONNECT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// PaperSource
// ---------------------------------------------------------------------------

/// The lookback window a fetch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    /// The `days` days ending at `now`.
    pub fn lookback(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: now - chrono::Duration::days(i64::from(days)),
            end: now,
        }
    }

    /// Undated papers are never excluded.
    pub fn contains(&self, at: Option<DateTime<Utc>>) -> bool {
        at.is_none_or(|t| t >= self.start)
    }
}

/// A provider of candidate papers.
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Short name used in logs and fetch summaries.
    fn name(&self) -> &str;

    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<Paper>>;
}

/// Build the enabled adapters from run configuration, in fetch order
/// (arXiv, HuggingFace, manual, blogs).
pub fn sources_from_config(config: &RunConfig) -> Result<Vec<Box<dyn PaperSource>>> {
    let client = build_client(config.http_timeout())?;
    let arxiv = ArxivClient::new(
        client.clone(),
        &config.sources.arxiv_endpoint,
        config.fetch_retry(),
    );

    let pool = TaskPool::new(config.pipeline.concurrency, config.stage_timeout());
    let mut sources: Vec<Box<dyn PaperSource>> = Vec::new();
    if config.sources.arxiv_enabled {
        sources.push(Box::new(ArxivSource::new(
            arxiv.clone(),
            config.sources.arxiv_categories.clone(),
            config.sources.arxiv_max_results,
        )));
    }
    if config.sources.huggingface_enabled {
        sources.push(Box::new(HuggingFaceSource::new(
            client.clone(),
            config.sources.huggingface_endpoints.clone(),
        )));
    }
    if config.sources.manual_enabled {
        sources.push(Box::new(ManualSource::load(
            &config.sources.manual_path,
            client.clone(),
            arxiv,
            pool,
        )));
    }
    let feeds = config.blogs.active_feeds();
    if config.blogs.enabled && !feeds.is_empty() {
        sources.push(Box::new(BlogSource::new(
            client,
            feeds,
            config.blogs.days,
            config.blogs.max_posts_per_feed,
            pool,
        )));
    }
    Ok(sources)
}

/// Build a reqwest client with source defaults.
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .map_err(|e| PaperFeederError::Network(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// Fetch orchestration
// ---------------------------------------------------------------------------

/// Per-source result of one fetch round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutcome {
    pub name: String,
    pub count: usize,
    pub error: Option<String>,
}

/// Merged, deduplicated result of fetching every source.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub papers: Vec<Paper>,
    pub sources: Vec<SourceOutcome>,
    /// Records dropped as duplicates.
    pub duplicates: usize,
}

/// Fetch all sources concurrently; merge in source order, then deduplicate.
///
/// A failing source is logged and contributes zero papers. Sources still
/// running when `deadline` elapses are aborted and recorded as failed.
#[instrument(skip_all, fields(sources = sources.len()))]
pub async fn fetch_all(
    sources: Vec<Box<dyn PaperSource>>,
    window: FetchWindow,
    policy: DedupPolicy,
    deadline: Duration,
) -> FetchOutcome {
    let names: Vec<String> = sources.iter().map(|s| s.name().to_string()).collect();
    let mut results: Vec<Option<Result<Vec<Paper>>>> = names.iter().map(|_| None).collect();

    let mut set = JoinSet::new();
    for (idx, source) in sources.into_iter().enumerate() {
        set.spawn(async move { (idx, source.fetch(&window).await) });
    }

    let deadline = Instant::now() + deadline;
    loop {
        match tokio::time::timeout_at(deadline, set.join_next()).await {
            Ok(Some(Ok((idx, result)))) => results[idx] = Some(result),
            Ok(Some(Err(e))) => warn!(error = %e, "source task panicked"),
            Ok(None) => break,
            Err(_) => {
                warn!(outstanding = set.len(), "fetch deadline reached, aborting sources");
                set.abort_all();
                break;
            }
        }
    }

    let results = names.into_iter().zip(results).map(|(name, result)| {
        let result = result.unwrap_or_else(|| {
            Err(PaperFeederError::Network("did not complete before the fetch deadline".into()))
        });
        (name, result)
    });

    let mut merged = Vec::new();
    let mut outcomes = Vec::new();
    for (name, result) in results {
        match result {
            Ok(papers) => {
                info!(source = %name, count = papers.len(), "source fetched");
                outcomes.push(SourceOutcome {
                    name,
                    count: papers.len(),
                    error: None,
                });
                merged.extend(papers);
            }
            Err(e) => {
                warn!(source = %name, error = %e, "source failed, contributing zero papers");
                outcomes.push(SourceOutcome {
                    name,
                    count: 0,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let before = merged.len();
    let papers = dedup(merged, policy);
    let duplicates = before - papers.len();
    info!(total = papers.len(), duplicates, "fetch complete");

    FetchOutcome {
        papers,
        sources: outcomes,
        duplicates,
    }
}

/// Collapse papers sharing a normalized identifier.
///
/// The surviving record always sits at the first-seen position; with
/// [`DedupPolicy::Richest`] its contents are the most complete duplicate.
pub fn dedup(papers: Vec<Paper>, policy: DedupPolicy) -> Vec<Paper> {
    let mut index: HashMap<PaperId, usize> = HashMap::new();
    let mut out: Vec<Paper> = Vec::with_capacity(papers.len());

    for paper in papers {
        match index.get(paper.id()) {
            None => {
                index.insert(paper.id().clone(), out.len());
                out.push(paper);
            }
            Some(&pos) => {
                if policy == DedupPolicy::Richest && paper.richness() > out[pos].richness() {
                    out[pos] = paper;
                }
            }
        }
    }
    out
}
