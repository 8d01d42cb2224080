//! HuggingFace daily papers adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paperfeeder_shared::{Paper, PaperFeederError, PaperId, Result, SourceTag};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::atom::normalize_whitespace;
use crate::{FetchWindow, PaperSource};

#[derive(Debug, Deserialize)]
struct DailyItem {
    #[serde(default)]
    paper: Option<DailyPaper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyPaper {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    authors: Vec<DailyAuthor>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct DailyAuthor {
    #[serde(default)]
    name: String,
}

/// Today's featured papers, read from the first endpoint that answers.
///
/// The feed is already a daily curation, so papers are not filtered by the
/// lookback window (a featured paper may have been published earlier).
#[derive(Debug, Clone)]
pub struct HuggingFaceSource {
    client: Client,
    endpoints: Vec<String>,
}

impl HuggingFaceSource {
    pub fn new(client: Client, endpoints: Vec<String>) -> Self {
        Self { client, endpoints }
    }

    async fn fetch_endpoint(&self, endpoint: &str) -> Result<Vec<DailyItem>> {
        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| PaperFeederError::Network(format!("{endpoint}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaperFeederError::Network(format!("{endpoint}: HTTP {status}")));
        }

        response
            .json::<Vec<DailyItem>>()
            .await
            .map_err(|e| PaperFeederError::parse(format!("{endpoint}: {e}")))
    }
}

#[async_trait]
impl PaperSource for HuggingFaceSource {
    fn name(&self) -> &str {
        "huggingface"
    }

    #[instrument(skip_all, fields(endpoints = self.endpoints.len()))]
    async fn fetch(&self, _window: &FetchWindow) -> Result<Vec<Paper>> {
        let mut last_error = None;
        for endpoint in &self.endpoints {
            match self.fetch_endpoint(endpoint).await {
                Ok(items) => {
                    let papers: Vec<Paper> = items.into_iter().filter_map(item_to_paper).collect();
                    info!(%endpoint, count = papers.len(), "daily papers fetched");
                    return Ok(papers);
                }
                Err(e) => {
                    warn!(%endpoint, error = %e, "daily papers endpoint failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| PaperFeederError::config("no HuggingFace endpoints configured")))
    }
}

fn item_to_paper(item: DailyItem) -> Option<Paper> {
    let Some(p) = item.paper else {
        debug!("daily item without paper object, skipping");
        return None;
    };
    let title = normalize_whitespace(&p.title);
    if p.id.trim().is_empty() || title.is_empty() {
        return None;
    }

    let id = PaperId::arxiv(&p.id);
    let bare = id.arxiv_id().unwrap_or(&p.id).to_string();
    let authors = p
        .authors
        .into_iter()
        .map(|a| a.name.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();

    Some(
        Paper::new(
            id,
            format!("https://arxiv.org/abs/{bare}"),
            title,
            normalize_whitespace(&p.summary),
            SourceTag::Huggingface,
        )
        .with_authors(authors)
        .with_published_at(p.published_at)
        .with_pdf_url(Some(format!("https://arxiv.org/pdf/{bare}.pdf"))),
    )
}
