//! Enrichment: attach community signals (code, discussion) to each paper.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use paperfeeder_shared::{Paper, PaperFeederError, Result, TaskPool};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Sentences kept from the search answer.
const ANSWER_SENTENCES: usize = 3;

/// Results inspected for signals.
const SIGNAL_RESULTS: usize = 3;

const SNIPPET_CHARS: usize = 100;
const HF_TITLE_CHARS: usize = 60;

static STARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+[\d,]*)\s*stars?").expect("valid regex"));

/// Looks up external signals for one paper.
#[async_trait]
pub trait Researcher: Send + Sync {
    fn name(&self) -> &str;

    /// Notes text for `paper`; empty when nothing was found.
    async fn research(&self, paper: &Paper) -> Result<String>;
}

/// Used when no search credentials are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResearcher;

#[async_trait]
impl Researcher for NoopResearcher {
    fn name(&self) -> &str {
        "noop"
    }

    async fn research(&self, _paper: &Paper) -> Result<String> {
        Ok(String::new())
    }
}

// ---------------------------------------------------------------------------
// Tavily
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: String,
    search_depth: &'static str,
    max_results: u32,
    include_answer: bool,
    include_raw_content: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Web search through the Tavily API.
#[derive(Clone)]
pub struct TavilyResearcher {
    client: Client,
    endpoint: String,
    api_key: String,
    max_results: u32,
    max_notes_chars: usize,
}

impl std::fmt::Debug for TavilyResearcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilyResearcher")
            .field("endpoint", &self.endpoint)
            .field("max_results", &self.max_results)
            .finish_non_exhaustive()
    }
}

impl TavilyResearcher {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        max_results: u32,
        max_notes_chars: usize,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            max_results,
            max_notes_chars,
        }
    }
}

/// Quoted title restricted to code and discussion sites.
pub fn search_query(paper: &Paper) -> String {
    format!(
        "\"{}\" (site:github.com OR site:reddit.com OR site:twitter.com OR site:huggingface.co) \
         (review OR discussion OR implementation OR reproducibility)",
        paper.title()
    )
}

#[async_trait]
impl Researcher for TavilyResearcher {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn research(&self, paper: &Paper) -> Result<String> {
        let body = SearchRequest {
            api_key: &self.api_key,
            query: search_query(paper),
            search_depth: "basic",
            max_results: self.max_results,
            include_answer: true,
            include_raw_content: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| PaperFeederError::Research(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaperFeederError::Research(format!(
                "search API returned HTTP {status}"
            )));
        }

        let data: SearchResponse = response
            .json()
            .await
            .map_err(|e| PaperFeederError::parse(format!("invalid search response: {e}")))?;

        Ok(compose_notes(&data, self.max_notes_chars))
    }
}

/// Answer summary first, then per-result signals; duplicates dropped and the
/// whole bounded to `max_chars`.
fn compose_notes(data: &SearchResponse, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(answer) = data.answer.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        parts.push(first_sentences(answer, ANSWER_SENTENCES));
    }

    for result in data.results.iter().take(SIGNAL_RESULTS) {
        if let Some(signal) = signal_of(result) {
            if !parts.contains(&signal) {
                parts.push(signal);
            }
        }
    }

    let notes = parts.join(" ");
    if notes.chars().count() <= max_chars {
        return notes;
    }
    notes.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

fn first_sentences(text: &str, n: usize) -> String {
    let mut summary = text.split(". ").take(n).collect::<Vec<_>>().join(". ");
    if !summary.ends_with('.') {
        summary.push('.');
    }
    summary
}

fn signal_of(result: &SearchResult) -> Option<String> {
    let url = result.url.as_str();
    let content = result.content.trim();

    if url.contains("github.com") {
        if content.is_empty() {
            return None;
        }
        return Some(match STARS_RE.captures(content) {
            Some(caps) => format!("GitHub repo with {} stars.", &caps[1]),
            None => "GitHub implementation available.".to_string(),
        });
    }

    let platform = if url.contains("reddit.com") {
        Some("Reddit")
    } else if url.contains("twitter.com") || url.contains("x.com/") {
        Some("Twitter")
    } else {
        None
    };
    if let Some(platform) = platform {
        let snippet: String = content.chars().take(SNIPPET_CHARS).collect();
        let snippet = snippet.trim();
        return (!snippet.is_empty()).then(|| format!("{platform} discussion: {snippet}..."));
    }

    if url.contains("huggingface.co") {
        let title: String = result.title.chars().take(HF_TITLE_CHARS).collect();
        return Some(format!("HuggingFace: {}.", title.trim()));
    }
    None
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Result of the enrichment stage.
#[derive(Debug, Default)]
pub struct EnrichOutcome {
    pub papers: Vec<Paper>,
    /// Papers whose lookup failed or timed out and got empty notes.
    pub failures: usize,
}

pub struct Enricher {
    researcher: Arc<dyn Researcher>,
    pool: TaskPool,
}

impl Enricher {
    pub fn new(researcher: Arc<dyn Researcher>, pool: TaskPool) -> Self {
        Self { researcher, pool }
    }

    /// Attach research notes to every paper. Every paper leaves with notes
    /// set, empty when the lookup failed.
    #[instrument(skip_all, fields(input = papers.len(), researcher = self.researcher.name()))]
    pub async fn run(&self, mut papers: Vec<Paper>) -> EnrichOutcome {
        let researcher = Arc::clone(&self.researcher);
        let notes = self
            .pool
            .run("enrich", papers.clone(), move |paper| {
                let researcher = Arc::clone(&researcher);
                async move { researcher.research(&paper).await }
            })
            .await;

        let mut failures = 0;
        for (paper, result) in papers.iter_mut().zip(notes) {
            let text = match result {
                Some(Ok(text)) => text,
                Some(Err(e)) => {
                    warn!(id = %paper.id(), error = %e, "research failed, continuing without notes");
                    failures += 1;
                    String::new()
                }
                None => {
                    warn!(id = %paper.id(), "research timed out, continuing without notes");
                    failures += 1;
                    String::new()
                }
            };
            if let Err(e) = paper.set_research_notes(text) {
                debug!(id = %paper.id(), error = %e, "research notes already recorded");
            }
        }

        info!(failures, "enrichment complete");
        EnrichOutcome { papers, failures }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use paperfeeder_shared::{PaperId, SourceTag};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn paper(n: usize, title: &str) -> Paper {
        Paper::new(
            PaperId::arxiv(&format!("2401.{n:05}")),
            format!("https://arxiv.org/abs/2401.{n:05}"),
            title,
            "abstract",
            SourceTag::Arxiv,
        )
    }

    fn pool() -> TaskPool {
        TaskPool::new(3, Duration::from_secs(5))
    }

    struct FailingResearcher;

    #[async_trait]
    impl Researcher for FailingResearcher {
        fn name(&self) -> &str {
            "failing"
        }
        async fn research(&self, paper: &Paper) -> Result<String> {
            if paper.title().contains("bad") {
                Err(PaperFeederError::Research("boom".into()))
            } else {
                Ok(format!("notes for {}", paper.title()))
            }
        }
    }

    #[tokio::test]
    async fn noop_researcher_gives_every_paper_empty_notes() {
        let out = Enricher::new(Arc::new(NoopResearcher), pool())
            .run(vec![paper(1, "A"), paper(2, "B")])
            .await;
        assert_eq!(out.failures, 0);
        assert!(out.papers.iter().all(|p| p.research_notes() == Some("")));
    }

    #[tokio::test]
    async fn failures_are_isolated_per_paper() {
        let out = Enricher::new(Arc::new(FailingResearcher), pool())
            .run(vec![paper(1, "good"), paper(2, "bad"), paper(3, "fine")])
            .await;
        assert_eq!(out.failures, 1);
        let notes: Vec<_> = out.papers.iter().map(|p| p.research_notes().unwrap()).collect();
        assert_eq!(notes, vec!["notes for good", "", "notes for fine"]);
    }

    #[test]
    fn query_quotes_title_and_restricts_sites() {
        let q = search_query(&paper(1, "Video Diffusion at Scale"));
        assert!(q.starts_with("\"Video Diffusion at Scale\" (site:github.com"));
        assert!(q.contains("reproducibility"));
    }

    #[test]
    fn notes_combine_answer_and_signals() {
        let data = SearchResponse {
            answer: Some("One. Two. Three. Four".into()),
            results: vec![
                SearchResult {
                    title: "repo".into(),
                    url: "https://github.com/org/repo".into(),
                    content: "A fast implementation with 1,234 stars and counting".into(),
                },
                SearchResult {
                    title: "thread".into(),
                    url: "https://www.reddit.com/r/MachineLearning/x".into(),
                    content: "  Interesting but the baselines look weak ".into(),
                },
                SearchResult {
                    title: "Model card for latent reasoner".into(),
                    url: "https://huggingface.co/org/model".into(),
                    content: String::new(),
                },
            ],
        };
        let notes = compose_notes(&data, 1000);
        assert_eq!(
            notes,
            "One. Two. Three. GitHub repo with 1,234 stars. \
             Reddit discussion: Interesting but the baselines look weak... \
             HuggingFace: Model card for latent reasoner."
        );
    }

    #[test]
    fn notes_are_bounded_and_deduplicated() {
        let repo = SearchResult {
            title: "repo".into(),
            url: "https://github.com/org/repo".into(),
            content: "code".into(),
        };
        let data = SearchResponse {
            answer: None,
            results: vec![
                repo,
                SearchResult {
                    title: "fork".into(),
                    url: "https://github.com/other/repo".into(),
                    content: "more code".into(),
                },
            ],
        };
        assert_eq!(compose_notes(&data, 1000), "GitHub implementation available.");
        assert_eq!(compose_notes(&data, 6), "GitHub");
    }

    #[tokio::test]
    async fn tavily_posts_query_and_parses_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(serde_json::json!({
                "api_key": "tvly-test",
                "search_depth": "basic",
                "include_answer": true,
                "include_raw_content": false,
                "max_results": 5
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "answer": "Widely discussed. Code is available",
                "results": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let researcher = TavilyResearcher::new(
            Client::new(),
            format!("{}/search", server.uri()),
            "tvly-test",
            5,
            1200,
        );
        let notes = researcher.research(&paper(1, "A")).await.expect("research");
        assert_eq!(notes, "Widely discussed. Code is available.");
    }

    #[tokio::test]
    async fn tavily_http_error_is_a_research_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(432))
            .mount(&server)
            .await;

        let researcher =
            TavilyResearcher::new(Client::new(), server.uri(), "tvly-test", 5, 1200);
        let err = researcher.research(&paper(1, "A")).await.unwrap_err();
        assert!(matches!(err, PaperFeederError::Research(_)));
    }
}
