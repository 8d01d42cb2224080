//! Fine filter: one ranking request over the enriched shortlist.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use paperfeeder_llm::{ChatClient, ChatRequest, parse_json};
use paperfeeder_shared::{Paper, PaperFeederError, PaperId, Result, RetryPolicy, retry};
use serde::Deserialize;
use tracing::{info, instrument, warn};

const PROMPT_AUTHOR_LIMIT: usize = 5;
const PROMPT_ABSTRACT_CHARS: usize = 1200;

const SYSTEM_PROMPT: &str = "You are a senior principal researcher choosing which papers your \
team should read in depth today. Rank the candidates by value to the stated research \
interests. Consider methodological novelty, likely impact, author track record and the \
community signals (code releases, discussion, reproducibility reports). Respond with a single \
JSON object: {\"ranking\": [{\"id\": \"<candidate id>\", \"reason\": \"<one sentence>\"}]}, \
best first. Use only ids from the candidate list. No other text.";

/// One entry of a ranking response, before validation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RankEntry {
    pub id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RankingReply {
    Wrapped { ranking: Vec<RankEntry> },
    Bare(Vec<RankEntry>),
}

impl RankingReply {
    fn into_entries(self) -> Vec<RankEntry> {
        match self {
            Self::Wrapped { ranking } | Self::Bare(ranking) => ranking,
        }
    }
}

/// Orders a shortlist, best first.
#[async_trait]
pub trait PaperRanker: Send + Sync {
    async fn rank(&self, papers: &[Paper], top_n: usize) -> Result<Vec<RankEntry>>;
}

/// Ranks through an OpenAI-compatible chat model.
pub struct LlmRanker {
    client: Arc<dyn ChatClient>,
    research_interests: String,
}

impl LlmRanker {
    pub fn new(client: Arc<dyn ChatClient>, research_interests: impl Into<String>) -> Self {
        Self {
            client,
            research_interests: research_interests.into(),
        }
    }

    fn prompt(&self, papers: &[Paper], top_n: usize) -> String {
        let mut prompt = format!(
            "Research interests:\n{}\n\nSelect and rank the best {top_n} of these {} candidates.\n",
            self.research_interests.trim(),
            papers.len()
        );
        for paper in papers {
            let abstract_text: String =
                paper.abstract_text().chars().take(PROMPT_ABSTRACT_CHARS).collect();
            let score = paper
                .coarse_score()
                .map(|s| format!("{s:.1}/10"))
                .unwrap_or_else(|| "n/a".to_string());
            let notes = paper
                .research_notes()
                .filter(|n| !n.is_empty())
                .unwrap_or("none found");
            prompt.push_str(&format!(
                "\n---\nid: {}\nTitle: {}\nAuthors: {}\nCoarse score: {}\nCommunity signals: {}\nAbstract: {}\n",
                paper.id(),
                paper.title(),
                paper.author_line(PROMPT_AUTHOR_LIMIT),
                score,
                notes,
                abstract_text,
            ));
        }
        prompt
    }
}

#[async_trait]
impl PaperRanker for LlmRanker {
    async fn rank(&self, papers: &[Paper], top_n: usize) -> Result<Vec<RankEntry>> {
        let request = ChatRequest::new(SYSTEM_PROMPT, self.prompt(papers, top_n))
            .with_temperature(0.2)
            .with_max_tokens(1500);
        let text = self.client.complete(request).await?;
        let reply: RankingReply = parse_json(&text)?;
        let entries = reply.into_entries();
        if entries.is_empty() && !papers.is_empty() {
            return Err(PaperFeederError::validation("ranking response was empty"));
        }
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Result of the fine stage.
#[derive(Debug, Default)]
pub struct FineOutcome {
    pub papers: Vec<Paper>,
    /// Entries dropped for naming an unknown or already-ranked paper.
    pub violations: usize,
    /// The ranker failed after all attempts; `papers` is empty.
    pub failed: bool,
}

pub struct FineFilter {
    ranker: Arc<dyn PaperRanker>,
    retry: RetryPolicy,
    top_n: usize,
}

impl FineFilter {
    pub fn new(ranker: Arc<dyn PaperRanker>, retry: RetryPolicy, top_n: usize) -> Self {
        Self {
            ranker,
            retry,
            top_n,
        }
    }

    /// Rank `papers` and keep at most `top_n`, numbered from 1.
    #[instrument(skip_all, fields(input = papers.len(), top_n = self.top_n))]
    pub async fn run(&self, papers: Vec<Paper>) -> FineOutcome {
        if papers.is_empty() || self.top_n == 0 {
            return FineOutcome::default();
        }

        let entries = match retry(self.retry, "fine rank", || {
            self.ranker.rank(&papers, self.top_n)
        })
        .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "ranking failed, report will have no ranked papers");
                return FineOutcome {
                    papers: Vec::new(),
                    violations: 0,
                    failed: true,
                };
            }
        };

        let (papers, violations) = apply_ranking(papers, entries, self.top_n);
        info!(kept = papers.len(), violations, "fine filter applied");
        FineOutcome {
            papers,
            violations,
            failed: false,
        }
    }
}

/// Pick papers in ranking order, dropping unknown and repeated ids.
fn apply_ranking(papers: Vec<Paper>, entries: Vec<RankEntry>, top_n: usize) -> (Vec<Paper>, usize) {
    let mut pool: Vec<Option<Paper>> = papers.into_iter().map(Some).collect();
    let mut seen = HashSet::new();
    let mut ranked = Vec::new();
    let mut violations = 0;

    for entry in entries {
        if ranked.len() == top_n {
            break;
        }
        let id = PaperId::parse(&entry.id);
        let slot = pool
            .iter()
            .position(|p| p.as_ref().is_some_and(|p| p.id() == &id));

        let Some(idx) = slot else {
            if seen.contains(&id) {
                warn!(id = %entry.id, "ranking repeated a paper, dropping");
            } else {
                warn!(id = %entry.id, "ranking named an unknown paper, dropping");
            }
            violations += 1;
            continue;
        };
        seen.insert(id);

        let Some(mut paper) = pool[idx].take() else {
            continue;
        };
        let rank = ranked.len() as u32 + 1;
        if let Err(e) = paper.set_fine(rank, entry.reason.trim()) {
            warn!(id = %paper.id(), error = %e, "could not record fine rank");
        }
        ranked.push(paper);
    }
    (ranked, violations)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use paperfeeder_shared::SourceTag;

    use super::*;

    fn paper(id: &str, title: &str) -> Paper {
        Paper::new(
            PaperId::arxiv(id),
            format!("https://arxiv.org/abs/{id}"),
            title,
            "abstract",
            SourceTag::Arxiv,
        )
    }

    fn shortlist() -> Vec<Paper> {
        vec![
            paper("2401.00001", "A"),
            paper("2401.00002", "B"),
            paper("2401.00003", "C"),
        ]
    }

    fn entry(id: &str) -> RankEntry {
        RankEntry {
            id: id.into(),
            reason: format!("because {id}"),
        }
    }

    struct FixedRanker(Vec<RankEntry>);

    #[async_trait]
    impl PaperRanker for FixedRanker {
        async fn rank(&self, _papers: &[Paper], _top_n: usize) -> Result<Vec<RankEntry>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenRanker;

    #[async_trait]
    impl PaperRanker for BrokenRanker {
        async fn rank(&self, _papers: &[Paper], _top_n: usize) -> Result<Vec<RankEntry>> {
            Err(PaperFeederError::Llm("HTTP 503".into()))
        }
    }

    struct ScriptedChat(Mutex<Vec<String>>);

    #[async_trait]
    impl ChatClient for ScriptedChat {
        fn model(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, _request: ChatRequest) -> Result<String> {
            Ok(self.0.lock().unwrap().remove(0))
        }
    }

    fn filter(ranker: impl PaperRanker + 'static, top_n: usize) -> FineFilter {
        FineFilter::new(Arc::new(ranker), RetryPolicy::new(2, Duration::ZERO), top_n)
    }

    #[tokio::test]
    async fn ranks_in_response_order_from_one() {
        let ranker = FixedRanker(vec![entry("arxiv:2401.00003"), entry("arxiv:2401.00001")]);
        let out = filter(ranker, 5).run(shortlist()).await;

        let titles: Vec<&str> = out.papers.iter().map(|p| p.title()).collect();
        assert_eq!(titles, vec!["C", "A"]);
        assert_eq!(out.papers[0].fine_rank(), Some(1));
        assert_eq!(out.papers[1].fine_rank(), Some(2));
        assert_eq!(out.papers[1].fine_reason(), Some("because arxiv:2401.00001"));
        assert_eq!(out.violations, 0);
    }

    #[tokio::test]
    async fn unknown_and_repeated_ids_are_dropped_and_counted() {
        let ranker = FixedRanker(vec![
            entry("arxiv:9999.99999"),
            entry("2401.00002v1"),
            entry("arxiv:2401.00002"),
            entry("arxiv:2401.00001"),
        ]);
        let out = filter(ranker, 5).run(shortlist()).await;

        let ids: Vec<String> = out.papers.iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["arxiv:2401.00002", "arxiv:2401.00001"]);
        assert_eq!(out.violations, 2);
        assert!(!ids.contains(&"arxiv:9999.99999".to_string()));
    }

    #[tokio::test]
    async fn truncates_to_top_n() {
        let ranker = FixedRanker(vec![
            entry("arxiv:2401.00002"),
            entry("arxiv:2401.00003"),
            entry("arxiv:2401.00001"),
        ]);
        let out = filter(ranker, 2).run(shortlist()).await;
        assert_eq!(out.papers.len(), 2);
        assert_eq!(out.papers[1].title(), "C");
    }

    #[tokio::test]
    async fn exhausted_retries_yield_empty_ranking() {
        let out = filter(BrokenRanker, 5).run(shortlist()).await;
        assert!(out.failed);
        assert!(out.papers.is_empty());
    }

    #[tokio::test]
    async fn llm_ranker_accepts_wrapped_and_bare_replies() {
        let chat = ScriptedChat(Mutex::new(vec![
            "Here you go:\n{\"ranking\": [{\"id\": \"arxiv:2401.00002\", \"reason\": \"best\"}]}"
                .into(),
            "[{\"id\": \"arxiv:2401.00001\"}]".into(),
        ]));
        let ranker = LlmRanker::new(Arc::new(chat), "interests");

        let wrapped = ranker.rank(&shortlist(), 5).await.expect("wrapped");
        assert_eq!(wrapped, vec![RankEntry { id: "arxiv:2401.00002".into(), reason: "best".into() }]);

        let bare = ranker.rank(&shortlist(), 5).await.expect("bare");
        assert_eq!(bare[0].id, "arxiv:2401.00001");
        assert!(bare[0].reason.is_empty());
    }

    #[test]
    fn prompt_lists_ids_scores_and_signals() {
        let chat = ScriptedChat(Mutex::new(Vec::new()));
        let ranker = LlmRanker::new(Arc::new(chat), "interests");
        let mut papers = shortlist();
        papers[0].set_coarse(8.0, "good").unwrap();
        papers[0].set_research_notes("GitHub repo with 500 stars.").unwrap();

        let prompt = ranker.prompt(&papers, 2);
        assert!(prompt.contains("best 2 of these 3"));
        assert!(prompt.contains("id: arxiv:2401.00001"));
        assert!(prompt.contains("Coarse score: 8.0/10"));
        assert!(prompt.contains("Community signals: GitHub repo with 500 stars."));
        assert!(prompt.contains("Community signals: none found"));
    }
}
