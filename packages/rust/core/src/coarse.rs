//! Coarse filter: one LLM relevance score per paper, keep the top K.

use std::sync::Arc;

use async_trait::async_trait;
use paperfeeder_llm::{ChatClient, ChatRequest, parse_json};
use paperfeeder_shared::{
    Paper, PaperFeederError, Result, RetryPolicy, SCORING_FAILED_REASON, TaskPool, retry,
};
use serde::Deserialize;
use tracing::{info, instrument, warn};

/// Authors listed in prompts before "et al.".
const PROMPT_AUTHOR_LIMIT: usize = 5;

/// Abstract characters sent for coarse scoring.
const PROMPT_ABSTRACT_CHARS: usize = 1500;

const SYSTEM_PROMPT: &str = "You are a research paper screening assistant. Score how relevant \
a paper is to the reader's research interests on a 0-10 scale, weighing topical relevance of \
title and abstract, the novelty and practicality of the method, and the track record of the \
author team. Respond with a single JSON object: {\"score\": <number 0-10>, \"reason\": \"<one \
sentence>\"}. No other text.";

/// A validated coarse verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreVerdict {
    pub score: f32,
    pub reason: String,
}

/// Scores one paper. Implementations must reject out-of-range scores.
#[async_trait]
pub trait PaperScorer: Send + Sync {
    async fn score(&self, paper: &Paper) -> Result<ScoreVerdict>;
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    score: f64,
    #[serde(default)]
    reason: String,
}

/// Scores papers through an OpenAI-compatible chat model.
pub struct LlmScorer {
    client: Arc<dyn ChatClient>,
    research_interests: String,
}

impl LlmScorer {
    pub fn new(client: Arc<dyn ChatClient>, research_interests: impl Into<String>) -> Self {
        Self {
            client,
            research_interests: research_interests.into(),
        }
    }

    fn prompt(&self, paper: &Paper) -> String {
        let abstract_text: String = paper.abstract_text().chars().take(PROMPT_ABSTRACT_CHARS).collect();
        let categories = if paper.categories().is_empty() {
            "N/A".to_string()
        } else {
            paper.categories().join(", ")
        };
        format!(
            "Research interests:\n{}\n\nPaper:\nTitle: {}\nAuthors: {}\nCategories: {}\nAbstract: {}",
            self.research_interests.trim(),
            paper.title(),
            paper.author_line(PROMPT_AUTHOR_LIMIT),
            categories,
            abstract_text,
        )
    }
}

#[async_trait]
impl PaperScorer for LlmScorer {
    async fn score(&self, paper: &Paper) -> Result<ScoreVerdict> {
        let request = ChatRequest::new(SYSTEM_PROMPT, self.prompt(paper))
            .with_temperature(0.0)
            .with_max_tokens(300)
            .json();
        let text = self.client.complete(request).await?;
        let raw: RawVerdict = parse_json(&text)?;
        validate(raw)
    }
}

fn validate(raw: RawVerdict) -> Result<ScoreVerdict> {
    if !raw.score.is_finite() || !(0.0..=10.0).contains(&raw.score) {
        return Err(PaperFeederError::validation(format!(
            "score {} outside 0..=10",
            raw.score
        )));
    }
    Ok(ScoreVerdict {
        score: raw.score as f32,
        reason: raw.reason.trim().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Result of the coarse stage.
#[derive(Debug, Default)]
pub struct CoarseOutcome {
    pub papers: Vec<Paper>,
    /// Papers that fell back to score 0 after exhausting retries or the deadline.
    pub failures: usize,
    /// Scoring was skipped because the input was at or below `min_candidates`.
    pub skipped: bool,
}

pub struct CoarseFilter {
    scorer: Arc<dyn PaperScorer>,
    pool: TaskPool,
    retry: RetryPolicy,
    top_k: usize,
    min_candidates: usize,
}

impl CoarseFilter {
    pub fn new(
        scorer: Arc<dyn PaperScorer>,
        pool: TaskPool,
        retry: RetryPolicy,
        top_k: usize,
        min_candidates: usize,
    ) -> Self {
        Self {
            scorer,
            pool,
            retry,
            top_k,
            min_candidates,
        }
    }

    /// Score every paper, then keep the `top_k` best (stable on ties).
    ///
    /// A paper whose scoring fails keeps its place in the candidate list with
    /// score 0 and reason `scoring failed`.
    #[instrument(skip_all, fields(input = papers.len(), top_k = self.top_k))]
    pub async fn run(&self, mut papers: Vec<Paper>) -> CoarseOutcome {
        if papers.len() <= self.min_candidates {
            info!(min_candidates = self.min_candidates, "few candidates, skipping coarse scoring");
            papers.truncate(self.top_k);
            return CoarseOutcome {
                papers,
                failures: 0,
                skipped: true,
            };
        }

        let scorer = Arc::clone(&self.scorer);
        let policy = self.retry;
        let snapshots = papers.clone();
        let verdicts = self
            .pool
            .run("coarse", snapshots, move |paper| {
                let scorer = Arc::clone(&scorer);
                async move { retry(policy, "coarse score", || scorer.score(&paper)).await }
            })
            .await;

        let mut failures = 0;
        for (paper, verdict) in papers.iter_mut().zip(verdicts) {
            let (score, reason) = match verdict {
                Some(Ok(v)) => (v.score, v.reason),
                Some(Err(e)) => {
                    warn!(id = %paper.id(), error = %e, "scoring failed");
                    failures += 1;
                    (0.0, SCORING_FAILED_REASON.to_string())
                }
                None => {
                    warn!(id = %paper.id(), "scoring did not finish before the stage deadline");
                    failures += 1;
                    (0.0, SCORING_FAILED_REASON.to_string())
                }
            };
            if let Err(e) = paper.set_coarse(score, reason) {
                warn!(id = %paper.id(), error = %e, "could not record coarse score");
            }
        }

        papers.sort_by(|a, b| {
            let (a, b) = (a.coarse_score().unwrap_or(0.0), b.coarse_score().unwrap_or(0.0));
            b.total_cmp(&a)
        });
        papers.truncate(self.top_k);

        info!(kept = papers.len(), failures, "coarse filter applied");
        CoarseOutcome {
            papers,
            failures,
            skipped: false,
        }
    }
}
