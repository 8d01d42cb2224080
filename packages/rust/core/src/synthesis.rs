//! Synthesis: turn the ranked papers and priority blog posts into a [`Report`].
//!
//! The report skeleton is built deterministically from paper data, so the
//! same input always yields the same sections and fingerprint. A [`Narrator`]
//! may then add an overview and a write-up per section; neither is covered by
//! the fingerprint, and either is dropped when it fails validation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use paperfeeder_llm::{ChatClient, ChatRequest, parse_json};
use paperfeeder_report::fingerprint;
use paperfeeder_shared::{
    Paper, PaperFeederError, PaperId, Report, ReportSection, Result, RunMetadata,
    SCORING_FAILED_REASON,
};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

pub const REPORT_TITLE: &str = "Daily Paper Digest";

/// Authors shown per section before "et al.".
const SECTION_AUTHOR_LIMIT: usize = 8;

/// Longest overview accepted from a narrator.
pub const MAX_OVERVIEW_CHARS: usize = 2000;

/// Longest per-section write-up accepted from a narrator.
pub const MAX_ANALYSIS_CHARS: usize = 1500;

/// Abstract characters shown to the narrator per section.
const PROMPT_ABSTRACT_CHARS: usize = 600;

/// Build the report. `papers` must already be in rank order; `highlights`
/// are priority blog posts in display order.
pub fn build_report(
    papers: &[Paper],
    highlights: &[Paper],
    metadata: RunMetadata,
) -> Result<Report> {
    let highlights: Vec<ReportSection> = highlights.iter().map(highlight_for).collect();
    let sections: Vec<ReportSection> = papers.iter().map(section_for).collect();
    let fingerprint = fingerprint(REPORT_TITLE, &metadata, &highlights, &sections)?;
    Ok(Report {
        title: REPORT_TITLE.to_string(),
        metadata,
        overview: None,
        highlights,
        sections,
        fingerprint,
    })
}

fn section_for(paper: &Paper) -> ReportSection {
    let mut body = Vec::new();
    let abstract_text = paper.abstract_text().trim();
    if !abstract_text.is_empty() {
        body.push(abstract_text.to_string());
    }
    if let Some(reason) = paper.fine_reason().filter(|r| !r.is_empty()) {
        body.push(format!("Why read it: {reason}"));
    } else if let Some(reason) = paper
        .coarse_reason()
        .filter(|r| !r.is_empty() && *r != SCORING_FAILED_REASON)
    {
        body.push(format!("Relevance: {reason}"));
    }
    if let Some(notes) = paper.research_notes().filter(|n| !n.is_empty()) {
        body.push(format!("Community signals: {notes}"));
    }
    if let Some(notes) = paper.notes().filter(|n| !n.trim().is_empty()) {
        body.push(format!("Notes: {}", notes.trim()));
    }

    ReportSection {
        title: paper.title().to_string(),
        body,
        paper_ids: vec![paper.id().clone()],
        url: paper.url().to_string(),
        authors: paper.author_line(SECTION_AUTHOR_LIMIT),
        rank: paper.fine_rank(),
        coarse_score: paper.coarse_score(),
        keywords: paper.matched_keywords().to_vec(),
        analysis: None,
    }
}

fn highlight_for(post: &Paper) -> ReportSection {
    let mut body = Vec::new();
    if let Some(source) = post.notes().filter(|n| !n.trim().is_empty()) {
        body.push(source.trim().to_string());
    }
    let text = post.abstract_text().trim();
    if !text.is_empty() {
        body.push(text.to_string());
    }
    let authors = if post.authors().is_empty() {
        String::new()
    } else {
        post.author_line(SECTION_AUTHOR_LIMIT)
    };

    ReportSection {
        title: post.title().to_string(),
        body,
        paper_ids: vec![post.id().clone()],
        url: post.url().to_string(),
        authors,
        rank: None,
        coarse_score: None,
        keywords: Vec::new(),
        analysis: None,
    }
}

// ---------------------------------------------------------------------------
// Narrator
// ---------------------------------------------------------------------------

/// Generated text layered on a finished report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Narrative {
    pub overview: Option<String>,
    /// Write-ups keyed by the id of the section they describe.
    pub analyses: HashMap<PaperId, String>,
}

/// Writes the overview and per-section write-ups for a report.
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate(&self, report: &Report) -> Result<Narrative>;
}

#[derive(Debug, Deserialize)]
struct NarrativeReply {
    #[serde(default)]
    overview: String,
    #[serde(default)]
    analyses: Vec<AnalysisEntry>,
}

#[derive(Debug, Deserialize)]
struct AnalysisEntry {
    id: String,
    analysis: String,
}

const NARRATOR_PROMPT: &str = "You are a senior researcher at a top AI lab writing today's \
research digest for your team. You value surprising findings and first-principles ideas over \
small benchmark gains, and you say plainly when evidence is thin. Write:\n\
1. \"overview\": at most five sentences on what connects today's items and which one to read \
first.\n\
2. \"analyses\": for every item, a write-up of three to six sentences covering the key idea, \
how it works, how convincing the evidence is, and what a researcher should do about it. Use the \
item's id exactly as given.\n\
Do not invent results that are not in the text. Respond with a single JSON object: \
{\"overview\": \"<paragraph>\", \"analyses\": [{\"id\": \"<id>\", \"analysis\": \"<text>\"}]}.";

/// Overview and write-ups from the main LLM.
pub struct LlmNarrator {
    client: Arc<dyn ChatClient>,
}

impl LlmNarrator {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self { client }
    }

    fn prompt(report: &Report) -> String {
        let mut prompt = String::new();
        if !report.highlights.is_empty() {
            prompt.push_str("Blog posts from priority sources:\n");
            for section in &report.highlights {
                push_item(&mut prompt, section);
            }
            prompt.push('\n');
        }
        if !report.sections.is_empty() {
            prompt.push_str("Selected papers, best first:\n");
            for section in &report.sections {
                push_item(&mut prompt, section);
            }
        }
        prompt
    }
}

fn push_item(prompt: &mut String, section: &ReportSection) {
    let id = section
        .paper_ids
        .first()
        .map(PaperId::to_string)
        .unwrap_or_default();
    prompt.push_str(&format!("\n- id: {id}\n  title: {}\n", section.title));
    if !section.authors.is_empty() {
        prompt.push_str(&format!("  authors: {}\n", section.authors));
    }
    for (i, para) in section.body.iter().enumerate() {
        let text: String = if i == 0 {
            para.chars().take(PROMPT_ABSTRACT_CHARS).collect()
        } else {
            para.clone()
        };
        prompt.push_str(&format!("  {text}\n"));
    }
}

#[async_trait]
impl Narrator for LlmNarrator {
    async fn narrate(&self, report: &Report) -> Result<Narrative> {
        let request = ChatRequest::new(NARRATOR_PROMPT, Self::prompt(report))
            .with_temperature(0.5)
            .with_max_tokens(3000)
            .json();
        let reply: NarrativeReply = parse_json(&self.client.complete(request).await?)?;
        Ok(validate_narrative(report, reply))
    }
}

fn validate_overview(text: &str) -> Result<String> {
    validate_text("overview", text, MAX_OVERVIEW_CHARS)
}

fn validate_text(what: &str, text: &str, max_chars: usize) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(PaperFeederError::validation(format!("{what} is empty")));
    }
    let chars = text.chars().count();
    if chars > max_chars {
        return Err(PaperFeederError::validation(format!(
            "{what} is {chars} characters, limit {max_chars}"
        )));
    }
    Ok(text.to_string())
}

/// Keep the parts of a reply that pass validation. Write-ups for unknown or
/// repeated ids are dropped.
fn validate_narrative(report: &Report, reply: NarrativeReply) -> Narrative {
    let overview = match validate_overview(&reply.overview) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, "dropping overview");
            None
        }
    };

    let mut analyses = HashMap::new();
    for entry in reply.analyses {
        let id = PaperId::parse(&entry.id);
        let known = report.all_sections().any(|s| s.paper_ids.contains(&id));
        if !known {
            warn!(id = %entry.id, "dropping write-up for unknown id");
            continue;
        }
        if analyses.contains_key(&id) {
            warn!(%id, "dropping repeated write-up");
            continue;
        }
        match validate_text("write-up", &entry.analysis, MAX_ANALYSIS_CHARS) {
            Ok(text) => {
                analyses.insert(id, text);
            }
            Err(e) => warn!(%id, error = %e, "dropping write-up"),
        }
    }

    Narrative { overview, analyses }
}

fn apply_narrative(report: &mut Report, narrative: Narrative) {
    report.overview = narrative.overview;
    let mut analyses = narrative.analyses;
    for section in report.highlights.iter_mut().chain(report.sections.iter_mut()) {
        section.analysis = section
            .paper_ids
            .first()
            .and_then(|id| analyses.remove(id));
    }
}

/// Build the report, then ask `narrator` for an overview and write-ups when
/// there is anything to narrate. A failed narration is logged and left out.
#[instrument(skip_all, fields(papers = papers.len(), highlights = highlights.len()))]
pub async fn synthesize(
    papers: &[Paper],
    highlights: &[Paper],
    metadata: RunMetadata,
    narrator: Option<&dyn Narrator>,
) -> Result<Report> {
    let mut report = build_report(papers, highlights, metadata)?;

    if let Some(narrator) = narrator.filter(|_| !report.is_empty()) {
        match narrator.narrate(&report).await {
            Ok(narrative) => {
                debug!(analyses = narrative.analyses.len(), "narration received");
                apply_narrative(&mut report, narrative);
            }
            Err(e) => warn!(error = %e, "narration failed, continuing without it"),
        }
    }

    info!(
        sections = report.sections.len(),
        highlights = report.highlights.len(),
        overview = report.overview.is_some(),
        analyses = report.all_sections().filter(|s| s.analysis.is_some()).count(),
        "report synthesized"
    );
    Ok(report)
}
