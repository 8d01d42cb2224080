//! End-to-end run: fetch → keyword → coarse → enrich → fine → synthesize → deliver.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use paperfeeder_delivery::{Delivery, DeliveryReceipt, RenderedEmail, delivery_from_config, write_preview};
use paperfeeder_llm::{ChatClient, OpenAiCompatClient};
use paperfeeder_shared::{
    Paper, Report, Result, RunConfig, RunId, RunMetadata, StageCounts, TaskPool,
};
use paperfeeder_sources::{
    FetchWindow, PaperSource, SourceOutcome, build_client, fetch_all, sources_from_config,
};

use crate::coarse::{CoarseFilter, LlmScorer, PaperScorer};
use crate::fine::{FineFilter, LlmRanker, PaperRanker};
use crate::keyword::KeywordFilter;
use crate::research::{Enricher, NoopResearcher, Researcher, TavilyResearcher};
use crate::synthesis::{LlmNarrator, Narrator, synthesize};

/// Components for one run, selected once at startup.
///
/// `scorer` and `ranker` are `None` when LLM filtering is disabled; the
/// stages then pass papers through truncated. `narrator` is `None` when no
/// main LLM key is configured.
pub struct PipelineDeps {
    pub sources: Vec<Box<dyn PaperSource>>,
    pub scorer: Option<Arc<dyn PaperScorer>>,
    pub researcher: Arc<dyn Researcher>,
    pub ranker: Option<Arc<dyn PaperRanker>>,
    pub narrator: Option<Arc<dyn Narrator>>,
    pub delivery: Box<dyn Delivery>,
}

impl PipelineDeps {
    /// Build production components from resolved configuration.
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let sources = sources_from_config(config)?;

        let (scorer, ranker) = if config.filtering.llm_enabled {
            let client: Arc<dyn ChatClient> = Arc::new(OpenAiCompatClient::new(&config.filter_llm)?);
            let interests = &config.filtering.research_interests;
            let scorer: Arc<dyn PaperScorer> =
                Arc::new(LlmScorer::new(Arc::clone(&client), interests.clone()));
            let ranker: Arc<dyn PaperRanker> = Arc::new(LlmRanker::new(client, interests.clone()));
            (Some(scorer), Some(ranker))
        } else {
            (None, None)
        };

        let researcher: Arc<dyn Researcher> = match &config.research_api_key {
            Some(key) => Arc::new(TavilyResearcher::new(
                build_client(config.http_timeout())?,
                config.research.endpoint.clone(),
                key.clone(),
                config.research.max_results,
                config.research.max_notes_chars,
            )),
            None => {
                info!("no search API key configured, research notes will be empty");
                Arc::new(NoopResearcher)
            }
        };

        let narrator: Option<Arc<dyn Narrator>> = match config.llm.api_key {
            Some(_) => {
                let client: Arc<dyn ChatClient> = Arc::new(OpenAiCompatClient::new(&config.llm)?);
                Some(Arc::new(LlmNarrator::new(client)))
            }
            None => None,
        };

        Ok(Self {
            sources,
            scorer,
            researcher,
            ranker,
            narrator,
            delivery: delivery_from_config(config)?,
        })
    }
}

/// Outcome of one run.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: RunId,
    pub counts: StageCounts,
    pub sources: Vec<SourceOutcome>,
    pub duplicates: usize,
    /// `None` when nothing was fetched and the run stopped early.
    pub report: Option<Report>,
    pub receipt: Option<DeliveryReceipt>,
    /// Delivery error, when delivery failed.
    pub delivery_error: Option<String>,
    /// Where the report was written after a delivery failure.
    pub recovery_path: Option<PathBuf>,
    pub coarse_failures: usize,
    pub research_failures: usize,
    pub rank_violations: usize,
    pub ranking_failed: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Every source returned zero papers (or failed).
    pub fn nothing_fetched(&self) -> bool {
        self.counts.fetched == 0
    }

    pub fn delivery_failed(&self) -> bool {
        self.delivery_error.is_some()
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn phase(&self, name: &str);
    /// Called when a stage finishes with the working-set size it produced.
    fn stage_done(&self, name: &str, count: usize);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn stage_done(&self, _name: &str, _count: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Build components from `config` and run.
pub async fn run(config: &RunConfig, progress: &dyn ProgressReporter) -> Result<RunSummary> {
    let deps = PipelineDeps::from_config(config)?;
    run_pipeline(config, deps, progress).await
}

/// Run the full pipeline with the given components.
///
/// 1. Fetch every source and deduplicate
/// 2. Keyword filter
/// 3. Coarse LLM scoring, top K
/// 4. Research enrichment
/// 5. Fine LLM ranking, top N
/// 6. Synthesize the report
/// 7. Deliver (email or preview file)
///
/// Only construction errors and report rendering errors are returned; stage
/// failures degrade as described on each stage and delivery failures are
/// recorded on the summary.
#[instrument(skip_all, fields(days = config.days, dry_run = config.dry_run))]
pub async fn run_pipeline(
    config: &RunConfig,
    deps: PipelineDeps,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let start = Instant::now();
    let run_id = RunId::new();
    let pool = TaskPool::new(config.pipeline.concurrency, config.stage_timeout());
    let mut counts = StageCounts::default();

    info!(%run_id, "starting run");

    // --- Stage 1: Fetch ---
    progress.phase("Fetching papers");
    let window = FetchWindow::lookback(Utc::now(), config.days);
    let fetched = fetch_all(
        deps.sources,
        window,
        config.sources.dedup_policy,
        config.stage_timeout(),
    )
    .await;
    counts.fetched = fetched.papers.len();
    progress.stage_done("fetch", counts.fetched);

    let mut summary = RunSummary {
        run_id: run_id.clone(),
        counts,
        sources: fetched.sources,
        duplicates: fetched.duplicates,
        report: None,
        receipt: None,
        delivery_error: None,
        recovery_path: None,
        coarse_failures: 0,
        research_failures: 0,
        rank_violations: 0,
        ranking_failed: false,
        elapsed: Duration::ZERO,
    };

    if fetched.papers.is_empty() {
        warn!("no papers fetched from any source");
        summary.elapsed = start.elapsed();
        progress.done(&summary);
        return Ok(summary);
    }

    let (highlights, papers) = split_highlights(fetched.papers, config.blogs.max_highlights);

    // --- Stage 2: Keyword filter ---
    progress.phase("Keyword filter");
    let keyword = KeywordFilter::new(&config.keywords.include, &config.keywords.exclude);
    let papers = keyword.apply(papers);
    counts.keyword = papers.len();
    progress.stage_done("keyword", counts.keyword);

    // --- Stage 3: Coarse filter ---
    progress.phase("Scoring papers");
    let top_k = config.filtering.coarse.top_k;
    let papers = match &deps.scorer {
        Some(scorer) => {
            let coarse = CoarseFilter::new(
                Arc::clone(scorer),
                pool,
                config.coarse_retry(),
                top_k,
                config.filtering.coarse.min_candidates,
            );
            let out = coarse.run(papers).await;
            summary.coarse_failures = out.failures;
            out.papers
        }
        None => truncated(papers, top_k, "coarse"),
    };
    counts.coarse = papers.len();
    progress.stage_done("coarse", counts.coarse);

    // --- Stage 4: Enrichment ---
    progress.phase("Researching papers");
    let enriched = Enricher::new(Arc::clone(&deps.researcher), pool).run(papers).await;
    summary.research_failures = enriched.failures;
    let papers = enriched.papers;
    counts.enriched = papers.len();
    progress.stage_done("enrich", counts.enriched);

    // --- Stage 5: Fine filter ---
    progress.phase("Ranking papers");
    let top_n = config.filtering.fine.top_n;
    let papers = match &deps.ranker {
        Some(ranker) => {
            let fine = FineFilter::new(Arc::clone(ranker), config.fine_retry(), top_n);
            match tokio::time::timeout(config.stage_timeout(), fine.run(papers)).await {
                Ok(out) => {
                    summary.rank_violations = out.violations;
                    summary.ranking_failed = out.failed;
                    out.papers
                }
                Err(_) => {
                    warn!("ranking did not finish before the stage deadline");
                    summary.ranking_failed = true;
                    Vec::new()
                }
            }
        }
        None => truncated(papers, top_n, "fine"),
    };
    counts.ranked = papers.len();
    progress.stage_done("fine", counts.ranked);

    // --- Stage 6: Synthesis ---
    progress.phase("Writing report");
    let metadata = RunMetadata {
        window_start: window.start.date_naive(),
        window_end: window.end.date_naive(),
        counts,
    };
    let report = synthesize(&papers, &highlights, metadata, deps.narrator.as_deref()).await?;
    let email = RenderedEmail::from_report(&report)?;

    // --- Stage 7: Delivery ---
    progress.phase("Delivering report");
    match deps.delivery.deliver(&email).await {
        Ok(receipt) => {
            info!(channel = deps.delivery.name(), %receipt, "report delivered");
            summary.receipt = Some(receipt);
        }
        Err(e) => {
            error!(channel = deps.delivery.name(), error = %e, "delivery failed");
            summary.delivery_error = Some(e.to_string());
            summary.recovery_path = recover(config, &email).await;
        }
    }

    summary.counts = counts;
    summary.report = Some(report);
    summary.elapsed = start.elapsed();
    info!(
        %run_id,
        fetched = counts.fetched,
        keyword = counts.keyword,
        coarse = counts.coarse,
        ranked = counts.ranked,
        highlights = highlights.len(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "run complete"
    );
    progress.done(&summary);
    Ok(summary)
}

/// Priority blog posts skip filtering and go straight to the report, newest
/// first with undated posts last. Returns `(highlights, everything else)`.
fn split_highlights(papers: Vec<Paper>, limit: usize) -> (Vec<Paper>, Vec<Paper>) {
    let (mut highlights, rest): (Vec<Paper>, Vec<Paper>) =
        papers.into_iter().partition(Paper::is_priority);
    highlights.sort_by(|a, b| match (a.published_at(), b.published_at()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    if highlights.len() > limit {
        info!(posts = highlights.len(), limit, "capping blog highlights");
        highlights.truncate(limit);
    }
    (highlights, rest)
}

fn truncated(mut papers: Vec<Paper>, limit: usize, stage: &str) -> Vec<Paper> {
    info!(stage, limit, "LLM filtering disabled, passing papers through");
    papers.truncate(limit);
    papers
}

/// Write the undelivered report to the preview path.
async fn recover(config: &RunConfig, email: &RenderedEmail) -> Option<PathBuf> {
    let to = config
        .email
        .as_ref()
        .map(|e| e.to.as_str())
        .unwrap_or("dry-run");
    match write_preview(&config.preview_path, to, email).await {
        Ok(()) => {
            warn!(path = %config.preview_path.display(), "report saved locally after delivery failure");
            Some(config.preview_path.clone())
        }
        Err(e) => {
            error!(error = %e, "could not save report after delivery failure");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use paperfeeder_delivery::FileDelivery;
    use chrono::TimeZone;
    use paperfeeder_shared::{
        AppConfig, PaperFeederError, PaperId, RetryPolicy, RunOverrides, SCORING_FAILED_REASON,
        SourceTag,
    };
    use paperfeeder_sources::{ArxivClient, ManualSource};

    use super::*;
    use crate::coarse::ScoreVerdict;
    use crate::fine::RankEntry;

    struct ConstantScorer(f32);

    #[async_trait]
    impl PaperScorer for ConstantScorer {
        async fn score(&self, _paper: &Paper) -> Result<ScoreVerdict> {
            Ok(ScoreVerdict {
                score: self.0,
                reason: "constant".into(),
            })
        }
    }

    struct TitleRanker;

    #[async_trait]
    impl PaperRanker for TitleRanker {
        async fn rank(&self, papers: &[Paper], _top_n: usize) -> Result<Vec<RankEntry>> {
            let mut sorted: Vec<&Paper> = papers.iter().collect();
            sorted.sort_by(|a, b| a.title().cmp(b.title()));
            Ok(sorted
                .into_iter()
                .map(|p| RankEntry {
                    id: p.id().to_string(),
                    reason: "alphabetical".into(),
                })
                .collect())
        }
    }

    struct FailingDelivery;

    #[async_trait]
    impl Delivery for FailingDelivery {
        fn name(&self) -> &str {
            "failing"
        }
        async fn deliver(&self, _email: &RenderedEmail) -> Result<DeliveryReceipt> {
            Err(PaperFeederError::Delivery("HTTP 500".into()))
        }
    }

    struct EmptySource;

    #[async_trait]
    impl PaperSource for EmptySource {
        fn name(&self) -> &str {
            "empty"
        }
        async fn fetch(&self, _window: &FetchWindow) -> Result<Vec<Paper>> {
            Ok(Vec::new())
        }
    }

    struct FixedSource(Vec<Paper>);

    #[async_trait]
    impl PaperSource for FixedSource {
        fn name(&self) -> &str {
            "blogs"
        }
        async fn fetch(&self, _window: &FetchWindow) -> Result<Vec<Paper>> {
            Ok(self.0.clone())
        }
    }

    fn blog_post(slug: &str, title: &str, day: Option<u32>, priority: bool) -> Paper {
        let url = format!("https://lab.example.org/{slug}");
        Paper::new(PaperId::from_url(&url), url.as_str(), title, "Post text.", SourceTag::Blog)
            .with_published_at(day.map(|d| Utc.with_ymd_and_hms(2024, 1, d, 9, 0, 0).unwrap()))
            .with_notes(Some("From: Lab Blog".into()))
            .with_priority(priority)
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pf-pipeline-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manual_file(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("manual_papers.json");
        let body = serde_json::json!({
            "papers": [
                {"title": "Zeta Scaling Laws", "abstract": "Scaling.", "url": "https://example.org/zeta"},
                {"title": "Alpha Diffusion Reasoner", "abstract": "Diffusion.", "url": "https://arxiv.org/abs/2401.01234"},
                {"title": "Mu Tokenizers", "abstract": "Tokens.", "url": "https://example.org/mu"}
            ]
        });
        std::fs::write(&path, body.to_string()).unwrap();
        path
    }

    fn run_config(dir: &std::path::Path, manual: &std::path::Path) -> RunConfig {
        let mut app = AppConfig::default();
        app.sources.arxiv_enabled = false;
        app.sources.huggingface_enabled = false;
        app.sources.manual_enabled = true;
        app.sources.manual_path = manual.display().to_string();
        app.keywords.include = Vec::new();
        app.keywords.exclude = Vec::new();
        app.filtering.coarse.top_k = 20;
        app.filtering.coarse.backoff_ms = 0;
        app.filtering.fine.backoff_ms = 0;

        let overrides = RunOverrides {
            dry_run: true,
            output: Some(dir.join("report_preview.html")),
            ..Default::default()
        };
        let env: HashMap<&str, &str> = [("LLM_API_KEY", "sk-test")].into();
        RunConfig::resolve(&app, &overrides, |name| env.get(name).map(|v| v.to_string()))
            .expect("valid config")
    }

    fn manual_source(path: &std::path::Path) -> Box<dyn PaperSource> {
        let client = reqwest::Client::new();
        let arxiv = ArxivClient::new(client.clone(), "http://127.0.0.1:9/api/query", RetryPolicy::once());
        Box::new(ManualSource::load(
            path,
            client,
            arxiv,
            TaskPool::new(2, Duration::from_secs(5)),
        ))
    }

    fn deps(config: &RunConfig, manual: &std::path::Path) -> PipelineDeps {
        PipelineDeps {
            sources: vec![manual_source(manual)],
            scorer: Some(Arc::new(ConstantScorer(8.0))),
            researcher: Arc::new(NoopResearcher),
            ranker: Some(Arc::new(TitleRanker)),
            narrator: None,
            delivery: Box::new(FileDelivery::new(config.preview_path.clone(), "dry-run")),
        }
    }

    #[tokio::test]
    async fn dry_run_with_manual_papers_end_to_end() {
        let dir = temp_dir("e2e");
        let manual = manual_file(&dir);
        let config = run_config(&dir, &manual);

        let summary = run_pipeline(&config, deps(&config, &manual), &SilentProgress)
            .await
            .expect("pipeline");

        let report = summary.report.as_ref().expect("report");
        assert_eq!(
            report.titles(),
            vec!["Alpha Diffusion Reasoner", "Mu Tokenizers", "Zeta Scaling Laws"]
        );
        assert_eq!(
            summary.counts,
            StageCounts {
                fetched: 3,
                keyword: 3,
                coarse: 3,
                enriched: 3,
                ranked: 3
            }
        );
        assert!(report.sections.iter().all(|s| s.coarse_score == Some(8.0)));
        assert!(matches!(summary.receipt, Some(DeliveryReceipt::Written { .. })));

        let written = std::fs::read_to_string(&config.preview_path).expect("preview written");
        std::fs::remove_dir_all(&dir).ok();
        assert!(written.starts_with("<!-- TO: dry-run -->"));
        for title in ["Alpha Diffusion Reasoner", "Mu Tokenizers", "Zeta Scaling Laws"] {
            assert!(written.contains(title), "missing {title}");
        }
    }

    #[tokio::test]
    async fn same_input_gives_same_fingerprint() {
        let dir = temp_dir("idem");
        let manual = manual_file(&dir);
        let config = run_config(&dir, &manual);

        let a = run_pipeline(&config, deps(&config, &manual), &SilentProgress).await.unwrap();
        let b = run_pipeline(&config, deps(&config, &manual), &SilentProgress).await.unwrap();
        std::fs::remove_dir_all(&dir).ok();
        assert_eq!(
            a.report.unwrap().fingerprint,
            b.report.unwrap().fingerprint
        );
    }

    #[tokio::test]
    async fn disabled_llm_filtering_truncates_without_annotations() {
        let dir = temp_dir("nollm");
        let manual = manual_file(&dir);
        let mut config = run_config(&dir, &manual);
        config.filtering.coarse.top_k = 2;
        config.filtering.fine.top_n = 1;

        let mut d = deps(&config, &manual);
        d.scorer = None;
        d.ranker = None;
        let summary = run_pipeline(&config, d, &SilentProgress).await.unwrap();
        std::fs::remove_dir_all(&dir).ok();

        let report = summary.report.unwrap();
        assert_eq!(report.titles(), vec!["Zeta Scaling Laws"]);
        assert_eq!(report.sections[0].rank, None);
        assert_eq!(report.sections[0].coarse_score, None);
        assert_eq!(summary.counts.coarse, 2);
    }

    #[tokio::test]
    async fn delivery_failure_is_recorded_and_report_saved() {
        let dir = temp_dir("deliv");
        let manual = manual_file(&dir);
        let config = run_config(&dir, &manual);

        let mut d = deps(&config, &manual);
        d.delivery = Box::new(FailingDelivery);
        let summary = run_pipeline(&config, d, &SilentProgress).await.expect("non-fatal");

        assert!(summary.delivery_failed());
        assert_eq!(summary.recovery_path.as_deref(), Some(config.preview_path.as_path()));
        let saved = std::fs::read_to_string(&config.preview_path).expect("recovery file");
        std::fs::remove_dir_all(&dir).ok();
        assert!(saved.contains("Alpha Diffusion Reasoner"));
    }

    #[tokio::test]
    async fn nothing_fetched_stops_before_delivery() {
        let dir = temp_dir("empty");
        let manual = manual_file(&dir);
        let config = run_config(&dir, &manual);

        let mut d = deps(&config, &manual);
        d.sources = vec![Box::new(EmptySource)];
        let summary = run_pipeline(&config, d, &SilentProgress).await.unwrap();
        let preview_exists = config.preview_path.exists();
        std::fs::remove_dir_all(&dir).ok();

        assert!(summary.nothing_fetched());
        assert!(summary.report.is_none());
        assert!(!preview_exists);
    }

    #[tokio::test]
    async fn failed_scoring_keeps_papers_eligible() {
        struct Flaky;

        #[async_trait]
        impl PaperScorer for Flaky {
            async fn score(&self, paper: &Paper) -> Result<ScoreVerdict> {
                if paper.title().starts_with("Mu") {
                    return Err(PaperFeederError::Llm("timeout".into()));
                }
                Ok(ScoreVerdict {
                    score: 5.0,
                    reason: "ok".into(),
                })
            }
        }

        let dir = temp_dir("flaky");
        let manual = manual_file(&dir);
        let config = run_config(&dir, &manual);

        let mut d = deps(&config, &manual);
        d.scorer = Some(Arc::new(Flaky));
        let summary = run_pipeline(&config, d, &SilentProgress).await.unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(summary.coarse_failures, 1);
        let report = summary.report.unwrap();
        assert_eq!(report.sections.len(), 3);
        let mu = report.sections.iter().find(|s| s.title == "Mu Tokenizers").unwrap();
        assert_eq!(mu.coarse_score, Some(0.0));
        assert!(!mu.body.iter().any(|b| b.contains(SCORING_FAILED_REASON)));
    }

    #[tokio::test]
    async fn priority_blog_posts_bypass_filters_into_highlights() {
        let dir = temp_dir("blogs");
        let manual = manual_file(&dir);
        let mut config = run_config(&dir, &manual);
        config.keywords.include = vec!["diffusion".into()];
        config.blogs.max_highlights = 2;

        let mut d = deps(&config, &manual);
        d.sources.push(Box::new(FixedSource(vec![
            blog_post("undated", "Undated Note", None, true),
            blog_post("older", "Older Update", Some(3), true),
            blog_post("newer", "Newer Update", Some(5), true),
            blog_post("forum", "Forum Thread", Some(6), false),
        ])));
        let summary = run_pipeline(&config, d, &SilentProgress).await.unwrap();
        std::fs::remove_dir_all(&dir).ok();

        let report = summary.report.unwrap();
        let highlights: Vec<&str> = report.highlights.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(highlights, vec!["Newer Update", "Older Update"]);
        // Non-priority posts compete with papers and fail the keyword filter here.
        assert_eq!(report.titles(), vec!["Alpha Diffusion Reasoner"]);
        assert_eq!(summary.counts.fetched, 7);
        assert_eq!(summary.counts.keyword, 1);
    }

    #[test]
    fn highlights_sort_newest_first_with_undated_last() {
        let (highlights, rest) = split_highlights(
            vec![
                blog_post("a", "Undated", None, true),
                blog_post("b", "Paper-like", Some(4), false),
                blog_post("c", "Old", Some(1), true),
                blog_post("d", "New", Some(9), true),
            ],
            10,
        );
        let titles: Vec<&str> = highlights.iter().map(|p| p.title()).collect();
        assert_eq!(titles, vec!["New", "Old", "Undated"]);
        assert_eq!(rest.len(), 1);
    }
}
