//! Application configuration for PaperFeeder.
//!
//! User config lives at `~/.paperfeeder/paperfeeder.toml`.
//! Credentials are never stored in the file: each section names the
//! environment variable that holds them, and [`RunConfig::resolve`] reads the
//! environment exactly once at startup. CLI flags override config file values,
//! which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PaperFeederError, Result};
use crate::retry::RetryPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "paperfeeder.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".paperfeeder";

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ---------------------------------------------------------------------------
// Config structs (matching paperfeeder.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub blogs: BlogsConfig,

    #[serde(default)]
    pub keywords: KeywordsConfig,

    /// Main LLM (report overview).
    #[serde(default)]
    pub llm: LlmConfig,

    /// Cheaper LLM used for coarse scoring and fine ranking.
    #[serde(default = "default_filter_llm")]
    pub filter_llm: LlmConfig,

    #[serde(default)]
    pub filtering: FilteringConfig,

    #[serde(default)]
    pub research: ResearchConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sources: SourcesConfig::default(),
            blogs: BlogsConfig::default(),
            keywords: KeywordsConfig::default(),
            llm: LlmConfig::default(),
            filter_llm: default_filter_llm(),
            filtering: FilteringConfig::default(),
            research: ResearchConfig::default(),
            pipeline: PipelineConfig::default(),
            email: EmailConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// How duplicate papers across sources are collapsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep the first record seen in source order.
    #[default]
    FirstSeen,
    /// Keep the most complete record, at the first-seen position.
    Richest,
}

/// `[sources]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Lookback window in days.
    #[serde(default = "default_days")]
    pub days: u32,

    #[serde(default = "default_true")]
    pub arxiv_enabled: bool,

    #[serde(default = "default_arxiv_categories")]
    pub arxiv_categories: Vec<String>,

    #[serde(default = "default_arxiv_max_results")]
    pub arxiv_max_results: u32,

    #[serde(default = "default_arxiv_endpoint")]
    pub arxiv_endpoint: String,

    #[serde(default = "default_true")]
    pub huggingface_enabled: bool,

    /// Tried in order; the first endpoint answering 2xx wins.
    #[serde(default = "default_hf_endpoints")]
    pub huggingface_endpoints: Vec<String>,

    #[serde(default = "default_true")]
    pub manual_enabled: bool,

    #[serde(default = "default_manual_path")]
    pub manual_path: String,

    #[serde(default)]
    pub dedup_policy: DedupPolicy,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            days: default_days(),
            arxiv_enabled: true,
            arxiv_categories: default_arxiv_categories(),
            arxiv_max_results: default_arxiv_max_results(),
            arxiv_endpoint: default_arxiv_endpoint(),
            huggingface_enabled: true,
            huggingface_endpoints: default_hf_endpoints(),
            manual_enabled: true,
            manual_path: default_manual_path(),
            dedup_policy: DedupPolicy::default(),
        }
    }
}

impl SourcesConfig {
    pub fn any_enabled(&self) -> bool {
        self.arxiv_enabled || self.huggingface_enabled || self.manual_enabled
    }
}

fn default_days() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_arxiv_categories() -> Vec<String> {
    vec!["cs.LG".into(), "cs.CL".into()]
}
fn default_arxiv_max_results() -> u32 {
    300
}
fn default_arxiv_endpoint() -> String {
    "https://export.arxiv.org/api/query".into()
}
fn default_hf_endpoints() -> Vec<String> {
    vec![
        "https://huggingface.co/api/daily_papers".into(),
        "https://hf-mirror.com/api/daily_papers".into(),
    ]
}
fn default_manual_path() -> String {
    "manual_papers.json".into()
}

/// `[blogs]` section: RSS/Atom feeds of research blogs.
///
/// Posts from `priority` feeds skip filtering and research and appear as
/// highlights in the report. Posts from other feeds go through the pipeline
/// like any paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlogsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lookback window for posts, independent of `sources.days`.
    #[serde(default = "default_blog_days")]
    pub days: u32,

    /// Entries read from the top of each feed.
    #[serde(default = "default_max_posts_per_feed")]
    pub max_posts_per_feed: usize,

    /// Priority posts shown in the report, newest first.
    #[serde(default = "default_max_highlights")]
    pub max_highlights: usize,

    /// Feed keys to fetch; empty fetches every feed.
    #[serde(default)]
    pub only: Vec<String>,

    #[serde(default = "default_blog_feeds")]
    pub feeds: Vec<BlogFeed>,
}

impl Default for BlogsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            days: default_blog_days(),
            max_posts_per_feed: default_max_posts_per_feed(),
            max_highlights: default_max_highlights(),
            only: Vec::new(),
            feeds: default_blog_feeds(),
        }
    }
}

impl BlogsConfig {
    /// Feeds selected by `only`, in configured order.
    pub fn active_feeds(&self) -> Vec<BlogFeed> {
        self.feeds
            .iter()
            .filter(|f| self.only.is_empty() || self.only.contains(&f.key))
            .cloned()
            .collect()
    }
}

/// One blog feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlogFeed {
    pub key: String,
    pub name: String,
    pub feed_url: String,
    #[serde(default)]
    pub priority: bool,
}

impl BlogFeed {
    fn new(key: &str, name: &str, feed_url: &str, priority: bool) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            feed_url: feed_url.into(),
            priority,
        }
    }
}

fn default_blog_days() -> u32 {
    7
}
fn default_max_posts_per_feed() -> usize {
    5
}
fn default_max_highlights() -> usize {
    5
}
fn default_blog_feeds() -> Vec<BlogFeed> {
    vec![
        BlogFeed::new("openai", "OpenAI Blog", "https://openai.com/news/rss.xml", true),
        BlogFeed::new("anthropic", "Anthropic News & Research", "https://www.anthropic.com/index.xml", true),
        BlogFeed::new("deepmind", "Google DeepMind", "https://deepmind.google/blog/rss.xml", true),
        BlogFeed::new("huggingface", "Hugging Face Blog", "https://huggingface.co/blog/feed.xml", true),
        BlogFeed::new("meta_research", "Meta Research", "https://research.facebook.com/feed/", true),
        BlogFeed::new("karpathy", "Andrej Karpathy", "https://karpathy.bearblog.dev/feed/", true),
        BlogFeed::new("lilianweng", "Lil'Log (Lilian Weng)", "https://lilianweng.github.io/index.xml", true),
        BlogFeed::new("colah", "Christopher Olah", "https://colah.github.io/rss.xml", true),
        BlogFeed::new("bair", "Berkeley AI Research (BAIR)", "https://bair.berkeley.edu/blog/feed.xml", true),
        BlogFeed::new(
            "nvidia_research",
            "NVIDIA Research",
            "https://developer.nvidia.com/blog/category/simulation-graphics/feed/",
            false,
        ),
        BlogFeed::new("alignment_forum", "AI Alignment Forum", "https://www.alignmentforum.org/feed.xml", false),
    ]
}

/// `[keywords]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordsConfig {
    /// Empty list matches every paper.
    #[serde(default = "default_include_keywords")]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for KeywordsConfig {
    fn default() -> Self {
        Self {
            include: default_include_keywords(),
            exclude: Vec::new(),
        }
    }
}

fn default_include_keywords() -> Vec<String> {
    [
        "diffusion model",
        "diffusion language",
        "flow matching",
        "reasoning",
        "large language model",
        "representation learning",
        "alignment",
        "tokenization",
        "latent reasoning",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[llm]` / `[filter_llm]` sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    /// Fallback key env var consulted when `api_key_env` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_key_env: Option<String>,

    /// Explicit base URL. When absent it is taken from `base_url_env`, then
    /// inferred from the model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_llm_base_url_env")]
    pub base_url_env: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_model_env")]
    pub model_env: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_key_env(),
            fallback_key_env: None,
            base_url: None,
            base_url_env: default_llm_base_url_env(),
            model: default_llm_model(),
            model_env: default_llm_model_env(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_filter_llm() -> LlmConfig {
    LlmConfig {
        api_key_env: "LLM_FILTER_API_KEY".into(),
        fallback_key_env: Some(default_llm_key_env()),
        base_url: None,
        base_url_env: "LLM_FILTER_BASE_URL".into(),
        model: default_llm_model(),
        model_env: "LLM_FILTER_MODEL".into(),
        timeout_secs: default_llm_timeout(),
    }
}

fn default_llm_key_env() -> String {
    "LLM_API_KEY".into()
}
fn default_llm_base_url_env() -> String {
    "LLM_BASE_URL".into()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}
fn default_llm_model_env() -> String {
    "LLM_MODEL".into()
}
fn default_llm_timeout() -> u64 {
    60
}

/// `[filtering]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteringConfig {
    /// When false, coarse and fine stages pass papers through truncated.
    #[serde(default = "default_true")]
    pub llm_enabled: bool,

    /// Rubric handed to both LLM stages.
    #[serde(default = "default_research_interests")]
    pub research_interests: String,

    #[serde(default)]
    pub coarse: CoarseConfig,

    #[serde(default)]
    pub fine: FineConfig,
}

impl Default for FilteringConfig {
    fn default() -> Self {
        Self {
            llm_enabled: true,
            research_interests: default_research_interests(),
            coarse: CoarseConfig::default(),
            fine: FineConfig::default(),
        }
    }
}

fn default_research_interests() -> String {
    "Generative models (especially diffusion models for language), LLM reasoning \
     (chain-of-thought, latent reasoning), representation learning and tokenization, \
     AI safety benchmarks and alignment."
        .into()
}

/// `[filtering.coarse]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoarseConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Skip scoring when the keyword stage yields this many papers or fewer.
    #[serde(default)]
    pub min_candidates: usize,

    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for CoarseConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_candidates: 0,
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// `[filtering.fine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for FineConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_top_k() -> usize {
    20
}
fn default_top_n() -> usize {
    5
}
fn default_attempts() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    1000
}

/// `[research]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "default_research_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_research_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_research_max_results")]
    pub max_results: u32,

    #[serde(default = "default_max_notes_chars")]
    pub max_notes_chars: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_research_key_env(),
            endpoint: default_research_endpoint(),
            max_results: default_research_max_results(),
            max_notes_chars: default_max_notes_chars(),
        }
    }
}

fn default_research_key_env() -> String {
    "TAVILY_API_KEY".into()
}
fn default_research_endpoint() -> String {
    "https://api.tavily.com/search".into()
}
fn default_research_max_results() -> u32 {
    5
}
fn default_max_notes_chars() -> usize {
    1200
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum in-flight external calls within one stage.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Deadline for one stage's fan-out.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// Per-request timeout for source and research HTTP clients.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Attempts for source fetches.
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            stage_timeout_secs: default_stage_timeout(),
            http_timeout_secs: default_http_timeout(),
            fetch_attempts: default_fetch_attempts(),
        }
    }
}

fn default_concurrency() -> usize {
    5
}
fn default_stage_timeout() -> u64 {
    300
}
fn default_http_timeout() -> u64 {
    30
}
fn default_fetch_attempts() -> u32 {
    3
}

/// `[email]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_email_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_email_to_env")]
    pub to_env: String,

    #[serde(default = "default_email_from")]
    pub from: String,

    #[serde(default = "default_email_endpoint")]
    pub endpoint: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_email_key_env(),
            to_env: default_email_to_env(),
            from: default_email_from(),
            endpoint: default_email_endpoint(),
        }
    }
}

fn default_email_key_env() -> String {
    "RESEND_API_KEY".into()
}
fn default_email_to_env() -> String {
    "EMAIL_TO".into()
}
fn default_email_from() -> String {
    "paperfeeder@resend.dev".into()
}
fn default_email_endpoint() -> String {
    "https://api.resend.com/emails".into()
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Dry-run report and delivery-failure recovery artifact.
    #[serde(default = "default_preview_path")]
    pub preview_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            preview_path: default_preview_path(),
        }
    }
}

fn default_preview_path() -> String {
    "report_preview.html".into()
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + env + CLI flags)
// ---------------------------------------------------------------------------

/// CLI flags that override file values for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub days: Option<u32>,
    pub dry_run: bool,
    pub output: Option<PathBuf>,
    /// Disable the arXiv, HuggingFace and manual sources.
    pub no_papers: bool,
    /// Disable blog feeds.
    pub no_blogs: bool,
}

/// A resolved OpenAI-compatible endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct LlmEndpoint {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for LlmEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmEndpoint")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Resolved email delivery settings (only present outside dry-run).
#[derive(Clone, PartialEq, Eq)]
pub struct EmailSettings {
    pub api_key: String,
    pub to: String,
    pub from: String,
    pub endpoint: String,
}

impl std::fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSettings")
            .field("to", &self.to)
            .field("from", &self.from)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Immutable runtime configuration handed to every component at construction.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub sources: SourcesConfig,
    pub blogs: BlogsConfig,
    pub keywords: KeywordsConfig,
    pub filtering: FilteringConfig,
    pub research: ResearchConfig,
    pub pipeline: PipelineConfig,

    pub days: u32,
    pub dry_run: bool,
    pub preview_path: PathBuf,

    pub llm: LlmEndpoint,
    pub filter_llm: LlmEndpoint,
    /// `None` selects the no-op researcher.
    pub research_api_key: Option<String>,
    /// `None` only in dry-run.
    pub email: Option<EmailSettings>,
}

impl RunConfig {
    /// Resolve against the process environment.
    pub fn from_env(app: &AppConfig, overrides: &RunOverrides) -> Result<Self> {
        Self::resolve(app, overrides, |name| std::env::var(name).ok())
    }

    /// Merge file config, CLI overrides and credentials looked up through `env`.
    ///
    /// `--no-papers` and `--no-blogs` are applied before anything else.
    /// Fails with a config error (fatal) when no source is enabled, when LLM
    /// filtering is on without a filter key, or when email credentials are
    /// missing outside dry-run.
    pub fn resolve(
        app: &AppConfig,
        overrides: &RunOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let lookup = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let mut sources = app.sources.clone();
        if overrides.no_papers {
            sources.arxiv_enabled = false;
            sources.huggingface_enabled = false;
            sources.manual_enabled = false;
        }
        let mut blogs = app.blogs.clone();
        if overrides.no_blogs {
            blogs.enabled = false;
        }
        if !sources.any_enabled() && !(blogs.enabled && !blogs.active_feeds().is_empty()) {
            return Err(PaperFeederError::config(
                "no sources enabled; enable at least one of arxiv, huggingface, manual or blogs",
            ));
        }

        let llm = resolve_endpoint(&app.llm, &lookup);
        let filter_llm = resolve_endpoint(&app.filter_llm, &lookup);

        if app.filtering.llm_enabled && filter_llm.api_key.is_none() {
            return Err(PaperFeederError::config(format!(
                "LLM filtering is enabled but no filter API key was found. Set {} (or {}), \
                 or disable filtering with `llm_enabled = false`.",
                app.filter_llm.api_key_env,
                app.filter_llm
                    .fallback_key_env
                    .as_deref()
                    .unwrap_or(&app.llm.api_key_env),
            )));
        }

        let email = if overrides.dry_run {
            None
        } else {
            let api_key = lookup(&app.email.api_key_env).ok_or_else(|| {
                PaperFeederError::config(format!(
                    "email API key not found. Set {} or run with --dry-run.",
                    app.email.api_key_env
                ))
            })?;
            let to = lookup(&app.email.to_env).ok_or_else(|| {
                PaperFeederError::config(format!(
                    "email recipient not found. Set {} or run with --dry-run.",
                    app.email.to_env
                ))
            })?;
            Some(EmailSettings {
                api_key,
                to,
                from: app.email.from.clone(),
                endpoint: app.email.endpoint.clone(),
            })
        };

        let days = overrides.days.unwrap_or(app.sources.days);
        if days == 0 {
            return Err(PaperFeederError::config("lookback days must be at least 1"));
        }

        Ok(Self {
            sources,
            blogs,
            keywords: app.keywords.clone(),
            filtering: app.filtering.clone(),
            research: app.research.clone(),
            pipeline: app.pipeline.clone(),
            days,
            dry_run: overrides.dry_run,
            preview_path: overrides
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from(&app.output.preview_path)),
            llm,
            filter_llm,
            research_api_key: lookup(&app.research.api_key_env),
            email,
        })
    }

    pub fn coarse_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.filtering.coarse.attempts,
            Duration::from_millis(self.filtering.coarse.backoff_ms),
        )
    }

    pub fn fine_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.filtering.fine.attempts,
            Duration::from_millis(self.filtering.fine.backoff_ms),
        )
    }

    pub fn fetch_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.pipeline.fetch_attempts, Duration::from_secs(2))
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.stage_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.http_timeout_secs)
    }
}

fn resolve_endpoint(cfg: &LlmConfig, lookup: &impl Fn(&str) -> Option<String>) -> LlmEndpoint {
    let api_key = lookup(&cfg.api_key_env).or_else(|| {
        cfg.fallback_key_env
            .as_deref()
            .and_then(|fallback| lookup(fallback))
    });
    let model = lookup(&cfg.model_env).unwrap_or_else(|| cfg.model.clone());
    let base_url = cfg
        .base_url
        .clone()
        .or_else(|| lookup(&cfg.base_url_env))
        .unwrap_or_else(|| infer_base_url(&model).to_string());

    LlmEndpoint {
        base_url: base_url.trim_end_matches('/').to_string(),
        model,
        api_key,
        timeout: Duration::from_secs(cfg.timeout_secs),
    }
}

/// Pick an OpenAI-compatible base URL for well-known model families.
pub fn infer_base_url(model: &str) -> &'static str {
    let model = model.to_lowercase();
    if model.contains("deepseek") {
        "https://api.deepseek.com/v1"
    } else if model.contains("claude") {
        "https://api.anthropic.com/v1"
    } else if model.contains("gemini") {
        "https://generativelanguage.googleapis.com/v1beta/openai"
    } else if model.contains("qwen") {
        "https://dashscope.aliyuncs.com/compatible-mode/v1"
    } else {
        OPENAI_BASE_URL
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.paperfeeder/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PaperFeederError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.paperfeeder/paperfeeder.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PaperFeederError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PaperFeederError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| PaperFeederError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| PaperFeederError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| PaperFeederError::io(path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}
