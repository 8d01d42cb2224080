//! Shared types, error model, and configuration for PaperFeeder.
//!
//! This crate is the foundation depended on by all other PaperFeeder crates.
//! It provides:
//! - [`PaperFeederError`]: the unified error type
//! - Domain types ([`Paper`], [`PaperId`], [`Report`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)
//! - Bounded retry ([`RetryPolicy`], [`retry`]) and fan-out ([`TaskPool`])

pub mod config;
pub mod error;
pub mod pool;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BlogFeed, BlogsConfig, CoarseConfig, DedupPolicy, EmailConfig, EmailSettings, FilteringConfig, FineConfig,
    KeywordsConfig, LlmConfig, LlmEndpoint, OutputConfig, PipelineConfig, ResearchConfig,
    RunConfig, RunOverrides, SourcesConfig, config_dir, config_file_path, infer_base_url,
    init_config, init_config_at, load_config, load_config_from,
};
pub use error::{PaperFeederError, Result};
pub use pool::TaskPool;
pub use retry::{RetryPolicy, retry};
pub use types::{
    Paper, PaperId, Report, ReportSection, RunId, RunMetadata, SCORING_FAILED_REASON, SourceTag,
    StageCounts, arxiv_id_from_url, is_arxiv_id,
};
