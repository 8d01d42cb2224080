//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use paperfeeder_core::{ProgressReporter, RunSummary};
use paperfeeder_shared::{
    AppConfig, RunConfig, RunOverrides, config_file_path, init_config_at, load_config,
    load_config_from,
};
use tracing::info;

/// Exit code when every source came back empty.
const EXIT_NOTHING_FETCHED: u8 = 2;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PaperFeeder: a daily, ranked digest of new research papers.
#[derive(Parser)]
#[command(
    name = "paperfeeder",
    version,
    about = "Fetch recent papers, filter and rank them with an LLM, and deliver a daily digest.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full pipeline once.
    Run {
        /// Config file (defaults to ~/.paperfeeder/paperfeeder.toml).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Lookback window in days (overrides `sources.days`).
        #[arg(short, long)]
        days: Option<u32>,

        /// Write the report to a local file instead of emailing it.
        #[arg(long)]
        dry_run: bool,

        /// Preview file path (overrides `output.preview_path`).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip the arXiv, HuggingFace and manual paper sources.
        #[arg(long)]
        no_papers: bool,

        /// Skip blog feeds.
        #[arg(long)]
        no_blogs: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init {
        /// Where to write the file (defaults to ~/.paperfeeder/paperfeeder.toml).
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Show resolved configuration.
    Show {
        /// Config file to read.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. `RUST_LOG` takes precedence.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "paperfeeder=info",
        1 => "paperfeeder=debug",
        _ => "paperfeeder=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    let show_spinner = matches!(cli.log_format, LogFormat::Text);
    match cli.command {
        Command::Run {
            config,
            days,
            dry_run,
            output,
            no_papers,
            no_blogs,
        } => {
            let overrides = RunOverrides {
                days,
                dry_run,
                output,
                no_papers,
                no_blogs,
            };
            cmd_run(config.as_deref(), &overrides, show_spinner).await
        }
        Command::Config { action } => {
            match action {
                ConfigAction::Init { path, force } => cmd_config_init(path, force)?,
                ConfigAction::Show { config } => cmd_config_show(config.as_deref())?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

async fn cmd_run(
    config_path: Option<&Path>,
    overrides: &RunOverrides,
    show_spinner: bool,
) -> Result<ExitCode> {
    let app = load(config_path)?;
    // Fatal configuration problems surface here, before any network call.
    let config = RunConfig::from_env(&app, overrides)?;

    info!(
        days = config.days,
        dry_run = config.dry_run,
        llm_filtering = config.filtering.llm_enabled,
        "starting daily digest"
    );

    let reporter = CliProgress::new(show_spinner);
    let summary = paperfeeder_core::run(&config, &reporter)
        .await
        .wrap_err("pipeline run failed")?;

    print_summary(&summary);

    if summary.nothing_fetched() {
        eprintln!("  No papers were fetched from any source.");
        return Ok(ExitCode::from(EXIT_NOTHING_FETCHED));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &RunSummary) {
    let c = &summary.counts;
    println!();
    println!("  Run:       {}", summary.run_id);
    for source in &summary.sources {
        match &source.error {
            Some(err) => println!("  Source:    {} failed ({err})", source.name),
            None => println!("  Source:    {} ({} papers)", source.name, source.count),
        }
    }
    println!(
        "  Papers:    fetched {} → keyword {} → coarse {} → enriched {} → ranked {}",
        c.fetched, c.keyword, c.coarse, c.enriched, c.ranked
    );
    if summary.duplicates > 0 {
        println!("  Merged:    {} duplicates", summary.duplicates);
    }
    if summary.coarse_failures > 0 {
        println!("  Scoring:   {} papers could not be scored", summary.coarse_failures);
    }
    if summary.research_failures > 0 {
        println!("  Research:  {} lookups failed", summary.research_failures);
    }
    if summary.rank_violations > 0 {
        println!("  Ranking:   {} invalid entries dropped", summary.rank_violations);
    }
    if summary.ranking_failed {
        println!("  Ranking:   failed, digest has no ranked papers");
    }
    if let Some(report) = &summary.report {
        for highlight in &report.highlights {
            println!("   * {}", highlight.title);
        }
        for (i, title) in report.titles().iter().enumerate() {
            println!("  {:>2}. {title}", i + 1);
        }
    }
    if let Some(receipt) = &summary.receipt {
        println!("  Delivery:  {receipt}");
    }
    if let Some(err) = &summary.delivery_error {
        eprintln!("  Warning:   delivery failed: {err}");
        if let Some(path) = &summary.recovery_path {
            eprintln!("             report saved to {}", path.display());
        }
    }
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new(visible: bool) -> Self {
        if !visible {
            return Self {
                spinner: ProgressBar::hidden(),
            };
        }
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn stage_done(&self, name: &str, count: usize) {
        self.spinner.println(format!("  ✓ {name}: {count}"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(p) => p,
        None => config_file_path()?,
    };
    if path.exists() && !force {
        println!("Config already exists at: {} (use --force to overwrite)", path.display());
        return Ok(());
    }
    init_config_at(&path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = load(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");

    println!("# Credentials (from environment)");
    for name in credential_envs(&config) {
        let state = match std::env::var(&name) {
            Ok(v) if !v.trim().is_empty() => "set",
            _ => "missing",
        };
        println!("# {name}: {state}");
    }
    Ok(())
}

fn credential_envs(config: &AppConfig) -> Vec<String> {
    let mut names = vec![config.llm.api_key_env.clone(), config.filter_llm.api_key_env.clone()];
    names.extend(config.filter_llm.fallback_key_env.clone());
    names.push(config.research.api_key_env.clone());
    names.push(config.email.api_key_env.clone());
    names.push(config.email.to_env.clone());
    let mut seen = std::collections::HashSet::new();
    names.retain(|n| seen.insert(n.clone()));
    names
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "paperfeeder", "-vv", "run", "--days", "3", "--dry-run", "--output", "out.html",
            "--no-blogs",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Run {
                days,
                dry_run,
                output,
                config,
                no_papers,
                no_blogs,
            } => {
                assert_eq!(days, Some(3));
                assert!(dry_run);
                assert!(!no_papers);
                assert!(no_blogs);
                assert_eq!(output, Some(PathBuf::from("out.html")));
                assert!(config.is_none());
            }
            Command::Config { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn parses_json_log_format_after_subcommand() {
        let cli = Cli::try_parse_from(["paperfeeder", "config", "show", "--log-format", "json"])
            .expect("parse");
        assert!(matches!(cli.log_format, LogFormat::Json));
    }

    #[test]
    fn credential_names_are_unique() {
        let names = credential_envs(&AppConfig::default());
        assert_eq!(
            names,
            vec!["LLM_API_KEY", "LLM_FILTER_API_KEY", "TAVILY_API_KEY", "RESEND_API_KEY", "EMAIL_TO"]
        );
    }
}
