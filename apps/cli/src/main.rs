//! PaperFeeder CLI: daily research paper digest.
//!
//! Fetches recent papers, filters them with keywords and an LLM, and mails
//! (or writes) a ranked digest.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
