//! Core pipeline orchestration and domain logic for PaperFeeder.
//!
//! This crate ties together the paper sources, the keyword and LLM filters,
//! research enrichment, report synthesis, and delivery into one daily run
//! (see [`pipeline::run`]).

pub mod coarse;
pub mod fine;
pub mod keyword;
pub mod pipeline;
pub mod research;
pub mod synthesis;

pub use pipeline::{
    PipelineDeps, ProgressReporter, RunSummary, SilentProgress, run, run_pipeline,
};
