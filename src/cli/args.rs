//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::cli::commands::{
    completions::CompletionsArgs, ingest::IngestArgs, init::InitArgs, stats::StatsArgs,
    synth::SynthArgs,
};

#[derive(Parser)]
#[command(name = "dsml")]
#[command(author, version, about = "Dataset surrogate-key manager")]
#[command(long_about = "Scans sparse sample/feature datasets into SQLite, resolving surrogate keys in batches.")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(clap::Args, Clone, Debug, Default)]
pub struct GlobalOpts {
    /// SQLite database file (default: dsml.db, or `database` from config)
    #[arg(long, short = 'd', global = true)]
    pub database: Option<PathBuf>,

    /// Config file to use instead of ./dsml.yaml
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the dataset tables
    Init(InitArgs),

    /// Write a random sparse dataset as CSV
    Synth(SynthArgs),

    /// Scan a sparse CSV dataset into the database
    Ingest(IngestArgs),

    /// Show row counts per table
    Stats(StatsArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON format (for programming)
    Json,
}
