//! Command-line interface of the `holo` frontend.
use clap::{Args, Parser, Subcommand};

/// Top-level CLI entry point of the Holo frontend.
#[derive(Parser, Debug)]
#[command(
    name = "holo",
    about = "Minimal configuration management engine for single hosts",
    version = option_env!("HOLO_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reconcile the selected entities
    Apply(ApplyOpts),
    /// Show how the selected entities differ from their declared state
    Diff(SelectorOpts),
    /// List the selected entities
    Scan(ScanOpts),
    /// Print version information
    Version,
}

/// Entity selectors: entity IDs, resource paths, or plugin IDs.
#[derive(Args, Debug, Clone, Default)]
pub struct SelectorOpts {
    /// Entities to process (all if none are given)
    pub selectors: Vec<String>,
}

/// Options for the `apply` subcommand.
#[derive(Args, Debug, Clone)]
pub struct ApplyOpts {
    /// Overwrite local modifications and restore deleted entities
    #[arg(short, long)]
    pub force: bool,

    /// Entities to operate on.
    #[command(flatten)]
    pub selection: SelectorOpts,
}

/// Options for the `scan` subcommand.
#[derive(Args, Debug, Clone)]
pub struct ScanOpts {
    /// Print only entity IDs
    #[arg(short, long, conflicts_with = "porcelain")]
    pub short: bool,

    /// Print the machine-readable plugin report
    #[arg(short, long)]
    pub porcelain: bool,

    /// Entities to operate on.
    #[command(flatten)]
    pub selection: SelectorOpts,
}
