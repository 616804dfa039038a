//! CLI argument parsing for contextstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cs")]
#[command(author, version, about = "Archival memory with semantic retrieval", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Archive a piece of content
    Record {
        /// Content to archive
        #[arg(required = true)]
        content: String,

        /// Repo this row is scoped to
        #[arg(long)]
        repo: Option<String>,

        /// Task this row is scoped to
        #[arg(long)]
        task_id: Option<String>,

        /// Visible to every task, not just the scoping task
        #[arg(long)]
        global: bool,
    },

    /// Semantic search over archived content
    Search {
        /// Query text
        #[arg(required = true)]
        query: String,

        /// Repo to scope the search to
        #[arg(long)]
        repo: Option<String>,

        /// Task to scope the search to
        #[arg(long)]
        task_id: Option<String>,

        /// Include globally-scoped rows alongside task-scoped ones
        #[arg(long)]
        include_global: bool,

        /// Minimum similarity (default from config, usually 0.7)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Record an outcome (success/failure) against a learned pattern
    PatternOutcome {
        /// Pattern id
        #[arg(required = true)]
        id: String,

        /// Whether the application of this pattern succeeded
        #[arg(long)]
        success: bool,
    },

    /// List patterns eligible for global promotion
    PatternsEligible,

    /// Remove archival rows past their expiry
    CleanupExpired,
}
