//! CLI command definitions.
//!
//! The operational surface is deliberately small: drive a task to a PR
//! (or dry-run its diff), check on one, and read memory back. Anything
//! richer belongs to an external collaborator (a UI, a chat bot), not
//! this binary.

use clap::{Parser, Subcommand, ValueEnum};

/// TaskDaemon - autonomous development pipeline
#[derive(Parser)]
#[command(name = "taskdaemon", about = "Issue in, draft pull request out", version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<std::path::PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true, help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Drive (repo, issueNumber) through the pipeline, or dry-run the diff
    Execute {
        /// Repository in "owner/name" form
        repo: String,

        /// Issue number
        issue_number: u64,

        /// Issue title (only read on first enqueue of this repo/issue)
        #[arg(long)]
        title: Option<String>,

        /// Issue body (only read on first enqueue of this repo/issue)
        #[arg(long)]
        body: Option<String>,

        /// Produce the post-Coding diff without opening a PR
        #[arg(long)]
        dry_run: bool,
    },

    /// Report a task's phase, attempts, last error, and PR link
    Status {
        /// Task id returned by `execute`
        task_id: String,
    },

    /// Read-only memory query
    Memory {
        /// Repository in "owner/name" form
        repo: String,

        /// What to read back
        #[arg(value_enum)]
        query: MemoryQuery,

        /// Maximum rows to return
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

/// The four memory views the CLI can read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum MemoryQuery {
    /// Static repo policy and config-file overrides
    Config,
    /// Most recently created tasks for this repo
    RecentTasks,
    /// Learned patterns in scope for this repo
    Patterns,
    /// Recorded `decision` observations across this repo's tasks
    Decisions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_execute() {
        let cli = Cli::parse_from(["taskdaemon", "execute", "org/r", "42"]);
        assert!(matches!(
            cli.command,
            Command::Execute {
                ref repo,
                issue_number: 42,
                dry_run: false,
                ..
            } if repo == "org/r"
        ));
    }

    #[test]
    fn parse_execute_dry_run() {
        let cli = Cli::parse_from(["taskdaemon", "execute", "org/r", "42", "--dry-run"]);
        assert!(matches!(cli.command, Command::Execute { dry_run: true, .. }));
    }

    #[test]
    fn parse_status() {
        let cli = Cli::parse_from(["taskdaemon", "status", "task-123"]);
        assert!(matches!(cli.command, Command::Status { task_id } if task_id == "task-123"));
    }

    #[test]
    fn parse_memory_with_limit() {
        let cli = Cli::parse_from(["taskdaemon", "memory", "org/r", "recent-tasks", "--limit", "5"]);
        assert!(matches!(
            cli.command,
            Command::Memory {
                ref repo,
                query: MemoryQuery::RecentTasks,
                limit: 5,
            } if repo == "org/r"
        ));
    }

    #[test]
    fn parse_memory_default_limit() {
        let cli = Cli::parse_from(["taskdaemon", "memory", "org/r", "patterns"]);
        assert!(matches!(cli.command, Command::Memory { limit: 10, .. }));
    }
}
