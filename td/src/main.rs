//! TaskDaemon CLI entry point.
//!
//! Issue in, draft pull request out: `execute` creates or resumes a
//! task and drives it through the Orchestrator's state machine,
//! `status` reads one back, `memory` is a read-only window onto the
//! Static/Session/archival stores.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use taskdaemon::cli::{Cli, Command, MemoryQuery};
use taskdaemon::config::Config;
use taskdaemon::domain::{Filter, IdResolver, IndexValue, ResolveOutcome, Store, Task, TaskStatus};
use taskdaemon::facades::{CodeHost, GitHubCodeHost, IssueTracker, LinearIssueTracker, NullIssueTracker};
use taskdaemon::hooks::{HookBus, install_default_handlers};
use taskdaemon::llm::{create_client, name_markdown};
use taskdaemon::orchestrator::{Orchestrator, ProcessOutcome};
use taskdaemon::{SessionStore, StaticMemory};

/// Process exit codes per spec §6: 0 success, 1 validation/internal
/// failure, 2 a command was denied by the Command Executor's denylist
/// or a repo policy violation routed the task to `waiting_human`.
const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_DENIED: i32 = 2;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) {
    let level_str = cli_log_level.or(config_log_level).unwrap_or("INFO");
    let filter = tracing_subscriber::EnvFilter::try_new(level_str)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_store(config: &Config) -> Result<Arc<Store>> {
    let path = PathBuf::from(&config.storage.taskstore_dir);
    std::fs::create_dir_all(&path).context("failed to create taskstore directory")?;
    Ok(Arc::new(Store::open(&path).context("failed to open taskstore")?))
}

/// `status {taskId}` accepts a git-style abbreviated id fragment, not
/// just the full id - resolved against every known task id the way
/// `IdResolver` resolves abbreviated commit hashes. Falls back to the
/// fragment unchanged when it matches nothing, so an exact-but-unknown
/// id still produces the usual "not found" error from `Orchestrator::status`.
fn resolve_task_id(store: &Store, fragment: &str) -> Result<String> {
    let all: Vec<Task> = store.list(&[])?;
    let ids: Vec<String> = all.into_iter().map(|t| t.id).collect();
    match IdResolver::new(&ids).resolve(fragment) {
        ResolveOutcome::Found(id) => Ok(id),
        ResolveOutcome::NotFound => Ok(fragment.to_string()),
        ResolveOutcome::Ambiguous(matches) => {
            eyre::bail!("task id \"{fragment}\" is ambiguous, matches: {}", matches.join(", "))
        }
    }
}

fn open_context_store(config: &Config) -> Result<taskstore::Store> {
    let path = PathBuf::from(&config.storage.taskstore_dir).join("context");
    std::fs::create_dir_all(&path).context("failed to create contextstore directory")?;
    taskstore::Store::open(&path).context("failed to open contextstore")
}

fn build_code_host() -> Arc<dyn CodeHost> {
    match std::env::var("GITHUB_TOKEN") {
        Ok(token) => Arc::new(GitHubCodeHost::new(token)),
        Err(_) => {
            debug!("build_code_host: GITHUB_TOKEN not set, code host calls will fail when attempted");
            Arc::new(GitHubCodeHost::new(String::new()))
        }
    }
}

fn build_issue_tracker() -> Arc<dyn IssueTracker> {
    match (std::env::var("LINEAR_API_TOKEN"), std::env::var("LINEAR_IN_REVIEW_STATE_ID")) {
        (Ok(token), Ok(state_id)) => Arc::new(LinearIssueTracker::new(token, state_id)),
        _ => {
            debug!("build_issue_tracker: no Linear credentials configured, using NullIssueTracker");
            Arc::new(NullIssueTracker)
        }
    }
}

fn exit_code_for(outcome: &ProcessOutcome, dry_run: bool) -> i32 {
    // A dry run that reaches Validating/PrCreating with no recorded error
    // means validation passed and stopped short of opening a PR by design,
    // not a failure.
    if dry_run
        && matches!(outcome.status, TaskStatus::Validating | TaskStatus::PrCreating)
        && outcome.last_error.is_none()
    {
        return EXIT_SUCCESS;
    }
    match outcome.status {
        TaskStatus::Completed => EXIT_SUCCESS,
        TaskStatus::WaitingHuman => EXIT_DENIED,
        _ => {
            let denied = outcome
                .last_error
                .as_deref()
                .map(|e| e.contains("denylist") || e.contains("policy_violation"))
                .unwrap_or(false);
            if denied { EXIT_DENIED } else { EXIT_FAILURE }
        }
    }
}

fn build_orchestrator(config: &Config, store: Arc<Store>) -> Result<Orchestrator> {
    let hooks = HookBus::new();
    install_default_handlers(&hooks, store.clone());
    let llm = create_client(&config.llm).context("failed to create LLM client")?;
    let code_host = build_code_host();
    let issue_tracker = build_issue_tracker();
    Ok(Orchestrator::new(store, hooks, llm, code_host, issue_tracker, config.clone()))
}

/// §4.1's "Idempotent: resumes from the last checkpoint" contract: scan
/// every non-terminal task at startup and drive each back through
/// `process()` before this invocation dispatches its own CLI command, so
/// a task interrupted mid-phase by a prior process exit (crash, signal,
/// `cancel`) picks back up from its last checkpoint rather than sitting
/// stuck forever.
async fn recover_interrupted_tasks(orchestrator: &Orchestrator) -> Result<()> {
    let resumable = orchestrator.recover().context("failed to scan for resumable tasks")?;
    for task_id in resumable {
        info!(task_id, "main: resuming interrupted task");
        match orchestrator.process(&task_id, false).await {
            Ok(outcome) => info!(task_id, status = %outcome.status, "main: resumed task reached new state"),
            Err(err) => warn!(task_id, error = %err, "main: failed to resume interrupted task"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref());

    let config = Config::load(cli.config.as_ref()).context("failed to load configuration")?;
    info!(profile = %config.llm.default, "TaskDaemon: loaded config");

    let store = open_store(&config)?;
    let orchestrator = build_orchestrator(&config, store.clone())?;
    recover_interrupted_tasks(&orchestrator).await?;

    match cli.command {
        Command::Execute {
            repo,
            issue_number,
            title,
            body,
            dry_run,
        } => cmd_execute(&orchestrator, &repo, issue_number, title, body, dry_run).await,
        Command::Status { task_id } => cmd_status(&store, &orchestrator, &task_id),
        Command::Memory { repo, query, limit } => cmd_memory(&config, &repo, query, limit),
    }
}

async fn cmd_execute(
    orchestrator: &Orchestrator,
    repo: &str,
    issue_number: u64,
    title: Option<String>,
    body: Option<String>,
    dry_run: bool,
) -> Result<()> {
    debug!(repo, issue_number, dry_run, "cmd_execute: called");

    let body = body.unwrap_or_default();
    let title = match title {
        Some(t) => t,
        None => name_markdown(orchestrator.llm(), &body).await.unwrap_or_default(),
    };

    let task = orchestrator
        .create_task(repo, issue_number, &title, &body)
        .context("failed to create task")?;
    info!(task_id = %task.id, "cmd_execute: task ready");

    let outcome = orchestrator.process(&task.id, dry_run).await.context("orchestrator run failed")?;
    print_outcome(&outcome, dry_run);

    let code = exit_code_for(&outcome, dry_run);
    if code != EXIT_SUCCESS {
        std::process::exit(code);
    }
    Ok(())
}

fn print_outcome(outcome: &ProcessOutcome, dry_run: bool) {
    println!("task:   {}", outcome.task_id);
    println!("status: {}", outcome.status);
    println!("attempts: {}", outcome.attempt_count);
    if let Some(ref err) = outcome.last_error {
        println!("last_error: {}", err);
    }
    if dry_run {
        match &outcome.diff {
            Some(diff) => println!("\n{}", diff),
            None => println!("\n(no diff produced)"),
        }
    } else if let Some(ref url) = outcome.pr_url {
        println!("pr: {}", url);
    }
}

fn cmd_status(store: &Store, orchestrator: &Orchestrator, task_id: &str) -> Result<()> {
    debug!(task_id, "cmd_status: called");
    let resolved_id = resolve_task_id(store, task_id)?;

    let view = orchestrator.status(&resolved_id).context("failed to load task status")?;
    println!("task:   {}", view.task_id);
    println!("status: {}", view.status);
    println!("attempts: {}/{}", view.attempt_count, view.max_attempts);
    if let Some(ref err) = view.last_error {
        println!("last_error: {}", err);
    }
    if let Some(ref url) = view.pr_url {
        println!("pr: {}", url);
    }
    if !view.recent_progress.is_empty() {
        println!("\nrecent progress:");
        for entry in &view.recent_progress {
            println!("  [{}] {}{}", entry.sequence, entry.event_type, entry.output_summary.as_deref().map(|s| format!(": {s}")).unwrap_or_default());
        }
    }
    Ok(())
}

fn cmd_memory(config: &Config, repo: &str, query: MemoryQuery, limit: usize) -> Result<()> {
    debug!(repo, ?query, limit, "cmd_memory: called");
    let store = open_store(config)?;
    let (owner, name) = repo.split_once('/').unwrap_or((repo, ""));

    match query {
        MemoryQuery::Config => {
            let static_memory = StaticMemory::new(store);
            match static_memory.get(owner, name)? {
                Some(memory) => println!("{}", serde_json::to_string_pretty(&memory)?),
                None => println!("no RepoMemory row for {repo}"),
            }
            if let Some(repo_config) = config.find_repo(repo) {
                println!("\nconfig-file overrides:\n{}", serde_json::to_string_pretty(repo_config)?);
            }
        }
        MemoryQuery::RecentTasks => {
            let filter = Filter::eq("repo", IndexValue::String(repo.to_string()));
            let mut tasks: Vec<Task> = store.list(&[filter])?;
            tasks.sort_by_key(|t| std::cmp::Reverse(t.created_at));
            tasks.truncate(limit);
            for task in &tasks {
                println!("{}  {}  issue #{}  {}", task.id, task.status, task.issue_number, task.title);
            }
            if tasks.is_empty() {
                println!("no tasks recorded for {repo}");
            }
        }
        MemoryQuery::Patterns => {
            let context_store = open_context_store(config)?;
            let patterns = contextstore::PatternStore::new(context_store);
            let mut eligible = patterns.eligible_for_promotion(contextstore::pattern::DEFAULT_MIN_CONFIDENCE)?;
            eligible.retain(|p| p.scope.repo.as_deref() == Some(repo) || p.scope.repo.is_none());
            eligible.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
            eligible.truncate(limit);
            for pattern in &eligible {
                println!(
                    "{}  confidence={:.2}  {:?}  {}",
                    pattern.id, pattern.confidence, pattern.pattern_type, pattern.description
                );
            }
            if eligible.is_empty() {
                println!("no eligible patterns for {repo}");
            }
        }
        MemoryQuery::Decisions => {
            let sessions = SessionStore::new(store.clone());
            let filter = Filter::eq("repo", IndexValue::String(repo.to_string()));
            let mut tasks: Vec<Task> = store.list(&[filter])?;
            tasks.sort_by_key(|t| std::cmp::Reverse(t.created_at));

            let mut shown = 0usize;
            for task in &tasks {
                if shown >= limit {
                    break;
                }
                let Some(session) = sessions.load(&task.id)? else { continue };
                for entry in session.progress.tail(limit - shown) {
                    if entry.event_type != "decision" {
                        continue;
                    }
                    println!(
                        "{}  task={}  {}",
                        entry.sequence,
                        task.id,
                        entry.output_summary.as_deref().unwrap_or("")
                    );
                    shown += 1;
                }
            }
            if shown == 0 {
                println!("no decision observations recorded for {repo}");
            }
        }
    }
    Ok(())
}
