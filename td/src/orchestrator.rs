//! Orchestrator: one instance drives one [`Task`] through the state
//! machine of spec §4.8, and is the sole writer of `Task.status`,
//! `SessionMemory.phase`, and `AttemptHistory`.
//!
//! `process(task_id)` runs until the task reaches a terminal phase or
//! yields control; calling it again after an interruption resumes from
//! the last checkpoint, since every phase boundary writes one before
//! doing any work that could suspend (§5: "Checkpoints MUST be written
//! before any such suspension point that crosses a phase boundary").

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use taskstore::{Filter, IndexValue, Store};
use tracing::{debug, info, warn};

use crate::agentic_loop::{self, LoopConfig};
use crate::agents::{run_coder, run_planner};
use crate::aggregator::{self, SubtaskDiff};
use crate::config::{Config, RepoConfig};
use crate::domain::{
    AggregationStrategy, AttemptAction, AttemptResult, OrchestrationBlock, RepoMemory, Task, TaskStatus,
};
use crate::facades::{CodeHost, CodeHostError, IssueTracker, PullRequestDraft};
use crate::foreman::{Foreman, ForemanConfig};
use crate::hooks::{HookBus, HookEvent, HookPayload};
use crate::llm::LlmClient;
use crate::memory::{SessionStore, StaticMemory};
use crate::patch;
use crate::validation::{self, VerdictStatus};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("task store error: {0}")]
    Store(#[from] taskstore::StoreError),
    #[error("no such task: {0}")]
    NotFound(String),
    #[error("code host error: {0}")]
    CodeHost(#[from] CodeHostError),
    #[error("foreman error: {0}")]
    Foreman(#[from] crate::foreman::ForemanError),
    #[error("repo policy violation: {0}")]
    Policy(#[from] PolicyError),
    #[error("agentic loop error: {0}")]
    Loop(#[from] eyre::Error),
}

/// Outcome of a `process()` call that the CLI's `execute` and `status`
/// surfaces read back. `dry_run` carries the artifact produced after
/// the Coding phase instead of a PR.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    pub pr_url: Option<String>,
    pub diff: Option<String>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

/// Response to the CLI's `status {taskId}` query (§6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusView {
    pub task_id: String,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub pr_url: Option<String>,
    pub recent_progress: Vec<crate::domain::ProgressEntry>,
}

pub struct Orchestrator {
    store: Arc<Store>,
    sessions: SessionStore,
    static_memory: StaticMemory,
    hooks: HookBus,
    llm: Arc<dyn LlmClient>,
    code_host: Arc<dyn CodeHost>,
    issue_tracker: Arc<dyn IssueTracker>,
    config: Config,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        hooks: HookBus,
        llm: Arc<dyn LlmClient>,
        code_host: Arc<dyn CodeHost>,
        issue_tracker: Arc<dyn IssueTracker>,
        config: Config,
    ) -> Self {
        Self {
            sessions: SessionStore::new(store.clone()),
            static_memory: StaticMemory::new(store.clone()),
            store,
            hooks,
            llm,
            code_host,
            issue_tracker,
            config,
        }
    }

    /// The LLM client this orchestrator was built with, for callers (the
    /// CLI) that need a completion outside of any task's lifecycle, e.g.
    /// naming a task from its issue body before `create_task`.
    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    /// Create a new task, enforcing `(repo, issueNumber)` uniqueness: a
    /// re-issued `execute` for a repo/issue pair with an existing
    /// non-terminal task returns that task's id instead of creating a
    /// second one (§8 idempotence property).
    pub fn create_task(
        &self,
        repo: &str,
        issue_number: u64,
        title: &str,
        body: &str,
    ) -> Result<Task, OrchestratorError> {
        debug!(repo, issue_number, "Orchestrator::create_task: called");
        if let Some(existing) = self.find_active(repo, issue_number)? {
            info!(task_id = %existing.id, "Orchestrator::create_task: returning existing non-terminal task");
            return Ok(existing);
        }
        let task = Task::new(repo, issue_number, title, body);
        self.store.create(task.clone())?;
        self.sessions.create(&task.id)?;
        self.hooks.emit(HookPayload {
            event: HookEvent::TaskStart,
            task_id: task.id.clone(),
            agent: None,
            tool: None,
            phase: Some(task.status.to_string()),
            data: serde_json::json!({"repo": repo, "issue_number": issue_number}),
            timestamp: taskstore::now_ms(),
        });
        Ok(task)
    }

    fn find_active(&self, repo: &str, issue_number: u64) -> Result<Option<Task>, OrchestratorError> {
        let key = Task::natural_key(repo, issue_number);
        let filter = Filter::eq("natural_key", IndexValue::String(key));
        let candidates: Vec<Task> = self.store.list(&[filter])?;
        Ok(candidates.into_iter().find(|t| !t.is_terminal()))
    }

    fn load(&self, task_id: &str) -> Result<Task, OrchestratorError> {
        self.store.get(task_id)?.ok_or_else(|| OrchestratorError::NotFound(task_id.to_string()))
    }

    fn save(&self, task: &Task) -> Result<(), OrchestratorError> {
        self.store.update(task.clone())?;
        Ok(())
    }

    /// `Task::repo` is stored as `"owner/repo"`; [`StaticMemory`] keys
    /// on the two parts separately, so every lookup splits here.
    fn repo_memory(&self, repo: &str) -> Result<Option<RepoMemory>, OrchestratorError> {
        let (owner, name) = split_repo(repo);
        Ok(self.static_memory.get(owner, name)?)
    }

    /// Static, admin-authored repo config (clone url, default branch,
    /// validator command overrides) keyed by the config file's `repos`
    /// list rather than the `taskstore`-backed [`RepoMemory`].
    fn repo_config(&self, repo: &str) -> Option<&RepoConfig> {
        self.config.find_repo(repo)
    }

    fn checkpoint(&self, task_id: &str, reason: &str) -> Result<(), OrchestratorError> {
        self.sessions.save_checkpoint(task_id, reason)?;
        self.hooks.emit(HookPayload {
            event: HookEvent::Checkpoint,
            task_id: task_id.to_string(),
            agent: None,
            tool: None,
            phase: None,
            data: serde_json::json!({"reason": reason}),
            timestamp: taskstore::now_ms(),
        });
        Ok(())
    }

    fn transition(&self, task: &mut Task, to: TaskStatus) -> Result<(), OrchestratorError> {
        let from = task.status;
        task.set_status(to);
        self.save(task)?;
        self.sessions.set_phase(&task.id, to)?;
        self.hooks.emit(HookPayload {
            event: HookEvent::PhaseChange,
            task_id: task.id.clone(),
            agent: None,
            tool: None,
            phase: Some(to.to_string()),
            data: serde_json::json!({"from": from.to_string(), "to": to.to_string()}),
            timestamp: taskstore::now_ms(),
        });
        Ok(())
    }

    /// Drive `task_id` through the state machine until it reaches a
    /// terminal phase or yields (budget exhausted, waiting on a human).
    /// Idempotent across process restarts: each phase checkpoints before
    /// doing work that can suspend, so re-entering here after a crash
    /// resumes from the last completed phase.
    pub async fn process(&self, task_id: &str, dry_run: bool) -> Result<ProcessOutcome, OrchestratorError> {
        debug!(task_id, dry_run, "Orchestrator::process: called");
        let mut task = self.load(task_id)?;
        if task.is_terminal() {
            return Ok(self.outcome(&task));
        }

        loop {
            match task.status {
                TaskStatus::New => {
                    self.checkpoint(&task.id, "before planning")?;
                    self.transition(&mut task, TaskStatus::Planning)?;
                }
                TaskStatus::Planning => {
                    if !task.record_attempt() {
                        return self.fail(&mut task, "budget_exhausted: max_attempts reached before planning completed");
                    }
                    self.save(&task)?;
                    self.run_planning(&mut task).await?;
                    self.transition(&mut task, TaskStatus::Coding)?;
                }
                TaskStatus::Coding => {
                    self.checkpoint(&task.id, "before coding")?;
                    self.run_coding(&mut task).await?;
                    self.transition(&mut task, TaskStatus::Validating)?;
                }
                TaskStatus::Validating => {
                    self.checkpoint(&task.id, "before validating")?;
                    let verdict = self.run_validation(&task).await?;
                    match verdict.status {
                        VerdictStatus::Passed => {
                            if dry_run {
                                return Ok(self.outcome(&task));
                            }
                            self.transition(&mut task, TaskStatus::PrCreating)?;
                        }
                        _ if verdict.terminal_reason.is_some() => {
                            let reason = verdict.terminal_reason.unwrap();
                            return self.fail(&mut task, &format!("terminal: {reason}"));
                        }
                        _ => {
                            self.transition(&mut task, TaskStatus::Reflecting)?;
                        }
                    }
                }
                TaskStatus::Reflecting => {
                    let resolved = self.run_reflection(&mut task).await?;
                    if !resolved {
                        // Replan budget/iteration budget exhausted with no
                        // recovery path; run_reflection already transitioned
                        // to Failed or back to Coding/Planning as needed.
                        if task.is_terminal() {
                            return Ok(self.outcome(&task));
                        }
                    }
                }
                TaskStatus::PrCreating => {
                    if dry_run {
                        return Ok(self.outcome(&task));
                    }
                    self.checkpoint(&task.id, "before pr creation")?;
                    match self.run_foreman_and_open_pr(&mut task).await {
                        Ok(()) => self.transition(&mut task, TaskStatus::PrOpened)?,
                        Err(OrchestratorError::Policy(p)) => {
                            task.set_error(format!("policy_violation: {p}"));
                            self.transition(&mut task, TaskStatus::WaitingHuman)?;
                            return Ok(self.outcome(&task));
                        }
                        Err(e) => return self.fail(&mut task, &format!("pr_creation_failed: {e}")),
                    }
                }
                TaskStatus::PrOpened => {
                    self.transition(&mut task, TaskStatus::Completed)?;
                    self.hooks.emit(HookPayload {
                        event: HookEvent::TaskEnd,
                        task_id: task.id.clone(),
                        agent: None,
                        tool: None,
                        phase: Some(TaskStatus::Completed.to_string()),
                        data: serde_json::json!({"pr_url": task.pr_url}),
                        timestamp: taskstore::now_ms(),
                    });
                    return Ok(self.outcome(&task));
                }
                TaskStatus::WaitingHuman | TaskStatus::Failed | TaskStatus::Completed => {
                    return Ok(self.outcome(&task));
                }
            }
        }
    }

    /// Mutates `task` in place, so a caller holding `&mut Task` across a
    /// `loop { match task.status { ... } }` sees the terminal status
    /// immediately rather than only in a saved copy (a clone passed by
    /// value here would transition and persist but leave the caller's
    /// own `task.status` stuck at whatever it was, looping forever).
    fn fail(&self, task: &mut Task, reason: &str) -> Result<ProcessOutcome, OrchestratorError> {
        warn!(task_id = %task.id, reason, "Orchestrator: task failed");
        task.set_error(reason);
        self.transition(task, TaskStatus::Failed)?;
        self.hooks.emit(HookPayload {
            event: HookEvent::Error,
            task_id: task.id.clone(),
            agent: None,
            tool: None,
            phase: Some(TaskStatus::Failed.to_string()),
            data: serde_json::json!({"reason": reason}),
            timestamp: taskstore::now_ms(),
        });
        Ok(self.outcome(task))
    }

    /// Transition to `FAILED` with a recorded reason; any held sandbox
    /// is the Foreman's responsibility and is cleaned on its own exit
    /// path, not here.
    pub fn cancel(&self, task_id: &str, reason: &str) -> Result<ProcessOutcome, OrchestratorError> {
        debug!(task_id, reason, "Orchestrator::cancel: called");
        let mut task = self.load(task_id)?;
        if task.is_terminal() {
            return Ok(self.outcome(&task));
        }
        self.fail(&mut task, &format!("cancelled: {reason}"))
    }

    /// `status {taskId}` (§6): phase, attempt counters, last error, PR
    /// link, and the last 10 progress entries.
    pub fn status(&self, task_id: &str) -> Result<StatusView, OrchestratorError> {
        debug!(task_id, "Orchestrator::status: called");
        let task = self.load(task_id)?;
        let recent_progress = self
            .sessions
            .load(task_id)?
            .map(|s| s.progress.tail(10).to_vec())
            .unwrap_or_default();
        Ok(StatusView {
            task_id: task.id,
            status: task.status,
            attempt_count: task.attempt_count,
            max_attempts: task.max_attempts,
            last_error: task.last_error,
            pr_url: task.pr_url,
            recent_progress,
        })
    }

    /// Scan for non-terminal tasks at process start and make them
    /// resumable again: `process()` picks each one up from wherever its
    /// phase left off, since every phase already checkpoints before any
    /// suspension point. This implements §4.1's "idempotent, resumes
    /// from the last checkpoint" contract concretely.
    pub fn recover(&self) -> Result<Vec<String>, OrchestratorError> {
        debug!("Orchestrator::recover: called");
        let all: Vec<Task> = self.store.list(&[])?;
        let resumable: Vec<String> = all.into_iter().filter(|t| !t.is_terminal()).map(|t| t.id).collect();
        info!(count = resumable.len(), "Orchestrator::recover: found resumable tasks");
        Ok(resumable)
    }

    async fn run_planning(&self, task: &mut Task) -> Result<(), OrchestratorError> {
        self.hooks.emit(agent_start(&task.id, "planner", "planning"));
        let repo_hints = self.repo_memory(&task.repo)?.map(|r| r.tech_stack_hints).unwrap_or_default();
        let plan = run_planner(&self.llm, &task.body, &repo_hints).await.map_err(eyre::Error::from)?;
        task.plan = vec![plan.plan_text.clone()];
        task.definition_of_done = plan.definition_of_done.clone();
        task.target_files = plan.target_files.clone();
        self.save(task)?;
        self.sessions.set_agent_output(&task.id, "plan", serde_json::to_value(&plan).unwrap_or_default())?;
        self.sessions.record_attempt(&task.id, AttemptAction::Plan, AttemptResult::Success, None)?;
        self.hooks.emit(agent_end(&task.id, "planner", "planning"));

        if plan.estimated_complexity.warrants_orchestration() && plan.target_files.len() > 1 {
            self.decompose(task, &plan.target_files).await?;
        }
        Ok(())
    }

    /// §4.9: split a multi-file plan into XS/S sub-tasks, one per target
    /// file (the only dependency signal the plan reliably carries),
    /// with no inter-file dependency edges declared. `parallel_merge` is
    /// chosen whenever every sub-task is dependency-free, which this
    /// decomposition always produces; `sequential` is reserved for a
    /// future planner that can actually detect file-to-file dependency
    /// edges.
    async fn decompose(&self, parent: &mut Task, target_files: &[String]) -> Result<(), OrchestratorError> {
        if !parent.can_orchestrate() {
            debug!(task_id = %parent.id, "Orchestrator::decompose: child cannot itself be orchestrated, skipping");
            return Ok(());
        }
        debug!(task_id = %parent.id, files = target_files.len(), "Orchestrator::decompose: called");
        let mut subtask_ids = Vec::new();
        for (idx, file) in target_files.iter().enumerate() {
            let mut sub = Task::new(&parent.repo, parent.issue_number, &parent.title, &parent.body)
                .with_subtask(parent.id.clone(), idx as u32);
            sub.target_files = vec![file.clone()];
            sub.definition_of_done = parent.definition_of_done.clone();
            sub.max_attempts = parent.max_attempts;
            self.store.create(sub.clone())?;
            self.sessions.create(&sub.id)?;
            subtask_ids.push(sub.id);
        }

        let dependencies: HashMap<String, Vec<String>> = subtask_ids.iter().map(|id| (id.clone(), Vec::new())).collect();
        let strategy = aggregation_strategy(&dependencies);
        let block = OrchestrationBlock {
            subtask_ids,
            dependencies,
            strategy,
        };
        parent.mark_orchestrated();
        self.save(parent)?;

        let mut session = self.sessions.load(&parent.id)?.ok_or_else(|| OrchestratorError::NotFound(parent.id.clone()))?;
        session.orchestration = Some(block);
        self.store.update(session)?;
        Ok(())
    }

    async fn run_coding(&self, task: &mut Task) -> Result<(), OrchestratorError> {
        if let Some(session) = self.sessions.load(&task.id)? {
            if let Some(orchestration) = session.orchestration.clone() {
                return self.run_coding_orchestrated(task, &orchestration).await;
            }
        }
        self.hooks.emit(agent_start(&task.id, "coder", "coding"));
        let plan_text = task.plan.join("\n");
        let output = run_coder(&self.llm, &plan_text, &task.target_files).await.map_err(eyre::Error::from)?;
        task.set_diff(output.diff.clone());
        self.save(task)?;
        self.sessions.set_agent_output(&task.id, "diff", serde_json::json!(output.diff))?;
        self.sessions.record_attempt(&task.id, AttemptAction::Code, AttemptResult::Success, None)?;
        self.hooks.emit(agent_end(&task.id, "coder", "coding"));
        Ok(())
    }

    /// Run each sub-task's coding phase (topologically, though the
    /// current decomposition never declares dependencies so this is
    /// just ascending id order), then aggregate (§4.10). Only the
    /// aggregated diff proceeds past this point.
    async fn run_coding_orchestrated(
        &self,
        parent: &mut Task,
        orchestration: &OrchestrationBlock,
    ) -> Result<(), OrchestratorError> {
        let order = topological_order(&orchestration.dependencies);
        let mut diffs = Vec::new();
        for subtask_id in &order {
            let mut sub = self.load(subtask_id)?;
            sub.set_status(TaskStatus::Coding);
            self.save(&sub)?;
            self.run_coding(&mut sub).await?;
            sub.set_status(TaskStatus::Completed);
            self.save(&sub)?;
            diffs.push(SubtaskDiff {
                subtask_id: sub.id.clone(),
                diff: sub.current_diff.clone().unwrap_or_default(),
            });
        }
        let result = aggregator::aggregate(&diffs);
        parent.set_diff(result.combined_diff.clone());
        self.save(parent)?;
        self.sessions.set_agent_output(
            parent.id.as_str(),
            "aggregation",
            serde_json::json!({
                "conflicts": result.conflicts,
                "file_changes": result.file_changes,
                "pr_body": result.pr_body,
            }),
        )?;
        Ok(())
    }

    async fn run_validation(&self, task: &Task) -> Result<validation::ValidationVerdict, OrchestratorError> {
        self.hooks.emit(tool_call(&task.id, "validator", "validating"));
        let diff = task.current_diff.clone().unwrap_or_default();
        let repo_config = self.repo_config(&task.repo);
        let workdir = std::env::temp_dir().join(format!("td-validate-{}", task.id));
        let _ = std::fs::create_dir_all(&workdir);
        let validator_config = self.config.validation.validator_config(workdir, repo_config);
        let verdict = validation::validate(&diff, &task.target_files, &validator_config).await;
        self.sessions.set_agent_output(&task.id, "verdict", serde_json::to_value(&verdict).unwrap_or_default())?;
        Ok(verdict)
    }

    /// Delegate to the Agentic Loop; translate its result back into the
    /// state machine (§4.8: `Reflecting` exits to `Coding`, `Planning`,
    /// or `Failed`). Returns `true` when the loop produced a diff that
    /// should be re-validated in place (a `fix`), `false` when control
    /// moved to a different phase already (`replan` or terminal abort).
    async fn run_reflection(&self, task: &mut Task) -> Result<bool, OrchestratorError> {
        if !task.record_attempt() {
            self.fail(task, "budget_exhausted: max_attempts reached during reflection")?;
            return Ok(false);
        }
        self.save(task)?;

        let verdict_json = self
            .sessions
            .load(&task.id)?
            .and_then(|s| s.agent_outputs.get("verdict").cloned())
            .unwrap_or_default();
        let test_output = verdict_json
            .get("issues")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "validation failed".to_string());

        let loop_config = LoopConfig {
            max_iterations: self.config.validation.max_iterations,
            max_replans: self.config.validation.max_replans,
            confidence_threshold: self.config.validation.confidence_threshold,
        };
        let result = agentic_loop::run(task, &test_output, &self.sessions, &self.hooks, &self.llm, &loop_config).await?;

        if result.replanned {
            self.transition(task, TaskStatus::Planning)?;
            return Ok(false);
        }
        // §4.8: Reflecting exits to Failed directly on an abort
        // recommendation or on an exhausted iteration budget — neither
        // goes back through Validating, since neither produced a diff
        // worth re-checking.
        if result.aborted || result.reason == "max_iterations_exceeded" {
            self.fail(task, &format!("agentic_loop: {}", result.reason))?;
            return Ok(false);
        }
        // A `fix` outcome: the loop produced a new diff, so hand it back
        // to the real Validator instead of declaring success on the
        // loop's own say-so.
        if let Some(diff) = result.final_diff {
            task.set_diff(diff);
        }
        task.set_error(result.reason);
        self.save(task)?;
        self.transition(task, TaskStatus::Validating)?;
        Ok(true)
    }

    async fn run_foreman_and_open_pr(&self, task: &mut Task) -> Result<(), OrchestratorError> {
        let repo_memory = self.repo_memory(&task.repo)?;
        let diff = task.current_diff.clone().unwrap_or_default();
        let diff = patch::normalize_to_unified_diff(&diff);

        if let Some(ref repo_memory) = repo_memory {
            enforce_repo_policy(repo_memory, &task.target_files, &diff)?;
        }

        let foreman = Foreman::new(ForemanConfig::default());
        let scratch_root = std::env::temp_dir().join("td-foreman");
        let _ = std::fs::create_dir_all(&scratch_root);
        let clone_url = self.repo_config(&task.repo).map(|r| r.clone_url.clone()).unwrap_or_else(|| task.repo.clone());
        let branch = format!("td/{}-{}", task.repo.replace('/', "-"), task.issue_number);

        let result = foreman.run(&clone_url, "main", &diff, &scratch_root).await?;
        if !result.success {
            return Err(OrchestratorError::Loop(eyre::eyre!(
                "foreman re-run failed in isolation: {}",
                result.test_output
            )));
        }

        self.code_host.create_branch(&task.repo, &branch, "main").await?;
        self.code_host
            .push_commit(&task.repo, &branch, &format!("{}\n\n{}", task.title, task.body), &diff)
            .await?;
        let pr = self
            .code_host
            .open_draft_pr(PullRequestDraft {
                repo: task.repo.clone(),
                base_branch: "main".to_string(),
                head_branch: branch,
                title: task.title.clone(),
                body: pr_body(task),
            })
            .await?;
        task.pr_url = Some(pr.url);
        self.save(task)?;
        self.issue_tracker.transition_to_in_review(&task.issue_number.to_string()).await.map_err(|e| {
            warn!(task_id = %task.id, error = %e, "Orchestrator: issue tracker transition failed, continuing");
            e
        }).ok();
        Ok(())
    }

    fn outcome(&self, task: &Task) -> ProcessOutcome {
        ProcessOutcome {
            task_id: task.id.clone(),
            status: task.status,
            pr_url: task.pr_url.clone(),
            diff: task.current_diff.clone(),
            attempt_count: task.attempt_count,
            last_error: task.last_error.clone(),
        }
    }
}

/// Split `"owner/repo"` into its two parts; a name with no `/` is
/// treated as `(name, name)` so single-segment test fixtures still work.
fn split_repo(repo: &str) -> (&str, &str) {
    match repo.split_once('/') {
        Some((owner, name)) => (owner, name),
        None => (repo, repo),
    }
}

fn agent_start(task_id: &str, agent: &str, phase: &str) -> HookPayload {
    HookPayload {
        event: HookEvent::AgentStart,
        task_id: task_id.to_string(),
        agent: Some(agent.to_string()),
        tool: None,
        phase: Some(phase.to_string()),
        data: serde_json::Value::Null,
        timestamp: taskstore::now_ms(),
    }
}

fn agent_end(task_id: &str, agent: &str, phase: &str) -> HookPayload {
    HookPayload {
        event: HookEvent::AgentEnd,
        task_id: task_id.to_string(),
        agent: Some(agent.to_string()),
        tool: None,
        phase: Some(phase.to_string()),
        data: serde_json::Value::Null,
        timestamp: taskstore::now_ms(),
    }
}

fn tool_call(task_id: &str, tool: &str, phase: &str) -> HookPayload {
    HookPayload {
        event: HookEvent::ToolCall,
        task_id: task_id.to_string(),
        agent: None,
        tool: Some(tool.to_string()),
        phase: Some(phase.to_string()),
        data: serde_json::Value::Null,
        timestamp: taskstore::now_ms(),
    }
}

fn pr_body(task: &Task) -> String {
    let mut body = format!("Closes #{}\n\n{}\n\n### Definition of done\n", task.issue_number, task.body);
    for item in &task.definition_of_done {
        body.push_str(&format!("- [ ] {}\n", item));
    }
    body
}

/// `parallel_merge` is only valid when every sub-task is dependency-free
/// (§4.9); otherwise fall back to `sequential`, which always respects a
/// topological order.
fn aggregation_strategy(dependencies: &HashMap<String, Vec<String>>) -> AggregationStrategy {
    if dependencies.is_empty() {
        return AggregationStrategy::Direct;
    }
    if dependencies.values().all(|deps| deps.is_empty()) {
        AggregationStrategy::ParallelMerge
    } else {
        AggregationStrategy::Sequential
    }
}

/// Kahn's algorithm topological sort over the sub-task dependency
/// adjacency (id -> ids it depends on). The graph is acyclic by
/// construction (§4.9); a cycle would be a programming error, and this
/// falls back to id order for any node that never becomes ready rather
/// than panicking.
fn topological_order(dependencies: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = dependencies.keys().map(|k| (k.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, deps) in dependencies {
        for dep in deps {
            *in_degree.entry(id.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(id.as_str());
        }
    }

    let mut ready: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| *id)
        .collect::<Vec<_>>()
        .into_iter()
        .collect();
    let mut ready_sorted: Vec<&str> = ready.drain(..).collect();
    ready_sorted.sort();
    let mut queue: VecDeque<&str> = ready_sorted.into();

    let mut order = Vec::new();
    let mut seen = HashSet::new();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        order.push(id.to_string());
        if let Some(children) = dependents.get(id) {
            let mut next_ready = Vec::new();
            for child in children {
                if let Some(deg) = in_degree.get_mut(child) {
                    *deg -= 1;
                    if *deg == 0 {
                        next_ready.push(*child);
                    }
                }
            }
            next_ready.sort();
            for c in next_ready {
                queue.push_back(c);
            }
        }
    }
    // Any node not reached (would only happen on a cycle) is appended in
    // id order so nothing silently disappears from the schedule.
    let mut remaining: Vec<String> = dependencies.keys().filter(|id| !seen.contains(id.as_str())).cloned().collect();
    remaining.sort();
    order.extend(remaining);
    order
}

/// §4.x policy enforcement consulted just before Foreman/PR: path
/// allowlist, `maxDiffLines`, `maxFilesPerTask`. A breach here is a
/// `PolicyViolation` (§7), which the caller surfaces as `WAITING_HUMAN`
/// rather than `FAILED`.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("path outside allowlist: {0}")]
    PathNotAllowed(String),
    #[error("diff exceeds maxDiffLines ({actual} > {limit})")]
    TooManyLines { actual: usize, limit: u32 },
    #[error("touches more files than maxFilesPerTask ({actual} > {limit})")]
    TooManyFiles { actual: usize, limit: u32 },
}

fn enforce_repo_policy(repo: &RepoMemory, target_files: &[String], diff: &str) -> Result<(), PolicyError> {
    for file in target_files {
        if !repo.path_allowed(file) {
            return Err(PolicyError::PathNotAllowed(file.clone()));
        }
    }
    if target_files.len() as u32 > repo.max_files_per_task {
        return Err(PolicyError::TooManyFiles {
            actual: target_files.len(),
            limit: repo.max_files_per_task,
        });
    }
    let line_count = diff.lines().count();
    if line_count as u32 > repo.max_diff_lines {
        return Err(PolicyError::TooManyLines {
            actual: line_count,
            limit: repo.max_diff_lines,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_strategy_is_parallel_merge_with_no_dependencies() {
        let deps: HashMap<String, Vec<String>> =
            [("a".to_string(), vec![]), ("b".to_string(), vec![])].into_iter().collect();
        assert_eq!(aggregation_strategy(&deps), AggregationStrategy::ParallelMerge);
    }

    #[test]
    fn aggregation_strategy_is_sequential_with_a_dependency() {
        let deps: HashMap<String, Vec<String>> =
            [("a".to_string(), vec![]), ("b".to_string(), vec!["a".to_string()])].into_iter().collect();
        assert_eq!(aggregation_strategy(&deps), AggregationStrategy::Sequential);
    }

    #[test]
    fn topological_order_respects_dependency_edges() {
        let deps: HashMap<String, Vec<String>> = [
            ("c".to_string(), vec!["b".to_string()]),
            ("b".to_string(), vec!["a".to_string()]),
            ("a".to_string(), vec![]),
        ]
        .into_iter()
        .collect();
        let order = topological_order(&deps);
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn policy_rejects_path_outside_allowlist() {
        let mut repo = RepoMemory::new("org", "r");
        repo.blocked_paths.push("secrets/**".to_string());
        let err = enforce_repo_policy(&repo, &["secrets/key.pem".to_string()], "diff");
        assert!(err.is_err());
    }

    #[test]
    fn policy_allows_within_bounds() {
        let repo = RepoMemory::new("org", "r");
        let diff = "--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n";
        assert!(enforce_repo_policy(&repo, &["src/lib.rs".to_string()], diff).is_ok());
    }
}
