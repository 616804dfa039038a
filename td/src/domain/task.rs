//! Task domain type
//!
//! A `Task` is the unit the Orchestrator drives through its lifecycle.
//! Identity is `(repo, issue_number)`; `id` is a process-wide unique
//! handle generated at creation time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskstore::{IndexValue, Record, now_ms};
use tracing::debug;

use super::id::generate_id;

/// Orchestrator state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    New,
    Planning,
    Coding,
    Validating,
    /// Internal state entered from `Validating` on failure; the Agentic
    /// Loop resolves it to `Coding` (fix), `Planning` (replan), or `Failed` (abort).
    Reflecting,
    PrCreating,
    PrOpened,
    WaitingHuman,
    Failed,
    Completed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        debug!(?self, "TaskStatus::fmt: called");
        match self {
            Self::New => write!(f, "new"),
            Self::Planning => write!(f, "planning"),
            Self::Coding => write!(f, "coding"),
            Self::Validating => write!(f, "validating"),
            Self::Reflecting => write!(f, "reflecting"),
            Self::PrCreating => write!(f, "pr_creating"),
            Self::PrOpened => write!(f, "pr_opened"),
            Self::WaitingHuman => write!(f, "waiting_human"),
            Self::Failed => write!(f, "failed"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Rough size of the plan, used to decide whether a task is orchestrated
/// into sub-tasks: a medium-or-larger complexity with a multi-file plan
/// is split rather than attempted as one coding pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Complexity {
    Xs,
    S,
    M,
    L,
    Xl,
}

impl Complexity {
    pub fn warrants_orchestration(&self) -> bool {
        *self >= Complexity::M
    }
}

/// A unit of work identified by `(repo, issue_number)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub repo: String,
    pub issue_number: u64,
    pub title: String,
    pub body: String,
    pub status: TaskStatus,
    /// Ordered sequence of plan steps.
    pub plan: Vec<String>,
    /// Ordered sequence of definition-of-done criteria.
    pub definition_of_done: Vec<String>,
    /// Set of file paths the task is expected to touch.
    pub target_files: Vec<String>,
    pub current_diff: Option<String>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    /// Sub-tasks reference their parent; a child can never itself be orchestrated.
    pub parent_task_id: Option<String>,
    pub subtask_index: Option<u32>,
    pub is_orchestrated: bool,
    pub pr_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn new(repo: impl Into<String>, issue_number: u64, title: impl Into<String>, body: impl Into<String>) -> Self {
        let repo = repo.into();
        let title = title.into();
        let body = body.into();
        debug!(%repo, issue_number, %title, "Task::new: called");
        let now = now_ms();
        Self {
            id: generate_id("task", &format!("{}-{}", repo, issue_number)),
            repo,
            issue_number,
            title,
            body,
            status: TaskStatus::New,
            plan: Vec::new(),
            definition_of_done: Vec::new(),
            target_files: Vec::new(),
            current_diff: None,
            attempt_count: 0,
            max_attempts: 5,
            last_error: None,
            parent_task_id: None,
            subtask_index: None,
            is_orchestrated: false,
            pr_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Natural key used to enforce `(repo, issueNumber)` uniqueness.
    pub fn natural_key(repo: &str, issue_number: u64) -> String {
        format!("{}#{}", repo, issue_number)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_subtask(mut self, parent_task_id: impl Into<String>, index: u32) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self.subtask_index = Some(index);
        self
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        debug!(%self.id, from = %self.status, to = %status, "Task::set_status: called");
        self.status = status;
        self.updated_at = now_ms();
    }

    pub fn set_diff(&mut self, diff: impl Into<String>) {
        self.current_diff = Some(diff.into());
        self.updated_at = now_ms();
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.updated_at = now_ms();
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.updated_at = now_ms();
    }

    /// Record one attempt, failing closed once `maxAttempts` is reached.
    /// Returns `false` (and does not increment) when the budget is exhausted.
    pub fn record_attempt(&mut self) -> bool {
        if self.attempt_count >= self.max_attempts {
            debug!(%self.id, self.attempt_count, self.max_attempts, "Task::record_attempt: budget exhausted");
            return false;
        }
        self.attempt_count += 1;
        self.updated_at = now_ms();
        true
    }

    pub fn is_budget_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// A child task (non-null `parentTaskId`) can never itself be orchestrated.
    /// Decomposition is one level deep only.
    pub fn can_orchestrate(&self) -> bool {
        self.parent_task_id.is_none()
    }

    pub fn mark_orchestrated(&mut self) {
        debug_assert!(self.can_orchestrate(), "nested orchestration is forbidden");
        self.is_orchestrated = true;
        self.updated_at = now_ms();
    }
}

impl Record for Task {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "tasks"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("repo".to_string(), IndexValue::String(self.repo.clone()));
        fields.insert(
            "natural_key".to_string(),
            IndexValue::String(Self::natural_key(&self.repo, self.issue_number)),
        );
        if let Some(ref parent) = self.parent_task_id {
            fields.insert("parent_task_id".to_string(), IndexValue::String(parent.clone()));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_new_defaults_to_new_status() {
        let t = Task::new("org/r", 42, "Fix bug", "body");
        assert_eq!(t.status, TaskStatus::New);
        assert_eq!(t.attempt_count, 0);
        assert!(t.can_orchestrate());
    }

    #[test]
    fn record_attempt_respects_max_attempts() {
        let mut t = Task::new("org/r", 42, "Fix bug", "body").with_max_attempts(2);
        assert!(t.record_attempt());
        assert!(t.record_attempt());
        assert!(!t.record_attempt());
        assert_eq!(t.attempt_count, 2);
        assert!(t.is_budget_exhausted());
    }

    #[test]
    fn subtask_cannot_be_orchestrated() {
        let t = Task::new("org/r", 1, "sub", "body").with_subtask("parent-1", 0);
        assert!(!t.can_orchestrate());
    }

    #[test]
    fn natural_key_combines_repo_and_issue() {
        assert_eq!(Task::natural_key("org/r", 42), "org/r#42");
    }

    #[test]
    fn complexity_orders_xs_below_m() {
        assert!(Complexity::Xs < Complexity::M);
        assert!(Complexity::M.warrants_orchestration());
        assert!(!Complexity::S.warrants_orchestration());
    }
}
