//! Session memory domain types
//!
//! `SessionMemory` is the per-task mutable ledger: phase, attempts,
//! progress log, checkpoints. Owned by exactly one [`super::Task`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use taskstore::{IndexValue, Record, now_ms};
use tracing::debug;

use super::id::generate_id;
use super::task::{Complexity, TaskStatus};

/// One entry in the append-only progress log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    /// Strictly greater than the prior entry's sequence for the same task.
    pub sequence: u64,
    pub created_at: i64,
    pub event_type: String,
    pub agent: Option<String>,
    pub input_summary: Option<String>,
    pub output_summary: Option<String>,
    pub duration_ms: Option<u64>,
    pub metadata: Option<Value>,
}

/// Append-only, strictly ordered log of progress events for one task.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProgressLog {
    entries: Vec<ProgressEntry>,
    pub error_count: u32,
    pub retry_count: u32,
    pub last_checkpoint: Option<String>,
}

impl ProgressLog {
    pub fn next_sequence(&self) -> u64 {
        self.entries.last().map(|e| e.sequence + 1).unwrap_or(1)
    }

    /// Append a new entry, assigning the next sequence number. Never
    /// mutates a prior entry.
    pub fn append(
        &mut self,
        event_type: impl Into<String>,
        agent: Option<String>,
        input_summary: Option<String>,
        output_summary: Option<String>,
        duration_ms: Option<u64>,
    ) -> u64 {
        let sequence = self.next_sequence();
        let event_type = event_type.into();
        debug!(sequence, %event_type, "ProgressLog::append: called");
        self.entries.push(ProgressEntry {
            sequence,
            created_at: now_ms(),
            event_type,
            agent,
            input_summary,
            output_summary,
            duration_ms,
            metadata: None,
        });
        sequence
    }

    pub fn entries(&self) -> &[ProgressEntry] {
        &self.entries
    }

    /// Last `n` entries, for CLI `status` output.
    pub fn tail(&self, n: usize) -> &[ProgressEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    pub fn record_retry(&mut self) {
        self.retry_count += 1;
    }
}

/// Attempt action kinds: one unified shape for every iteration regardless
/// of whether it was a plan, a code attempt, or a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptAction {
    Plan,
    Code,
    Fix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    Success,
    Failure,
}

/// `{iteration, action, result, error?, timestamp}` exactly as specified;
/// never mutated once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub iteration: u32,
    pub action: AttemptAction,
    pub result: AttemptResult,
    pub error: Option<String>,
    pub timestamp: i64,
}

/// Ordered, append-only sequence of [`AttemptRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AttemptHistory(Vec<AttemptRecord>);

impl AttemptHistory {
    pub fn push(&mut self, iteration: u32, action: AttemptAction, result: AttemptResult, error: Option<String>) {
        debug!(iteration, ?action, ?result, "AttemptHistory::push: called");
        self.0.push(AttemptRecord {
            iteration,
            action,
            result,
            error,
            timestamp: now_ms(),
        });
    }

    pub fn entries(&self) -> &[AttemptRecord] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Estimated size/shape of the work, carried from planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub target_files: Vec<String>,
    pub definition_of_done: Vec<String>,
    pub estimated_complexity: Complexity,
}

/// Sub-task ids and the chosen aggregation strategy for an orchestrated parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    Direct,
    Sequential,
    ParallelMerge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationBlock {
    pub subtask_ids: Vec<String>,
    /// Adjacency: subtask id -> ids it depends on.
    pub dependencies: HashMap<String, Vec<String>>,
    pub strategy: AggregationStrategy,
}

/// Free-form, agent-produced output blobs (plan text, diff text, etc.),
/// kept as tagged JSON at the boundary and parsed on read rather than
/// forcing every agent output into one rigid schema.
pub type AgentOutputs = HashMap<String, Value>;

/// The per-task mutable ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMemory {
    pub task_id: String,
    pub phase: TaskStatus,
    pub context: TaskContext,
    pub progress: ProgressLog,
    pub attempts: AttemptHistory,
    pub agent_outputs: AgentOutputs,
    pub orchestration: Option<OrchestrationBlock>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionMemory {
    pub fn new(task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        debug!(%task_id, "SessionMemory::new: called");
        let now = now_ms();
        Self {
            task_id,
            phase: TaskStatus::New,
            context: TaskContext {
                target_files: Vec::new(),
                definition_of_done: Vec::new(),
                estimated_complexity: Complexity::S,
            },
            progress: ProgressLog::default(),
            attempts: AttemptHistory::default(),
            agent_outputs: HashMap::new(),
            orchestration: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Phase transitions are monotone within one attempt; a replan is the
    /// one exception and resets phase to `Planning` explicitly via the
    /// caller (Agentic Loop), not through this setter's own logic.
    pub fn set_phase(&mut self, phase: TaskStatus) {
        debug!(%self.task_id, from = %self.phase, to = %phase, "SessionMemory::set_phase: called");
        self.phase = phase;
        self.updated_at = now_ms();
    }

    pub fn record_attempt(&mut self, action: AttemptAction, result: AttemptResult, error: Option<String>) {
        let iteration = self.attempts.len() as u32 + 1;
        self.attempts.push(iteration, action, result, error);
        self.updated_at = now_ms();
    }

    pub fn set_agent_output(&mut self, key: impl Into<String>, value: Value) {
        self.agent_outputs.insert(key.into(), value);
        self.updated_at = now_ms();
    }
}

impl Record for SessionMemory {
    fn id(&self) -> &str {
        &self.task_id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "session_memory"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("task_id".to_string(), IndexValue::String(self.task_id.clone()));
        fields.insert("phase".to_string(), IndexValue::String(self.phase.to_string()));
        fields
    }
}

/// An immutable snapshot of relevant session state, taken at phase
/// boundaries and before risky transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub task_id: String,
    pub reason: String,
    pub data: Value,
    pub created_at: i64,
}

impl Checkpoint {
    pub fn new(task_id: impl Into<String>, reason: impl Into<String>, data: Value) -> Self {
        let task_id = task_id.into();
        let reason = reason.into();
        debug!(%task_id, %reason, "Checkpoint::new: called");
        let now = now_ms();
        Self {
            id: generate_id("checkpoint", &format!("{}-{}", task_id, now)),
            task_id,
            reason,
            data,
            created_at: now,
        }
    }
}

impl Record for Checkpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        // Checkpoints are immutable; updated_at tracks creation for the
        // purpose of the generic Store's ordering.
        self.created_at
    }

    fn collection_name() -> &'static str {
        "session_checkpoints"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("task_id".to_string(), IndexValue::String(self.task_id.clone()));
        fields.insert("created_at".to_string(), IndexValue::Int(self.created_at));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_log_sequence_strictly_increases() {
        let mut log = ProgressLog::default();
        let s1 = log.append("task_start", None, None, None, None);
        let s2 = log.append("agent_start", None, None, None, None);
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);
        assert!(s2 > s1);
    }

    #[test]
    fn progress_log_tail_returns_last_n() {
        let mut log = ProgressLog::default();
        for i in 0..15 {
            log.append(format!("event-{i}"), None, None, None, None);
        }
        assert_eq!(log.tail(10).len(), 10);
        assert_eq!(log.tail(10).first().unwrap().sequence, 6);
    }

    #[test]
    fn attempt_history_is_append_only() {
        let mut history = AttemptHistory::default();
        history.push(1, AttemptAction::Plan, AttemptResult::Success, None);
        history.push(2, AttemptAction::Code, AttemptResult::Failure, Some("boom".to_string()));
        assert_eq!(history.len(), 2);
        assert_eq!(history.entries()[0].iteration, 1);
        assert_eq!(history.entries()[1].error.as_deref(), Some("boom"));
    }

    #[test]
    fn session_memory_record_attempt_increments_iteration() {
        let mut session = SessionMemory::new("task-1");
        session.record_attempt(AttemptAction::Code, AttemptResult::Success, None);
        session.record_attempt(AttemptAction::Fix, AttemptResult::Success, None);
        assert_eq!(session.attempts.len(), 2);
        assert_eq!(session.attempts.entries()[1].iteration, 2);
    }

    #[test]
    fn checkpoint_created_at_is_stable() {
        let cp = Checkpoint::new("task-1", "before-validate", serde_json::json!({"phase": "coding"}));
        assert_eq!(cp.task_id, "task-1");
        assert_eq!(cp.reason, "before-validate");
    }
}
