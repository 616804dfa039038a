//! Memory: Session — per-task ledger operations: create/load, append
//! progress, record attempts, checkpoint, and rollback.

use std::sync::Arc;

use serde_json::Value;
use taskstore::{Filter, IndexValue, Store};
use tracing::debug;

use crate::domain::{AttemptAction, AttemptResult, Checkpoint, SessionMemory, TaskStatus};

pub struct SessionStore {
    store: Arc<Store>,
}

impl SessionStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn create(&self, task_id: &str) -> taskstore::StoreResult<SessionMemory> {
        debug!(task_id, "SessionStore::create: called");
        let session = SessionMemory::new(task_id);
        self.store.create(session.clone())?;
        Ok(session)
    }

    pub fn load(&self, task_id: &str) -> taskstore::StoreResult<Option<SessionMemory>> {
        self.store.get(task_id)
    }

    /// Atomic (single read-modify-write through `Store::update`) append
    /// of a progress entry; sequence numbers come from the ledger
    /// itself, never the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn append_progress(
        &self,
        task_id: &str,
        event_type: impl Into<String>,
        agent: Option<String>,
        output_summary: Option<String>,
    ) -> taskstore::StoreResult<u64> {
        let mut session = self.require(task_id)?;
        let sequence = session.progress.append(event_type, agent, None, output_summary, None);
        self.store.update(session)?;
        Ok(sequence)
    }

    pub fn record_attempt(
        &self,
        task_id: &str,
        action: AttemptAction,
        result: AttemptResult,
        error: Option<String>,
    ) -> taskstore::StoreResult<()> {
        let mut session = self.require(task_id)?;
        session.record_attempt(action, result, error);
        self.store.update(session)
    }

    pub fn set_phase(&self, task_id: &str, phase: TaskStatus) -> taskstore::StoreResult<()> {
        let mut session = self.require(task_id)?;
        session.set_phase(phase);
        self.store.update(session)
    }

    pub fn set_agent_output(&self, task_id: &str, key: impl Into<String>, value: Value) -> taskstore::StoreResult<()> {
        let mut session = self.require(task_id)?;
        session.set_agent_output(key, value);
        self.store.update(session)
    }

    /// Snapshot `agent_outputs` and `phase` under `reason`.
    pub fn save_checkpoint(&self, task_id: &str, reason: impl Into<String>) -> taskstore::StoreResult<String> {
        let session = self.require(task_id)?;
        let data = serde_json::json!({
            "phase": session.phase,
            "agent_outputs": session.agent_outputs,
        });
        let checkpoint = Checkpoint::new(task_id, reason, data);
        let id = checkpoint.id.clone();
        self.store.create(checkpoint)?;
        Ok(id)
    }

    /// Immutable, returned newest-first per task.
    pub fn list_checkpoints(&self, task_id: &str) -> taskstore::StoreResult<Vec<Checkpoint>> {
        let filter = Filter::eq("task_id", IndexValue::String(task_id.to_string()));
        let mut checkpoints: Vec<Checkpoint> = self.store.list(&[filter])?;
        checkpoints.sort_by_key(|c| std::cmp::Reverse(c.created_at));
        Ok(checkpoints)
    }

    /// Restore `phase` and `agent_outputs` from `checkpoint_id`. The full
    /// `ProgressLog` and `AttemptHistory` are **never** touched — history
    /// is append-only regardless of how many times a task rolls back.
    pub fn rollback_to(&self, task_id: &str, checkpoint_id: &str) -> taskstore::StoreResult<SessionMemory> {
        debug!(task_id, checkpoint_id, "SessionStore::rollback_to: called");
        let checkpoint: Checkpoint = self.store.get(checkpoint_id)?.ok_or_else(|| taskstore::StoreError::NotFound {
            collection: "session_checkpoints",
            id: checkpoint_id.to_string(),
        })?;
        let mut session = self.require(task_id)?;

        if let Some(phase) = checkpoint.data.get("phase") {
            if let Ok(phase) = serde_json::from_value::<TaskStatus>(phase.clone()) {
                session.phase = phase;
            }
        }
        if let Some(outputs) = checkpoint.data.get("agent_outputs") {
            if let Ok(outputs) = serde_json::from_value(outputs.clone()) {
                session.agent_outputs = outputs;
            }
        }
        session.updated_at = taskstore::now_ms();
        self.store.update(session.clone())?;
        Ok(session)
    }

    fn require(&self, task_id: &str) -> taskstore::StoreResult<SessionMemory> {
        self.store.get(task_id)?.ok_or_else(|| taskstore::StoreError::NotFound {
            collection: "session_memory",
            id: task_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> SessionStore {
        let dir = tempdir().unwrap();
        SessionStore::new(Arc::new(Store::open(dir.path()).unwrap()))
    }

    #[test]
    fn rollback_preserves_progress_and_attempts() {
        let sessions = store();
        sessions.create("task-1").unwrap();
        sessions
            .append_progress("task-1", "phase_change", None, Some("started".to_string()))
            .unwrap();
        sessions.record_attempt("task-1", AttemptAction::Code, AttemptResult::Failure, None).unwrap();
        let checkpoint_id = sessions.save_checkpoint("task-1", "before risky transition").unwrap();

        sessions.set_phase("task-1", TaskStatus::Validating).unwrap();
        sessions.set_agent_output("task-1", "diff", serde_json::json!("garbage")).unwrap();
        sessions
            .append_progress("task-1", "phase_change", None, Some("validating".to_string()))
            .unwrap();
        sessions.record_attempt("task-1", AttemptAction::Fix, AttemptResult::Failure, None).unwrap();

        let restored = sessions.rollback_to("task-1", &checkpoint_id).unwrap();
        assert_eq!(restored.phase, TaskStatus::New);
        assert!(restored.agent_outputs.is_empty());
        assert_eq!(restored.progress.entries().len(), 2);
        assert_eq!(restored.attempts.len(), 2);
    }

    #[test]
    fn checkpoints_listed_newest_first() {
        let sessions = store();
        sessions.create("task-1").unwrap();
        let first = sessions.save_checkpoint("task-1", "first").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = sessions.save_checkpoint("task-1", "second").unwrap();
        let listed = sessions.list_checkpoints("task-1").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second);
        assert_eq!(listed[1].id, first);
    }
}
