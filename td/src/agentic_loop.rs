//! Agentic Loop: reflection-driven self-correction after a failed
//! validation, bounded by iteration and replan budgets.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agents::{ReflectionOutcome, run_fixer, run_planner, run_reflector};
use crate::domain::{AttemptAction, AttemptResult, Task};
use crate::hooks::{HookBus, HookEvent, HookPayload};
use crate::llm::LlmClient;
use crate::memory::SessionStore;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub max_replans: u32,
    pub confidence_threshold: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            max_replans: 2,
            confidence_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopResult {
    pub success: bool,
    pub iterations: u32,
    pub replans: u32,
    pub final_diff: Option<String>,
    pub reason: String,
    pub replanned: bool,
    /// `true` only when the reflection itself recommended `abort`; the
    /// Orchestrator fails the task directly on this, distinct from a
    /// `fix` outcome (which goes back through Validating) and distinct
    /// from `max_iterations_exceeded` (also a direct failure, but not
    /// an abort recommendation).
    pub aborted: bool,
}

/// Count prior reflect-and-act cycles already spent on this task, so
/// budgets accumulate across calls rather than resetting each time the
/// Orchestrator re-enters `Reflecting` (§4.8 models `Reflecting` as one
/// reflect-decide-act step per entry, not an internal multi-iteration
/// loop: after a `fix`, control returns to `Validating` and a fresh
/// validator failure is what brings the task back here).
fn attempts_spent(
    session: &crate::domain::SessionMemory,
    action: AttemptAction,
) -> u32 {
    session
        .attempts
        .entries()
        .iter()
        .filter(|a| matches!((a.action, a.result), (act, AttemptResult::Failure) if act == action))
        .count() as u32
}

/// Run one reflect-and-act cycle of the Agentic Loop for `task`, given
/// the last validator output. Mutates `task.current_diff` in place when
/// a fix is produced and records the attempt on the session ledger.
/// Returns after exactly one reflection: `replanned` or `aborted` tell
/// the Orchestrator which state to exit to, per §4.8.
pub async fn run(
    task: &mut Task,
    test_output: &str,
    sessions: &SessionStore,
    hooks: &HookBus,
    llm: &Arc<dyn LlmClient>,
    config: &LoopConfig,
) -> eyre::Result<LoopResult> {
    debug!(task_id = %task.id, "agentic_loop::run: called");
    let session = sessions
        .load(&task.id)?
        .ok_or_else(|| eyre::eyre!("no session memory for task {}", task.id))?;

    // Both budgets are per-task, recovered from the attempt history
    // already persisted rather than a call-local counter, since each
    // `replan` or `fix` exits this function and the Orchestrator may
    // re-enter `run` fresh on a later validator failure.
    let replans = attempts_spent(&session, AttemptAction::Plan);
    let iterations_spent = replans + attempts_spent(&session, AttemptAction::Fix);

    if iterations_spent >= config.max_iterations {
        return Ok(LoopResult {
            success: false,
            iterations: iterations_spent,
            replans,
            final_diff: task.current_diff.clone(),
            reason: "max_iterations_exceeded".to_string(),
            replanned: false,
            aborted: false,
        });
    }

    let current_diff = task.current_diff.clone().unwrap_or_default();

    let reflection = run_reflector(
        llm,
        &task.body,
        &task.plan.join("\n"),
        &current_diff,
        test_output,
        &session.attempts,
    )
    .await?;

    hooks.emit(HookPayload {
        event: HookEvent::MemoryUpdate,
        task_id: task.id.clone(),
        agent: Some("reflector".to_string()),
        tool: None,
        phase: Some("reflecting".to_string()),
        data: serde_json::to_value(&reflection).unwrap_or_default(),
        timestamp: taskstore::now_ms(),
    });

    if reflection.confidence < config.confidence_threshold {
        warn!(task_id = %task.id, confidence = reflection.confidence, "agentic_loop: low-confidence reflection, proceeding anyway");
    }

    match reflection.recommendation {
        ReflectionOutcome::Abort => Ok(LoopResult {
            success: false,
            iterations: iterations_spent,
            replans,
            final_diff: Some(current_diff),
            reason: reflection.diagnosis,
            replanned: false,
            aborted: true,
        }),
        ReflectionOutcome::Replan if replans < config.max_replans => {
            let merged_issue = format!("{}\n\nReflection feedback:\n{}", task.body, reflection.feedback);
            let plan = run_planner(llm, &merged_issue, &[]).await?;
            task.plan = vec![plan.plan_text.clone()];
            task.target_files = plan.target_files.clone();
            sessions.record_attempt(&task.id, AttemptAction::Plan, AttemptResult::Failure, Some(reflection.diagnosis.clone()))?;
            Ok(LoopResult {
                success: false,
                iterations: iterations_spent + 1,
                replans: replans + 1,
                final_diff: Some(current_diff),
                reason: "replanned".to_string(),
                replanned: true,
                aborted: false,
            })
        }
        ReflectionOutcome::Replan | ReflectionOutcome::Fix => {
            let fix = run_fixer(llm, &current_diff, &reflection.feedback).await?;
            let new_diff = fix.diff;
            task.set_diff(new_diff.clone());
            sessions.record_attempt(&task.id, AttemptAction::Fix, AttemptResult::Failure, Some(reflection.diagnosis.clone()))?;
            Ok(LoopResult {
                success: false,
                iterations: iterations_spent + 1,
                replans,
                final_diff: Some(new_diff),
                reason: "fix_applied".to_string(),
                replanned: false,
                aborted: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::MockLlmClient;
    use crate::llm::{CompletionResponse, StopReason, TokenUsage};
    use taskstore::Store;
    use tempfile::tempdir;

    fn mock_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            content: Some(text.to_string()),
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }
    }

    #[tokio::test]
    async fn abort_recommendation_returns_failure_immediately() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let sessions = SessionStore::new(store);
        sessions.create("task-1").unwrap();

        let mut task = Task::new("org/r", 1, "t", "b");
        task.id = "task-1".to_string();
        task.set_diff("--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n");

        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new(vec![mock_response(
            "ROOT_CAUSE: environment\nRECOMMENDATION: abort\nCONFIDENCE: 0.9\nNo sandbox available.",
        )]));
        let hooks = HookBus::new();

        let result = run(&mut task, "boom", &sessions, &hooks, &llm, &LoopConfig::default()).await.unwrap();
        assert!(!result.success);
        assert!(result.aborted);
        assert!(!result.replanned);
    }

    #[tokio::test]
    async fn fix_recommendation_updates_diff_and_records_attempt() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let sessions = SessionStore::new(store);
        sessions.create("task-1").unwrap();

        let mut task = Task::new("org/r", 1, "t", "b");
        task.id = "task-1".to_string();
        task.set_diff("--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n");

        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new(vec![
            mock_response("ROOT_CAUSE: code\nRECOMMENDATION: fix\nCONFIDENCE: 0.9\nMissing import."),
            mock_response("```diff\n--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+c\n```"),
        ]));
        let hooks = HookBus::new();
        let mut config = LoopConfig::default();
        config.max_iterations = 1;

        let result = run(&mut task, "boom", &sessions, &hooks, &llm, &config).await.unwrap();
        assert!(!result.success);
        assert!(result.final_diff.unwrap().contains("+c"));

        let session = sessions.load("task-1").unwrap().unwrap();
        assert_eq!(session.attempts.len(), 1);
    }

    /// §8 scenario 4: with `maxReplans=2`, three consecutive reflections
    /// that recommend `replan` should see the first two executed and the
    /// third fall through to `fix`, with the replan counter landing on
    /// exactly 2. The budget must hold across three separate calls to
    /// `run`, mirroring how the Orchestrator re-enters `Reflecting` after
    /// each replan cycles back through Planning -> Coding -> Validating.
    #[tokio::test]
    async fn replan_budget_enforced_across_calls() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let sessions = SessionStore::new(store);
        sessions.create("task-1").unwrap();

        let mut task = Task::new("org/r", 1, "t", "b");
        task.id = "task-1".to_string();
        task.set_diff("--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n");

        let replan_reflection = || mock_response("ROOT_CAUSE: plan\nRECOMMENDATION: replan\nCONFIDENCE: 0.9\nWrong approach.");
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new(vec![
            replan_reflection(),
            mock_response("re-planned: do it differently"),
            replan_reflection(),
            mock_response("re-planned: try again"),
            replan_reflection(),
            mock_response("```diff\n--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+fixed\n```"),
        ]));
        let hooks = HookBus::new();
        let mut config = LoopConfig::default();
        config.max_replans = 2;
        config.max_iterations = 10;

        let r1 = run(&mut task, "boom", &sessions, &hooks, &llm, &config).await.unwrap();
        assert!(r1.replanned);
        assert_eq!(r1.replans, 1);

        let r2 = run(&mut task, "boom", &sessions, &hooks, &llm, &config).await.unwrap();
        assert!(r2.replanned);
        assert_eq!(r2.replans, 2);

        let r3 = run(&mut task, "boom", &sessions, &hooks, &llm, &config).await.unwrap();
        assert!(!r3.replanned);
        assert_eq!(r3.replans, 2);
        assert!(r3.final_diff.unwrap().contains("+fixed"));
    }
}
