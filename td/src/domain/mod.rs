//! Domain types for the autonomous development pipeline.
//!
//! Every type here implements [`Record`] for persistence through
//! `taskstore`. `Task`/`SessionMemory` are the per-task working set;
//! `Observation` and `WebhookEvent` round out the event/audit trail;
//! `RepoMemory` is the admin-mutated static configuration layer.

#[allow(unused_imports)]
use tracing::debug;

mod id;
mod observation;
mod priority;
mod repo_memory;
mod session;
mod task;
mod webhook;

pub use id::{DomainId, IdResolver, ResolveOutcome};
pub use observation::{Observation, ObservationType, SUMMARY_MAX_LEN};
pub use priority::Priority;
pub use repo_memory::RepoMemory;
pub use session::{
    AggregationStrategy, AgentOutputs, AttemptAction, AttemptHistory, AttemptRecord, AttemptResult, Checkpoint,
    OrchestrationBlock, ProgressEntry, ProgressLog, SessionMemory, TaskContext,
};
pub use task::{Complexity, Task, TaskStatus};
pub use webhook::{IngestOutcome, WebhookEvent, WebhookStatus, ingest};

// Re-export taskstore types for convenience
pub use taskstore::{Filter, FilterOp, IndexValue, Record, Store};
