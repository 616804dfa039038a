//! Memory: Hooks — a fixed-event, priority-ordered, synchronous bus that
//! feeds Observations and drives cross-cutting concerns (checkpointing,
//! archival capture) off the ten lifecycle events the Orchestrator and
//! Agentic Loop emit.

mod bus;
mod default_handlers;
mod types;

pub use bus::{HandlerFn, HandlerResult, HookBus};
pub use default_handlers::install_default_handlers;
pub use types::{HandlerFilter, HookEvent, HookPayload, Priority};
