//! LLM-driven agents: Planner, Coder, Fixer, Reflector.
//!
//! Each agent is a thin façade over [`crate::llm::LlmClient`]: build a
//! prompt from task/session context, send one stateless completion
//! request, parse the response into a typed result. No agent holds
//! conversation state between calls — every call starts fresh, per the
//! daemon's "no context rot" design already used for Ralph-style loops.

mod coder;
mod fixer;
mod planner;
mod reflector;

pub use coder::{CoderOutput, run_coder};
pub use fixer::{FixerOutput, run_fixer};
pub use planner::{PlannerOutput, run_planner};
pub use reflector::{ReflectionOutcome, ReflectionResult, Reflector, RootCause, run_reflector};
