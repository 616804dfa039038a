//! Event payload and filter types for the Memory: Hooks bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The fixed, closed set of lifecycle events the bus can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    TaskStart,
    TaskEnd,
    AgentStart,
    AgentEnd,
    ToolCall,
    ToolResult,
    Error,
    Checkpoint,
    PhaseChange,
    MemoryUpdate,
}

impl HookEvent {
    pub const ALL: [HookEvent; 10] = [
        HookEvent::TaskStart,
        HookEvent::TaskEnd,
        HookEvent::AgentStart,
        HookEvent::AgentEnd,
        HookEvent::ToolCall,
        HookEvent::ToolResult,
        HookEvent::Error,
        HookEvent::Checkpoint,
        HookEvent::PhaseChange,
        HookEvent::MemoryUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskStart => "task_start",
            Self::TaskEnd => "task_end",
            Self::AgentStart => "agent_start",
            Self::AgentEnd => "agent_end",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Error => "error",
            Self::Checkpoint => "checkpoint",
            Self::PhaseChange => "phase_change",
            Self::MemoryUpdate => "memory_update",
        }
    }
}

/// Handler priority; ties are broken by registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// A single emitted occurrence of a [`HookEvent`], carrying enough
/// context for a handler to decide relevance without re-fetching state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookPayload {
    pub event: HookEvent,
    pub task_id: String,
    pub agent: Option<String>,
    pub tool: Option<String>,
    pub phase: Option<String>,
    pub data: Value,
    pub timestamp: i64,
}

/// Narrows which payloads a handler is invoked for. `None` fields match
/// anything; all set fields must match for the handler to run.
#[derive(Debug, Clone, Default)]
pub struct HandlerFilter {
    pub agent: Option<String>,
    pub tool: Option<String>,
    pub phase: Option<String>,
}

impl HandlerFilter {
    pub fn matches(&self, payload: &HookPayload) -> bool {
        if let Some(ref agent) = self.agent {
            if payload.agent.as_deref() != Some(agent.as_str()) {
                return false;
            }
        }
        if let Some(ref tool) = self.tool {
            if payload.tool.as_deref() != Some(tool.as_str()) {
                return false;
            }
        }
        if let Some(ref phase) = self.phase {
            if payload.phase.as_deref() != Some(phase.as_str()) {
                return false;
            }
        }
        true
    }
}
