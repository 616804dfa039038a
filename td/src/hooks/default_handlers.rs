//! Default handlers: translate bus events into [`Observation`] rows on
//! the session ledger.

use std::sync::Arc;

use taskstore::Store;
use tracing::debug;

use crate::domain::{Observation, ObservationType};

use super::bus::HookBus;
use super::types::{HandlerFilter, HookEvent, Priority};

/// Map a [`HookEvent`] to the [`ObservationType`] its default handler
/// records under. `checkpoint`/`phase_change`/`memory_update` are
/// recorded by the memory layer directly and have no default handler
/// here.
fn observation_type_for(event: HookEvent) -> Option<ObservationType> {
    match event {
        HookEvent::ToolCall | HookEvent::ToolResult => Some(ObservationType::ToolCall),
        HookEvent::Error => Some(ObservationType::Error),
        HookEvent::AgentStart | HookEvent::AgentEnd | HookEvent::TaskStart | HookEvent::TaskEnd => {
            Some(ObservationType::Decision)
        }
        HookEvent::Checkpoint | HookEvent::PhaseChange | HookEvent::MemoryUpdate => None,
    }
}

/// Register the default set of handlers that persist every event as an
/// [`Observation`]. Runs at [`Priority::Low`] so any domain-specific
/// handler (e.g. the validator's terminal-error short-circuit) observes
/// the payload first.
pub fn install_default_handlers(bus: &HookBus, store: Arc<Store>) {
    debug!("install_default_handlers: called");
    for event in HookEvent::ALL {
        let Some(observation_type) = observation_type_for(event) else {
            continue;
        };
        let store = store.clone();
        bus.register(
            event,
            format!("default_observation::{}", event.as_str()),
            Priority::Low,
            HandlerFilter::default(),
            move |payload| {
                let sequence = next_sequence(&store, &payload.task_id)?;
                let mut obs = Observation::new(
                    &payload.task_id,
                    sequence,
                    observation_type,
                    serde_json::to_string(&payload.data).unwrap_or_default(),
                );
                if let Some(ref agent) = payload.agent {
                    obs = obs.with_agent(agent.clone());
                }
                if let Some(ref tool) = payload.tool {
                    obs = obs.with_tool(tool.clone());
                }
                store.create(obs)?;
                Ok(())
            },
        );
    }
}

fn next_sequence(store: &Store, task_id: &str) -> eyre::Result<u64> {
    let filter = taskstore::Filter::eq("task_id", taskstore::IndexValue::String(task_id.to_string()));
    let existing: Vec<Observation> = store.list(&[filter])?;
    Ok(existing.iter().map(|o| o.sequence).max().map(|s| s + 1).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::hooks::types::HookPayload;

    #[test]
    fn tool_call_becomes_observation() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let bus = HookBus::new();
        install_default_handlers(&bus, store.clone());

        bus.emit(HookPayload {
            event: HookEvent::ToolCall,
            task_id: "task-1".to_string(),
            agent: Some("coder".to_string()),
            tool: Some("apply_patch".to_string()),
            phase: None,
            data: json!({"path": "src/lib.rs"}),
            timestamp: 0,
        });

        let observations: Vec<Observation> = store.list(&[]).unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].tool.as_deref(), Some("apply_patch"));
    }

    #[test]
    fn checkpoint_has_no_default_observation() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let bus = HookBus::new();
        install_default_handlers(&bus, store.clone());

        bus.emit(HookPayload {
            event: HookEvent::Checkpoint,
            task_id: "task-1".to_string(),
            agent: None,
            tool: None,
            phase: None,
            data: json!({}),
            timestamp: 0,
        });

        let observations: Vec<Observation> = store.list(&[]).unwrap();
        assert!(observations.is_empty());
    }
}
