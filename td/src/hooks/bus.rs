//! In-process hook bus: synchronous, priority-ordered handler dispatch.
//!
//! Unlike a pub/sub channel, emit is a direct call stack: the emitting
//! code blocks until every matching handler has run, in priority order
//! (high before normal before low; ties break by registration order). A
//! handler that returns an error is counted and the next handler still
//! runs — one bad handler never stops observation for the rest.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use tracing::{debug, warn};

use super::types::{HandlerFilter, HookEvent, HookPayload, Priority};

pub type HandlerResult = eyre::Result<()>;
pub type HandlerFn = dyn Fn(&HookPayload) -> HandlerResult + Send + Sync;

struct RegisteredHandler {
    name: String,
    priority: Priority,
    filter: HandlerFilter,
    order: u64,
    handler: Box<HandlerFn>,
}

/// Central hook bus. One instance per daemon process; cheap to clone
/// (internals are `Arc`-shared).
#[derive(Clone)]
pub struct HookBus {
    inner: Arc<Inner>,
}

struct Inner {
    handlers: Mutex<HashMap<HookEvent, Vec<RegisteredHandler>>>,
    counts: Mutex<HashMap<HookEvent, u64>>,
    error_counts: Mutex<HashMap<HookEvent, u64>>,
    enabled: AtomicBool,
    next_order: AtomicU64,
}

impl HookBus {
    pub fn new() -> Self {
        debug!("HookBus::new: called");
        Self {
            inner: Arc::new(Inner {
                handlers: Mutex::new(HashMap::new()),
                counts: Mutex::new(HashMap::new()),
                error_counts: Mutex::new(HashMap::new()),
                enabled: AtomicBool::new(true),
                next_order: AtomicU64::new(0),
            }),
        }
    }

    pub fn enable(&self) {
        self.inner.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Register a handler for `event`. Returns the registration order,
    /// useful only for tests that need deterministic tie-breaking.
    pub fn register(
        &self,
        event: HookEvent,
        name: impl Into<String>,
        priority: Priority,
        filter: HandlerFilter,
        handler: impl Fn(&HookPayload) -> HandlerResult + Send + Sync + 'static,
    ) -> u64 {
        let order = self.inner.next_order.fetch_add(1, Ordering::SeqCst);
        let name = name.into();
        debug!(?event, %name, ?priority, order, "HookBus::register: called");
        let mut handlers = self.inner.handlers.lock().expect("hook handlers lock poisoned");
        handlers.entry(event).or_default().push(RegisteredHandler {
            name,
            priority,
            filter,
            order,
            handler: Box::new(handler),
        });
        handlers.get_mut(&event).unwrap().sort_by_key(|h| (h.priority, h.order));
        order
    }

    /// Emit `payload`. No-op (other than the count) when disabled.
    /// Runs every matching handler for `payload.event` in priority
    /// order; a handler error is logged and counted, never propagated.
    pub fn emit(&self, payload: HookPayload) {
        *self.inner.counts.lock().expect("hook counts lock poisoned").entry(payload.event).or_insert(0) += 1;
        if !self.is_enabled() {
            return;
        }
        let handlers = self.inner.handlers.lock().expect("hook handlers lock poisoned");
        let Some(registered) = handlers.get(&payload.event) else {
            return;
        };
        for h in registered {
            if !h.filter.matches(&payload) {
                continue;
            }
            if let Err(err) = (h.handler)(&payload) {
                warn!(handler = %h.name, event = ?payload.event, %err, "HookBus::emit: handler failed");
                *self
                    .inner
                    .error_counts
                    .lock()
                    .expect("hook error counts lock poisoned")
                    .entry(payload.event)
                    .or_insert(0) += 1;
            }
        }
    }

    /// Count of emits for `event` since bus creation, regardless of
    /// whether any handler was registered or the bus was enabled.
    pub fn count(&self, event: HookEvent) -> u64 {
        *self.inner.counts.lock().expect("hook counts lock poisoned").get(&event).unwrap_or(&0)
    }

    pub fn error_count(&self, event: HookEvent) -> u64 {
        *self
            .inner
            .error_counts
            .lock()
            .expect("hook error counts lock poisoned")
            .get(&event)
            .unwrap_or(&0)
    }

    pub fn counts_by_event(&self) -> HashMap<HookEvent, u64> {
        self.inner.counts.lock().expect("hook counts lock poisoned").clone()
    }
}

impl Default for HookBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtOrdering};

    use serde_json::json;

    use super::*;

    fn payload(event: HookEvent) -> HookPayload {
        HookPayload {
            event,
            task_id: "task-1".to_string(),
            agent: None,
            tool: None,
            phase: None,
            data: json!({}),
            timestamp: 0,
        }
    }

    #[test]
    fn handlers_run_in_priority_order() {
        let bus = HookBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (name, priority) in [("low", Priority::Low), ("high", Priority::High), ("normal", Priority::Normal)] {
            let order = order.clone();
            bus.register(HookEvent::TaskStart, name, priority, HandlerFilter::default(), move |_| {
                order.lock().unwrap().push(name.to_string());
                Ok(())
            });
        }
        bus.emit(payload(HookEvent::TaskStart));
        assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low"]);
    }

    #[test]
    fn handler_error_does_not_stop_siblings() {
        let bus = HookBus::new();
        let ran = Arc::new(AtomicUsize::new(0));
        bus.register(HookEvent::Error, "failing", Priority::High, HandlerFilter::default(), |_| {
            eyre::bail!("boom")
        });
        let ran2 = ran.clone();
        bus.register(HookEvent::Error, "ok", Priority::Normal, HandlerFilter::default(), move |_| {
            ran2.fetch_add(1, AtOrdering::SeqCst);
            Ok(())
        });
        bus.emit(payload(HookEvent::Error));
        assert_eq!(ran.load(AtOrdering::SeqCst), 1);
        assert_eq!(bus.error_count(HookEvent::Error), 1);
    }

    #[test]
    fn disabled_bus_skips_handlers_but_still_counts() {
        let bus = HookBus::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        bus.register(HookEvent::Checkpoint, "h", Priority::Normal, HandlerFilter::default(), move |_| {
            ran2.fetch_add(1, AtOrdering::SeqCst);
            Ok(())
        });
        bus.disable();
        bus.emit(payload(HookEvent::Checkpoint));
        assert_eq!(ran.load(AtOrdering::SeqCst), 0);
        assert_eq!(bus.count(HookEvent::Checkpoint), 1);
    }

    #[test]
    fn filter_restricts_invocation() {
        let bus = HookBus::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let filter = HandlerFilter {
            tool: Some("cargo_test".to_string()),
            ..Default::default()
        };
        bus.register(HookEvent::ToolCall, "h", Priority::Normal, filter, move |_| {
            ran2.fetch_add(1, AtOrdering::SeqCst);
            Ok(())
        });
        let mut other = payload(HookEvent::ToolCall);
        other.tool = Some("grep".to_string());
        bus.emit(other);
        assert_eq!(ran.load(AtOrdering::SeqCst), 0);

        let mut matching = payload(HookEvent::ToolCall);
        matching.tool = Some("cargo_test".to_string());
        bus.emit(matching);
        assert_eq!(ran.load(AtOrdering::SeqCst), 1);
    }
}
