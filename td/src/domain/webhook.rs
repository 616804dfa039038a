//! Inbound webhook delivery tracking.
//!
//! The delivery id is the dedup key: processing a delivery id that's
//! already recorded is a no-op. The HTTP handler that receives and
//! verifies the signed payload is out of scope here; this is the
//! persisted queue row it writes, and [`ingest`] is the transport-
//! independent dedup gate every call site (CLI, webhook handler, retry
//! worker) is expected to call before acting on a delivery.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskstore::{IndexValue, Record, Store, StoreError, now_ms};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    #[default]
    Pending,
    InFlight,
    Failed,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// The delivery id from the upstream webhook; also this record's `id`.
    pub id: String,
    pub repo: String,
    pub issue_number: Option<u64>,
    pub payload: Value,
    pub status: WebhookStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WebhookEvent {
    pub fn new(delivery_id: impl Into<String>, repo: impl Into<String>, payload: Value) -> Self {
        let id = delivery_id.into();
        let repo = repo.into();
        debug!(%id, %repo, "WebhookEvent::new: called");
        let now = now_ms();
        Self {
            id,
            repo,
            issue_number: None,
            payload,
            status: WebhookStatus::Pending,
            attempts: 0,
            max_attempts: 5,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Exponential backoff: `initial * 2^attempts`, capped by the caller.
    pub fn schedule_retry(&mut self, initial_backoff_ms: u64) {
        self.attempts += 1;
        self.updated_at = now_ms();
        if self.attempts >= self.max_attempts {
            self.status = WebhookStatus::Failed;
            self.next_retry_at = None;
            debug!(id = %self.id, self.attempts, "WebhookEvent::schedule_retry: dead-lettered");
            return;
        }
        let backoff_ms = initial_backoff_ms.saturating_mul(1u64 << self.attempts.min(16));
        self.next_retry_at = Some(now_ms() + backoff_ms as i64);
        self.status = WebhookStatus::Pending;
    }

    pub fn mark_in_flight(&mut self) {
        self.status = WebhookStatus::InFlight;
        self.updated_at = now_ms();
    }

    pub fn mark_completed(&mut self) {
        self.status = WebhookStatus::Completed;
        self.updated_at = now_ms();
    }

    pub fn is_dead_lettered(&self) -> bool {
        matches!(self.status, WebhookStatus::Failed) && self.attempts >= self.max_attempts
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Outcome of [`ingest`]: whether this delivery id was seen for the
/// first time, or was already recorded (in which case no new row was
/// written and the caller must treat the delivery as a no-op, per
/// §8's testable property "for all webhook deliveries d with seen
/// delivery_id, process(d) is a no-op").
#[derive(Debug)]
pub enum IngestOutcome {
    New(WebhookEvent),
    AlreadySeen(WebhookEvent),
}

/// Record an inbound delivery, deduplicating on `delivery_id`. Never
/// processes the same delivery id twice: a delivery id already present
/// in the store is returned unchanged as [`IngestOutcome::AlreadySeen`]
/// without writing a new row, regardless of how many times it arrives.
pub fn ingest(
    store: &Store,
    delivery_id: &str,
    repo: impl Into<String>,
    payload: Value,
) -> Result<IngestOutcome, StoreError> {
    debug!(delivery_id, "webhook::ingest: called");
    if let Some(existing) = store.get::<WebhookEvent>(delivery_id)? {
        debug!(delivery_id, "webhook::ingest: delivery id already seen, no-op");
        return Ok(IngestOutcome::AlreadySeen(existing));
    }
    let event = WebhookEvent::new(delivery_id, repo, payload);
    store.create(event.clone())?;
    Ok(IngestOutcome::New(event))
}

impl Record for WebhookEvent {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "webhook_events"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(format!("{:?}", self.status)));
        fields.insert("repo".to_string(), IndexValue::String(self.repo.clone()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_is_a_no_op_on_a_seen_delivery_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let first = ingest(&store, "delivery-1", "org/r", serde_json::json!({"n": 1})).unwrap();
        assert!(matches!(first, IngestOutcome::New(_)));

        // Re-delivery of the same id: no new row, original payload untouched.
        let second = ingest(&store, "delivery-1", "org/r", serde_json::json!({"n": 2})).unwrap();
        match second {
            IngestOutcome::AlreadySeen(event) => assert_eq!(event.payload, serde_json::json!({"n": 1})),
            IngestOutcome::New(_) => panic!("expected AlreadySeen for a repeated delivery id"),
        }

        let all: Vec<WebhookEvent> = store.list(&[]).unwrap();
        assert_eq!(all.len(), 1, "a repeated delivery id must not create a second row");
    }

    #[test]
    fn schedule_retry_backs_off_exponentially() {
        let mut event = WebhookEvent::new("delivery-1", "org/r", Value::Null);
        event.schedule_retry(1000);
        let first = event.next_retry_at.unwrap();
        event.schedule_retry(1000);
        let second = event.next_retry_at.unwrap();
        assert!(second - event.updated_at >= first - event.updated_at);
    }

    #[test]
    fn dead_letters_after_max_attempts() {
        let mut event = WebhookEvent::new("delivery-1", "org/r", Value::Null).with_max_attempts(2);
        event.schedule_retry(10);
        assert!(!event.is_dead_lettered());
        event.schedule_retry(10);
        assert!(event.is_dead_lettered());
        assert_eq!(event.status, WebhookStatus::Failed);
    }
}
