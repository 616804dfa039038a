//! Thin typed façade over the linked issue tracker: transition a ticket
//! to an "in review" state once its PR is opened. Deliberately narrow —
//! the Orchestrator never reads ticket fields back through this trait,
//! it only pushes state forward.

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IssueTrackerError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected response ({status}): {body}")]
    UnexpectedResponse { status: u16, body: String },
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn transition_to_in_review(&self, ticket_id: &str) -> Result<(), IssueTrackerError>;
}

/// Linear-shaped GraphQL implementation. Also usable, unmodified, for
/// any tracker exposing a single "move to state" mutation keyed by a
/// state name.
pub struct LinearIssueTracker {
    http: Client,
    api_url: String,
    token: String,
    in_review_state_id: String,
}

impl LinearIssueTracker {
    pub fn new(token: impl Into<String>, in_review_state_id: impl Into<String>) -> Self {
        Self {
            http: Client::builder().build().expect("reqwest client builds with default config"),
            api_url: "https://api.linear.app/graphql".to_string(),
            token: token.into(),
            in_review_state_id: in_review_state_id.into(),
        }
    }
}

#[async_trait]
impl IssueTracker for LinearIssueTracker {
    async fn transition_to_in_review(&self, ticket_id: &str) -> Result<(), IssueTrackerError> {
        debug!(ticket_id, "LinearIssueTracker::transition_to_in_review: called");
        let query = serde_json::json!({
            "query": "mutation($id: String!, $stateId: String!) { issueUpdate(id: $id, input: { stateId: $stateId }) { success } }",
            "variables": { "id": ticket_id, "stateId": self.in_review_state_id },
        });
        let response = self
            .http
            .post(&self.api_url)
            .header("Authorization", self.token.clone())
            .json(&query)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(IssueTrackerError::UnexpectedResponse { status, body });
        }
        Ok(())
    }
}

/// No-op implementation for repos with no linked tracker configured.
pub struct NullIssueTracker;

#[async_trait]
impl IssueTracker for NullIssueTracker {
    async fn transition_to_in_review(&self, _ticket_id: &str) -> Result<(), IssueTrackerError> {
        Ok(())
    }
}
