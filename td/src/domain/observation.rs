//! Observation: a single recorded event from the agentic loop — a tool
//! call, a decision, an error, a fix, or a learning.
//!
//! Bifurcated: `full_content` is archival (pushed to `contextstore` by a
//! hook handler), `summary` is working memory kept inline on the
//! session ledger. Per-task sequence numbering is monotonic, same
//! discipline as [`super::ProgressLog`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};
use tracing::debug;

use super::id::generate_id;

/// Maximum length of `summary`, so a long tool call doesn't blow out the
/// session ledger kept in working memory.
pub const SUMMARY_MAX_LEN: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    ToolCall,
    Decision,
    Error,
    Fix,
    Learning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub task_id: String,
    pub sequence: u64,
    pub observation_type: ObservationType,
    pub agent: Option<String>,
    pub tool: Option<String>,
    pub full_content: String,
    pub summary: String,
    pub tokens_used: Option<u64>,
    pub duration_ms: Option<u64>,
    pub tags: Vec<String>,
    pub file_refs: Vec<String>,
    pub created_at: i64,
}

impl Observation {
    pub fn new(
        task_id: impl Into<String>,
        sequence: u64,
        observation_type: ObservationType,
        full_content: impl Into<String>,
    ) -> Self {
        let task_id = task_id.into();
        let full_content = full_content.into();
        let summary = truncate_summary(&full_content);
        debug!(%task_id, sequence, ?observation_type, "Observation::new: called");
        Self {
            id: generate_id("observation", &format!("{}-{}", task_id, sequence)),
            task_id,
            sequence,
            observation_type,
            agent: None,
            tool: None,
            full_content,
            summary,
            tokens_used: None,
            duration_ms: None,
            tags: Vec::new(),
            file_refs: Vec::new(),
            created_at: now_ms(),
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Truncate to [`SUMMARY_MAX_LEN`] on a char boundary.
fn truncate_summary(content: &str) -> String {
    if content.chars().count() <= SUMMARY_MAX_LEN {
        content.to_string()
    } else {
        content.chars().take(SUMMARY_MAX_LEN).collect()
    }
}

impl Record for Observation {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "observations"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("task_id".to_string(), IndexValue::String(self.task_id.clone()));
        fields.insert("sequence".to_string(), IndexValue::Int(self.sequence as i64));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_truncates_at_2000_chars() {
        let long_content = "x".repeat(5000);
        let obs = Observation::new("task-1", 1, ObservationType::ToolCall, long_content);
        assert_eq!(obs.summary.chars().count(), SUMMARY_MAX_LEN);
        assert_eq!(obs.full_content.chars().count(), 5000);
    }

    #[test]
    fn short_content_is_not_truncated() {
        let obs = Observation::new("task-1", 1, ObservationType::Decision, "short");
        assert_eq!(obs.summary, "short");
    }
}
