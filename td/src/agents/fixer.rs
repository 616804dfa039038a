//! Fixer: revises the current diff in response to reflection feedback.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::{CompletionRequest, LlmClient, LlmError, Message};
use crate::patch::normalize_to_unified_diff;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixerOutput {
    pub diff: String,
}

const SYSTEM_PROMPT: &str = "You are fixing a failing code change based on validation feedback and reflection. \
Respond with a fenced code block containing the revised unified diff.";

pub async fn run_fixer(
    llm: &Arc<dyn LlmClient>,
    current_diff: &str,
    feedback: &str,
) -> Result<FixerOutput, LlmError> {
    debug!(diff_len = current_diff.len(), feedback_len = feedback.len(), "run_fixer: called");
    let prompt = format!("Current diff:\n```diff\n{}\n```\n\nFeedback:\n{}", current_diff, feedback);
    let request = CompletionRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        messages: vec![Message::user(prompt)],
        max_tokens: 4000,
        tools: vec![],
    };
    let response = llm.complete(request).await?;
    let content = response.content.unwrap_or_default();
    Ok(FixerOutput {
        diff: normalize_to_unified_diff(&extract_diff(&content)),
    })
}

fn extract_diff(content: &str) -> String {
    if let Some(start) = content.find("```") {
        let after_fence = &content[start + 3..];
        let after_fence = after_fence.strip_prefix("diff\n").unwrap_or(after_fence);
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].to_string();
        }
    }
    content.to_string()
}
