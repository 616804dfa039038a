//! Coder: produces a candidate unified diff from a plan.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::{CompletionRequest, LlmClient, LlmError, Message};
use crate::patch::normalize_to_unified_diff;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoderOutput {
    pub diff: String,
    pub notes: String,
}

const SYSTEM_PROMPT: &str = "You are implementing a plan as a code change. \
Respond with any brief notes, then a fenced code block containing a unified diff \
(file headers `--- a/...` / `+++ b/...`, hunks starting with `@@`).";

pub async fn run_coder(
    llm: &Arc<dyn LlmClient>,
    plan_text: &str,
    target_files: &[String],
) -> Result<CoderOutput, LlmError> {
    debug!(plan_len = plan_text.len(), targets = target_files.len(), "run_coder: called");
    let mut prompt = format!("Plan:\n{}\n", plan_text);
    if !target_files.is_empty() {
        prompt.push_str(&format!("\nTarget files: {}\n", target_files.join(", ")));
    }
    let request = CompletionRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        messages: vec![Message::user(prompt)],
        max_tokens: 4000,
        tools: vec![],
    };
    let response = llm.complete(request).await?;
    let content = response.content.unwrap_or_default();
    Ok(split_notes_and_diff(&content))
}

fn split_notes_and_diff(content: &str) -> CoderOutput {
    if let Some(start) = content.find("```") {
        let after_fence = &content[start + 3..];
        let after_fence = after_fence.strip_prefix("diff\n").unwrap_or(after_fence);
        if let Some(end) = after_fence.find("```") {
            let notes = content[..start].trim().to_string();
            let raw_diff = after_fence[..end].to_string();
            return CoderOutput {
                diff: normalize_to_unified_diff(&raw_diff),
                notes,
            };
        }
    }
    CoderOutput {
        diff: normalize_to_unified_diff(content),
        notes: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_diff_and_notes() {
        let content = "Implements login.\n```diff\n--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1 +1 @@\n-old\n+new\n```";
        let output = split_notes_and_diff(content);
        assert_eq!(output.notes, "Implements login.");
        assert!(output.diff.contains("@@ -1 +1 @@"));
    }
}
