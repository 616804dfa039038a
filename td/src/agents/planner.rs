//! Planner: turns an issue body into a target file list, definition of
//! done, and a rough complexity estimate.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Complexity;
use crate::llm::{CompletionRequest, LlmClient, LlmError, Message};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerOutput {
    pub plan_text: String,
    pub target_files: Vec<String>,
    pub definition_of_done: Vec<String>,
    pub estimated_complexity: Complexity,
}

const SYSTEM_PROMPT: &str = "You are a senior engineer producing an implementation plan for a code change. \
Respond with a plan description, followed by a line `FILES:` and a comma-separated list of target files, \
a line `DONE:` and a comma-separated definition of done, and a line `COMPLEXITY:` with one of XS, S, M, L, XL.";

pub async fn run_planner(
    llm: &Arc<dyn LlmClient>,
    issue_body: &str,
    repo_hints: &[String],
) -> Result<PlannerOutput, LlmError> {
    debug!(issue_len = issue_body.len(), "run_planner: called");
    let mut prompt = issue_body.to_string();
    if !repo_hints.is_empty() {
        prompt.push_str("\n\nTech stack hints: ");
        prompt.push_str(&repo_hints.join(", "));
    }
    let request = CompletionRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        messages: vec![Message::user(prompt)],
        max_tokens: 2000,
        tools: vec![],
    };
    let response = llm.complete(request).await?;
    let content = response.content.unwrap_or_default();
    Ok(parse_planner_output(&content))
}

fn parse_planner_output(content: &str) -> PlannerOutput {
    let mut target_files = Vec::new();
    let mut definition_of_done = Vec::new();
    let mut estimated_complexity = Complexity::M;
    let mut plan_lines = Vec::new();

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("FILES:") {
            target_files = split_csv(rest);
        } else if let Some(rest) = line.strip_prefix("DONE:") {
            definition_of_done = split_csv(rest);
        } else if let Some(rest) = line.strip_prefix("COMPLEXITY:") {
            estimated_complexity = parse_complexity(rest.trim());
        } else {
            plan_lines.push(line);
        }
    }

    PlannerOutput {
        plan_text: plan_lines.join("\n").trim().to_string(),
        target_files,
        definition_of_done,
        estimated_complexity,
    }
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
}

fn parse_complexity(s: &str) -> Complexity {
    match s.to_uppercase().as_str() {
        "XS" => Complexity::Xs,
        "S" => Complexity::S,
        "L" => Complexity::L,
        "XL" => Complexity::Xl,
        _ => Complexity::M,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_output() {
        let content = "Add a login form.\nFILES: src/login.rs, src/routes.rs\nDONE: tests pass, form renders\nCOMPLEXITY: M";
        let output = parse_planner_output(content);
        assert_eq!(output.target_files, vec!["src/login.rs", "src/routes.rs"]);
        assert_eq!(output.definition_of_done, vec!["tests pass", "form renders"]);
        assert_eq!(output.estimated_complexity, Complexity::M);
        assert_eq!(output.plan_text, "Add a login form.");
    }

    #[test]
    fn missing_fields_default_sensibly() {
        let output = parse_planner_output("Just a plan with no structured fields.");
        assert!(output.target_files.is_empty());
        assert_eq!(output.estimated_complexity, Complexity::M);
    }
}
