//! Reflector: side-effect-free diagnosis step that decides between
//! fixing the current diff, replanning, or aborting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::AttemptHistory;
use crate::llm::{CompletionRequest, LlmClient, LlmError, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCause {
    Plan,
    Code,
    Test,
    Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionOutcome {
    Replan,
    Fix,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionResult {
    pub diagnosis: String,
    pub root_cause: RootCause,
    pub recommendation: ReflectionOutcome,
    pub feedback: String,
    pub confidence: f64,
}

pub struct Reflector;

const SYSTEM_PROMPT: &str = "You are diagnosing why a code change failed validation. \
Given the issue, the plan, the current diff, test output, and prior attempts, respond with: \
a line `ROOT_CAUSE:` (one of plan, code, test, environment), \
a line `RECOMMENDATION:` (one of replan, fix, abort), \
a line `CONFIDENCE:` (a number between 0 and 1), \
then a feedback paragraph for whichever agent acts next.";

/// Produce a [`ReflectionResult`] from the issue, plan, diff, test output,
/// and prior attempt records. Performs no writes of its own — the caller
/// (the Agentic Loop) is responsible for recording the outcome.
pub async fn run_reflector(
    llm: &Arc<dyn LlmClient>,
    issue_body: &str,
    plan_text: &str,
    current_diff: &str,
    test_output: &str,
    attempts: &AttemptHistory,
) -> Result<ReflectionResult, LlmError> {
    debug!(attempts = attempts.len(), "run_reflector: called");
    let prompt = format!(
        "Issue:\n{}\n\nPlan:\n{}\n\nCurrent diff:\n```diff\n{}\n```\n\nTest output:\n{}\n\nPrior attempts: {}",
        issue_body,
        plan_text,
        current_diff,
        test_output,
        attempts.len()
    );
    let request = CompletionRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        messages: vec![Message::user(prompt)],
        max_tokens: 1500,
        tools: vec![],
    };
    let response = llm.complete(request).await?;
    let content = response.content.unwrap_or_default();
    Ok(parse_reflection(&content))
}

fn parse_reflection(content: &str) -> ReflectionResult {
    let mut root_cause = RootCause::Code;
    let mut recommendation = ReflectionOutcome::Fix;
    let mut confidence = 0.5;
    let mut feedback_lines = Vec::new();

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("ROOT_CAUSE:") {
            root_cause = match rest.trim().to_lowercase().as_str() {
                "plan" => RootCause::Plan,
                "test" => RootCause::Test,
                "environment" => RootCause::Environment,
                _ => RootCause::Code,
            };
        } else if let Some(rest) = line.strip_prefix("RECOMMENDATION:") {
            recommendation = match rest.trim().to_lowercase().as_str() {
                "replan" => ReflectionOutcome::Replan,
                "abort" => ReflectionOutcome::Abort,
                _ => ReflectionOutcome::Fix,
            };
        } else if let Some(rest) = line.strip_prefix("CONFIDENCE:") {
            confidence = rest.trim().parse().unwrap_or(0.5);
        } else {
            feedback_lines.push(line);
        }
    }

    ReflectionResult {
        diagnosis: feedback_lines.join("\n").trim().to_string(),
        root_cause,
        recommendation,
        feedback: feedback_lines.join("\n").trim().to_string(),
        confidence: confidence.clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_reflection() {
        let content = "ROOT_CAUSE: test\nRECOMMENDATION: fix\nCONFIDENCE: 0.8\nThe test expects a different error message.";
        let result = parse_reflection(content);
        assert_eq!(result.root_cause, RootCause::Test);
        assert_eq!(result.recommendation, ReflectionOutcome::Fix);
        assert!((result.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let content = "ROOT_CAUSE: plan\nRECOMMENDATION: replan\nCONFIDENCE: 1.5\nReplan needed.";
        let result = parse_reflection(content);
        assert_eq!(result.confidence, 1.0);
    }
}
