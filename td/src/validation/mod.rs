//! Validator
//!
//! Runs fast deterministic checks against a candidate diff and target
//! files, fail-fast in a fixed order, and returns a structured verdict
//! with prioritized feedback for the Agentic Loop.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("check timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn check process: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Kinds of deterministic check the Validator can run, in fail-fast order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    DiffFormat,
    TypeScript,
    Lint,
    UnitTest,
    Build,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_type: CheckType,
    pub status: CheckStatus,
    pub duration_ms: u64,
    pub error_count: u32,
    pub warning_count: u32,
    /// Raw error lines, typed no further than strings at this layer.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CheckResult {
    fn skipped(check_type: CheckType) -> Self {
        Self {
            check_type,
            status: CheckStatus::Skipped,
            duration_ms: 0,
            error_count: 0,
            warning_count: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizedIssue {
    pub id: String,
    pub category: CheckType,
    pub severity: Severity,
    pub description: String,
    pub location: Option<String>,
    pub suggested_fix: Option<String>,
    pub related_issues: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Passed,
    Failed,
    NeedsReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub status: VerdictStatus,
    pub confidence: f64,
    pub checks: Vec<CheckResult>,
    pub issues: Vec<CategorizedIssue>,
    pub fix_strategy: Option<String>,
    /// Set when the failure is terminal: the Agentic Loop must not retry.
    pub terminal_reason: Option<String>,
}

/// Type-check errors above this count make the check terminal: that many
/// errors means the patch doesn't even parse as the target language, so
/// retrying with the same approach won't help.
const MAX_TYPE_ERRORS_BEFORE_TERMINAL: u32 = 50;

/// Error codes treated as critical (grammar or resolution failures):
/// seeing one of these means remaining checks are skipped.
const CRITICAL_TS_CODES: &[&str] = &["TS1005", "TS1109", "TS2307", "TS2304"];

pub struct ValidatorConfig {
    pub workdir: std::path::PathBuf,
    pub type_check_command: Option<String>,
    pub lint_command: Option<String>,
    pub test_command: Option<String>,
    pub build_command: Option<String>,
    pub timeout: Duration,
}

/// Parse a unified diff well enough to decide whether it's structurally
/// valid and non-empty. An empty or malformed diff means there's nothing
/// to apply, so the check is terminal rather than retryable.
pub fn check_diff_format(diff: &str) -> CheckResult {
    debug!(diff_len = diff.len(), "check_diff_format: called");
    let start = std::time::Instant::now();
    let trimmed = diff.trim();
    let has_hunk = trimmed.lines().any(|l| l.starts_with("@@"));
    let has_file_header = trimmed.lines().any(|l| l.starts_with("--- ") || l.starts_with("+++ "));

    if trimmed.is_empty() || !has_hunk || !has_file_header {
        return CheckResult {
            check_type: CheckType::DiffFormat,
            status: CheckStatus::Failed,
            duration_ms: start.elapsed().as_millis() as u64,
            error_count: 1,
            warning_count: 0,
            errors: vec!["Invalid diff format".to_string()],
            warnings: Vec::new(),
        };
    }

    CheckResult {
        check_type: CheckType::DiffFormat,
        status: CheckStatus::Passed,
        duration_ms: start.elapsed().as_millis() as u64,
        error_count: 0,
        warning_count: 0,
        errors: Vec::new(),
        warnings: Vec::new(),
    }
}

/// Run one shell check command (`sh -c <command>`) in `workdir`, under a
/// hard timeout, the same way the Loop Engine runs its validation command.
async fn run_check(
    check_type: CheckType,
    command: &str,
    workdir: &Path,
    budget: Duration,
) -> Result<CheckResult, ValidatorError> {
    debug!(?check_type, %command, "run_check: called");
    let start = std::time::Instant::now();

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workdir)
        .output();

    let output = match timeout(budget, child).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(?check_type, ?budget, "run_check: timed out");
            return Err(ValidatorError::Timeout(budget));
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let combined: Vec<String> = stdout.lines().chain(stderr.lines()).map(str::to_string).collect();

    if output.status.success() {
        Ok(CheckResult {
            check_type,
            status: CheckStatus::Passed,
            duration_ms: start.elapsed().as_millis() as u64,
            error_count: 0,
            warning_count: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        })
    } else {
        let error_count = combined.len() as u32;
        Ok(CheckResult {
            check_type,
            status: CheckStatus::Failed,
            duration_ms: start.elapsed().as_millis() as u64,
            error_count,
            warning_count: 0,
            errors: combined,
            warnings: Vec::new(),
        })
    }
}

fn contains_critical_ts_error(errors: &[String]) -> bool {
    errors.iter().any(|e| CRITICAL_TS_CODES.iter().any(|code| e.contains(code)))
}

fn has_related_test_files(target_files: &[String]) -> bool {
    target_files.iter().any(|f| f.contains("test") || f.contains("spec"))
}

/// Run the full fail-fast check sequence: diff_format -> typescript ->
/// lint -> unit_test -> build. Each stage after diff_format may be
/// skipped by an earlier terminal condition.
pub async fn validate(diff: &str, target_files: &[String], config: &ValidatorConfig) -> ValidationVerdict {
    debug!(num_target_files = target_files.len(), "validate: called");
    let mut checks = Vec::new();

    let diff_check = check_diff_format(diff);
    let diff_failed = matches!(diff_check.status, CheckStatus::Failed);
    checks.push(diff_check);
    if diff_failed {
        return finalize(checks, Some("Invalid diff format".to_string()));
    }

    let ts_result = match &config.type_check_command {
        Some(cmd) => run_check(CheckType::TypeScript, cmd, &config.workdir, config.timeout).await,
        None => Ok(CheckResult::skipped(CheckType::TypeScript)),
    };
    let ts_check = match ts_result {
        Ok(c) => c,
        Err(e) => error_check(CheckType::TypeScript, &e),
    };
    let critical_ts = matches!(ts_check.status, CheckStatus::Failed) && contains_critical_ts_error(&ts_check.errors);
    let too_many_ts_errors =
        matches!(ts_check.status, CheckStatus::Failed) && ts_check.error_count > MAX_TYPE_ERRORS_BEFORE_TERMINAL;
    checks.push(ts_check);

    if too_many_ts_errors {
        return finalize(checks, Some("too_many_type_errors".to_string()));
    }
    if critical_ts {
        return finalize(checks, None);
    }

    let lint_result = match &config.lint_command {
        Some(cmd) => run_check(CheckType::Lint, cmd, &config.workdir, config.timeout).await,
        None => Ok(CheckResult::skipped(CheckType::Lint)),
    };
    checks.push(lint_result.unwrap_or_else(|e| error_check(CheckType::Lint, &e)));

    if has_related_test_files(target_files) {
        let test_result = match &config.test_command {
            Some(cmd) => run_check(CheckType::UnitTest, cmd, &config.workdir, config.timeout).await,
            None => Ok(CheckResult::skipped(CheckType::UnitTest)),
        };
        checks.push(test_result.unwrap_or_else(|e| error_check(CheckType::UnitTest, &e)));
    } else {
        checks.push(CheckResult::skipped(CheckType::UnitTest));
    }

    let build_result = match &config.build_command {
        Some(cmd) => run_check(CheckType::Build, cmd, &config.workdir, config.timeout).await,
        None => Ok(CheckResult::skipped(CheckType::Build)),
    };
    checks.push(build_result.unwrap_or_else(|e| error_check(CheckType::Build, &e)));

    finalize(checks, None)
}

fn error_check(check_type: CheckType, err: &ValidatorError) -> CheckResult {
    CheckResult {
        check_type,
        status: CheckStatus::Error,
        duration_ms: 0,
        error_count: 1,
        warning_count: 0,
        errors: vec![err.to_string()],
        warnings: Vec::new(),
    }
}

fn finalize(checks: Vec<CheckResult>, terminal_reason: Option<String>) -> ValidationVerdict {
    let passed = checks.iter().filter(|c| matches!(c.status, CheckStatus::Passed)).count() as f64;
    let failed = checks
        .iter()
        .filter(|c| matches!(c.status, CheckStatus::Failed | CheckStatus::Error))
        .count() as f64;
    let confidence = if passed + failed > 0.0 { passed / (passed + failed) } else { 1.0 };

    let issues = categorize_issues(&checks);
    let fix_strategy = build_fix_strategy(&issues);

    let status = if terminal_reason.is_some() {
        VerdictStatus::Failed
    } else if failed == 0.0 {
        VerdictStatus::Passed
    } else if issues.iter().any(|i| i.severity == Severity::Critical) {
        VerdictStatus::Failed
    } else {
        VerdictStatus::NeedsReview
    };

    ValidationVerdict {
        status,
        confidence,
        checks,
        issues,
        fix_strategy,
        terminal_reason,
    }
}

fn suggest_fix(error: &str) -> Option<String> {
    if error.contains("Cannot find name") {
        let name = error.split('\'').nth(1)?;
        return Some(format!("Add an import for `{}`", name));
    }
    if error.contains("Cannot find module") {
        return Some("Check the import path and install the missing dependency".to_string());
    }
    None
}

/// Sort issues critical -> error -> warning so the most blocking issue
/// surfaces first in any truncated display.
fn categorize_issues(checks: &[CheckResult]) -> Vec<CategorizedIssue> {
    let mut issues = Vec::new();
    for check in checks {
        if !matches!(check.status, CheckStatus::Failed | CheckStatus::Error) {
            continue;
        }
        for (idx, error) in check.errors.iter().enumerate() {
            let severity = if contains_critical_ts_error(std::slice::from_ref(error)) {
                Severity::Critical
            } else {
                Severity::Error
            };
            issues.push(CategorizedIssue {
                id: format!("{:?}-{}", check.check_type, idx),
                category: check.check_type,
                severity,
                description: error.clone(),
                location: None,
                suggested_fix: suggest_fix(error),
                related_issues: Vec::new(),
            });
        }
    }
    issues.sort_by(|a, b| b.severity.cmp(&a.severity));
    issues
}

fn build_fix_strategy(issues: &[CategorizedIssue]) -> Option<String> {
    if issues.is_empty() {
        return None;
    }
    let mut steps = Vec::new();
    for (i, issue) in issues.iter().enumerate() {
        let step = match &issue.suggested_fix {
            Some(fix) => format!("{}. {}", i + 1, fix),
            None => format!("{}. Address: {}", i + 1, issue.description),
        };
        steps.push(step);
    }
    Some(steps.join("\n"))
}

#[cfg(test)]
mod validator_tests {
    use super::*;

    #[test]
    fn empty_diff_fails_format_check() {
        let check = check_diff_format("");
        assert_eq!(check.status, CheckStatus::Failed);
    }

    #[test]
    fn well_formed_diff_passes_format_check() {
        let diff = "--- a/f.rs\n+++ b/f.rs\n@@ -1 +1 @@\n-old\n+new\n";
        let check = check_diff_format(diff);
        assert_eq!(check.status, CheckStatus::Passed);
    }

    #[test]
    fn issues_sort_critical_before_warning() {
        let checks = vec![CheckResult {
            check_type: CheckType::TypeScript,
            status: CheckStatus::Failed,
            duration_ms: 0,
            error_count: 1,
            warning_count: 0,
            errors: vec!["Cannot find name 'X'".to_string()],
            warnings: Vec::new(),
        }];
        let issues = categorize_issues(&checks);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[0].suggested_fix.as_deref(), Some("Add an import for `X`"));
    }

    #[tokio::test]
    async fn validate_empty_diff_is_terminal() {
        let config = ValidatorConfig {
            workdir: std::env::temp_dir(),
            type_check_command: None,
            lint_command: None,
            test_command: None,
            build_command: None,
            timeout: Duration::from_secs(5),
        };
        let verdict = validate("", &[], &config).await;
        assert_eq!(verdict.status, VerdictStatus::Failed);
        assert_eq!(verdict.terminal_reason.as_deref(), Some("Invalid diff format"));
    }

    #[tokio::test]
    async fn validate_passes_with_no_configured_commands() {
        let diff = "--- a/f.rs\n+++ b/f.rs\n@@ -1 +1 @@\n-old\n+new\n";
        let config = ValidatorConfig {
            workdir: std::env::temp_dir(),
            type_check_command: None,
            lint_command: None,
            test_command: None,
            build_command: None,
            timeout: Duration::from_secs(5),
        };
        let verdict = validate(diff, &[], &config).await;
        assert_eq!(verdict.status, VerdictStatus::Passed);
        assert_eq!(verdict.confidence, 1.0);
    }
}
