//! Command Executor: allowlisted shell actions behind a denylist.
//!
//! No command reaches a shell. Every resolved command string is matched
//! against a denylist of dangerous patterns before a subprocess is ever
//! spawned, and the subprocess itself is launched with `tokio::process`
//! directly — no `sh -c`, so shell metacharacters in package/path
//! arguments can't do anything even if they slipped past validation.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Cap applied to every captured stdout/stderr field so an execution log
/// entry can't grow unbounded.
pub const MAX_LOG_FIELD_BYTES: usize = 10 * 1024;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Blocked: Matches blocked pattern ({pattern})")]
    Denylisted { pattern: String },
    #[error("custom command not acknowledged: allowCustomCommands must be set and the command must carry an explicit acknowledgment")]
    CustomNotAcknowledged,
    #[error("invalid argument `{0}`: contains characters outside the allowed set")]
    InvalidArgument(String),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn subprocess: {0}")]
    Spawn(#[source] std::io::Error),
}

/// The fixed set of actions the executor knows how to resolve into an
/// argv. `Custom` is the only variant that requires explicit
/// acknowledgment to run at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedCommand {
    InstallDeps,
    Migrate,
    Generate,
    CreateDirectory { path: String },
    TypeCheck,
    LintFix,
    Format,
    Custom { program: String, args: Vec<String>, acknowledged: bool },
}

/// Regex patterns that categorically block a resolved command string,
/// regardless of which [`AllowedCommand`] produced it.
fn denylist_patterns() -> Vec<(&'static str, regex::Regex)> {
    let raw: &[(&str, &str)] = &[
        ("privilege escalation", r"\b(sudo|su|doas)\b"),
        ("remote pipe into shell", r"(curl|wget)[^\n]*\|\s*(sh|bash|zsh)"),
        ("recursive delete", r"\brm\s+(-[a-zA-Z]*r[a-zA-Z]*f[a-zA-Z]*|-[a-zA-Z]*f[a-zA-Z]*r[a-zA-Z]*)\b"),
        ("credential path", r"(\.ssh/|\.aws/credentials|\.netrc|/etc/shadow|/etc/passwd)"),
        ("process kill", r"\b(kill|pkill|killall)\b"),
        ("network listener", r"\b(nc|netcat|ncat)\b.*\-l\b"),
    ];
    raw.iter()
        .map(|(name, pattern)| (*name, regex::Regex::new(pattern).expect("static denylist pattern must compile")))
        .collect()
}

/// Characters permitted in package names / paths passed as arguments.
/// Deliberately excludes shell metacharacters even though no shell is
/// invoked, to keep the allowlist independently defensible.
fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '@' | ':' | '+')
}

fn validate_args(args: &[String]) -> Result<(), CommandError> {
    for arg in args {
        if !arg.chars().all(is_allowed_char) {
            return Err(CommandError::InvalidArgument(arg.clone()));
        }
    }
    Ok(())
}

fn resolve_argv(command: &AllowedCommand, package_manager: &str) -> Result<(String, Vec<String>), CommandError> {
    Ok(match command {
        AllowedCommand::InstallDeps => (package_manager.to_string(), vec!["install".to_string()]),
        AllowedCommand::Migrate => (package_manager.to_string(), vec!["run".to_string(), "migrate".to_string()]),
        AllowedCommand::Generate => (package_manager.to_string(), vec!["run".to_string(), "generate".to_string()]),
        AllowedCommand::CreateDirectory { path } => {
            validate_args(std::slice::from_ref(path))?;
            ("mkdir".to_string(), vec!["-p".to_string(), path.clone()])
        }
        AllowedCommand::TypeCheck => (package_manager.to_string(), vec!["run".to_string(), "typecheck".to_string()]),
        AllowedCommand::LintFix => (package_manager.to_string(), vec!["run".to_string(), "lint:fix".to_string()]),
        AllowedCommand::Format => (package_manager.to_string(), vec!["run".to_string(), "format".to_string()]),
        AllowedCommand::Custom {
            program,
            args,
            acknowledged,
        } => {
            if !*acknowledged {
                return Err(CommandError::CustomNotAcknowledged);
            }
            validate_args(args)?;
            (program.clone(), args.clone())
        }
    })
}

#[derive(Debug, Clone)]
pub struct ExecutionLogEntry {
    pub command_line: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub dry_run: bool,
    /// Set when the entry records a denylisted attempt that never
    /// reached a subprocess spawn.
    pub blocked: bool,
}

pub struct CommandExecutor {
    pub allow_custom_commands: bool,
    pub dry_run: bool,
    pub package_manager: String,
    pub workdir: std::path::PathBuf,
    pub timeout: Duration,
    denylist: Vec<(&'static str, regex::Regex)>,
    /// Audit trail of every attempt, including blocked ones. Bounded by
    /// each entry's own `stdout`/`stderr` truncation, not by entry count.
    log: std::sync::Mutex<Vec<ExecutionLogEntry>>,
}

impl CommandExecutor {
    pub fn new(workdir: impl Into<std::path::PathBuf>, package_manager: impl Into<String>) -> Self {
        Self {
            allow_custom_commands: false,
            dry_run: false,
            package_manager: package_manager.into(),
            workdir: workdir.into(),
            timeout: Duration::from_secs(300),
            denylist: denylist_patterns(),
            log: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of every attempt recorded so far, oldest first.
    pub fn execution_log(&self) -> Vec<ExecutionLogEntry> {
        self.log.lock().expect("execution log lock poisoned").clone()
    }

    fn record(&self, entry: ExecutionLogEntry) -> ExecutionLogEntry {
        self.log.lock().expect("execution log lock poisoned").push(entry.clone());
        entry
    }

    fn check_denylist(&self, command_line: &str) -> Result<(), CommandError> {
        for (name, pattern) in &self.denylist {
            if pattern.is_match(command_line) {
                warn!(pattern = name, command_line, "CommandExecutor: denylist match");
                return Err(CommandError::Denylisted {
                    pattern: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Execute `command`. In dry-run mode, returns a marker result
    /// without spawning anything.
    pub async fn execute(&self, command: AllowedCommand) -> Result<ExecutionLogEntry, CommandError> {
        if let AllowedCommand::Custom { acknowledged, .. } = &command {
            if !self.allow_custom_commands && !acknowledged {
                return Err(CommandError::CustomNotAcknowledged);
            }
        }
        let (program, args) = resolve_argv(&command, &self.package_manager)?;
        let command_line = format!("{} {}", program, args.join(" "));
        if let Err(err) = self.check_denylist(&command_line) {
            self.record(ExecutionLogEntry {
                command_line,
                exit_code: None,
                stdout: String::new(),
                stderr: err.to_string(),
                dry_run: self.dry_run,
                blocked: true,
            });
            return Err(err);
        }

        debug!(command_line, dry_run = self.dry_run, "CommandExecutor::execute: called");
        if self.dry_run {
            return Ok(self.record(ExecutionLogEntry {
                command_line,
                exit_code: None,
                stdout: "[dry-run: not executed]".to_string(),
                stderr: String::new(),
                dry_run: true,
                blocked: false,
            }));
        }

        let mut cmd = TokioCommand::new(&program);
        cmd.args(&args).current_dir(&self.workdir).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| CommandError::Timeout(self.timeout))?
            .map_err(CommandError::Spawn)?;

        Ok(self.record(ExecutionLogEntry {
            command_line,
            exit_code: output.status.code(),
            stdout: truncate(&String::from_utf8_lossy(&output.stdout)),
            stderr: truncate(&String::from_utf8_lossy(&output.stderr)),
            dry_run: false,
            blocked: false,
        }))
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_LOG_FIELD_BYTES {
        return s.to_string();
    }
    // Back off to the nearest char boundary so a multi-byte UTF-8
    // sequence straddling the cut point doesn't panic the slice.
    let mut end = MAX_LOG_FIELD_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denylist_blocks_privilege_escalation() {
        let executor = CommandExecutor::new(".", "npm");
        let result = executor
            .execute(AllowedCommand::Custom {
                program: "sudo".to_string(),
                args: vec!["rm".to_string()],
                acknowledged: true,
            })
            .await;
        assert!(matches!(result, Err(CommandError::Denylisted { .. })));
    }

    #[tokio::test]
    async fn blocked_command_records_one_execution_log_entry() {
        let executor = CommandExecutor::new(".", "npm");
        let result = executor
            .execute(AllowedCommand::Custom {
                program: "rm".to_string(),
                args: vec!["-rf".to_string(), "/".to_string()],
                acknowledged: true,
            })
            .await;
        assert!(matches!(result, Err(CommandError::Denylisted { .. })));

        let log = executor.execution_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].blocked);
        assert!(log[0].stderr.contains("recursive delete"));
    }

    #[tokio::test]
    async fn unacknowledged_custom_command_is_rejected() {
        let executor = CommandExecutor::new(".", "npm");
        let result = executor
            .execute(AllowedCommand::Custom {
                program: "echo".to_string(),
                args: vec!["hi".to_string()],
                acknowledged: false,
            })
            .await;
        assert!(matches!(result, Err(CommandError::CustomNotAcknowledged)));
    }

    #[tokio::test]
    async fn dry_run_short_circuits() {
        let mut executor = CommandExecutor::new(".", "npm");
        executor.dry_run = true;
        let result = executor.execute(AllowedCommand::InstallDeps).await.unwrap();
        assert!(result.dry_run);
        assert!(result.exit_code.is_none());
    }

    #[test]
    fn invalid_argument_characters_rejected() {
        let result = resolve_argv(
            &AllowedCommand::CreateDirectory {
                path: "foo; rm -rf /".to_string(),
            },
            "npm",
        );
        assert!(matches!(result, Err(CommandError::InvalidArgument(_))));
    }
}
