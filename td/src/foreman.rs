//! Foreman: applies a candidate diff to a scratch clone of the target
//! repo and runs install/type-check/test before anything reaches a PR.
//!
//! On success the scratch directory is removed; on failure it's kept so
//! the workDir can be inspected for forensic capture.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::command_executor::{AllowedCommand, CommandError, CommandExecutor};

#[derive(Debug, Error)]
pub enum ForemanError {
    #[error("git clone failed: {0}")]
    Clone(String),
    #[error("diff did not apply cleanly: {0}")]
    DiffApply(String),
    #[error("command executor error: {0}")]
    Command(#[from] CommandError),
    #[error("phase timed out after {0:?}")]
    Timeout(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Package manager / build system detected by probing for marker files,
/// falling back to npm when nothing matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
    Cargo,
}

impl PackageManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Yarn => "yarn",
            Self::Pnpm => "pnpm",
            Self::Cargo => "cargo",
        }
    }
}

/// Probe `dir` for marker files to decide the package manager. Order
/// matters: lockfiles are more specific than manifests.
pub fn detect_package_manager(dir: &Path) -> PackageManager {
    if dir.join("Cargo.toml").is_file() {
        return PackageManager::Cargo;
    }
    if dir.join("pnpm-lock.yaml").is_file() {
        return PackageManager::Pnpm;
    }
    if dir.join("yarn.lock").is_file() {
        return PackageManager::Yarn;
    }
    PackageManager::Npm
}

#[derive(Debug, Clone)]
pub struct ForemanResult {
    pub success: bool,
    /// Present only on failure, for forensic inspection.
    pub work_dir: Option<PathBuf>,
    pub type_check_output: String,
    pub test_output: String,
}

pub struct ForemanConfig {
    pub clone_timeout: Duration,
    pub install_timeout: Duration,
    pub check_timeout: Duration,
    pub test_timeout: Duration,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            clone_timeout: Duration::from_secs(120),
            install_timeout: Duration::from_secs(300),
            check_timeout: Duration::from_secs(180),
            test_timeout: Duration::from_secs(300),
        }
    }
}

pub struct Foreman {
    pub config: ForemanConfig,
}

impl Foreman {
    pub fn new(config: ForemanConfig) -> Self {
        Self { config }
    }

    /// Clone `repo_url` at `branch` into a fresh scratch directory under
    /// `scratch_root`, apply `diff`, install, type-check, then test.
    pub async fn run(
        &self,
        repo_url: &str,
        branch: &str,
        diff: &str,
        scratch_root: &Path,
    ) -> Result<ForemanResult, ForemanError> {
        debug!(repo_url, branch, "Foreman::run: called");
        let work_dir = scratch_root.join(format!("foreman-{}", uuid::Uuid::now_v7()));
        tokio::fs::create_dir_all(&work_dir).await?;

        self.clone_repo(repo_url, branch, &work_dir).await?;
        self.apply_diff(diff, &work_dir).await?;

        let package_manager = detect_package_manager(&work_dir);
        let executor = CommandExecutor::new(&work_dir, package_manager.as_str());

        let install = executor.execute(AllowedCommand::InstallDeps).await?;
        if install.exit_code.is_some_and(|c| c != 0) {
            warn!(code = ?install.exit_code, "Foreman::run: install failed");
            return Ok(ForemanResult {
                success: false,
                work_dir: Some(work_dir),
                type_check_output: String::new(),
                test_output: install.stderr,
            });
        }

        let type_check = executor.execute(AllowedCommand::TypeCheck).await?;
        if type_check.exit_code.is_some_and(|c| c != 0) {
            return Ok(ForemanResult {
                success: false,
                work_dir: Some(work_dir),
                type_check_output: type_check.stdout + &type_check.stderr,
                test_output: String::new(),
            });
        }

        let test_output = self.run_tests(&work_dir, package_manager).await?;
        let success = test_output.1;
        let result = ForemanResult {
            success,
            work_dir: if success { None } else { Some(work_dir.clone()) },
            type_check_output: type_check.stdout,
            test_output: test_output.0,
        };

        if success {
            let _ = tokio::fs::remove_dir_all(&work_dir).await;
        }
        Ok(result)
    }

    async fn clone_repo(&self, repo_url: &str, branch: &str, work_dir: &Path) -> Result<(), ForemanError> {
        let mut cmd = TokioCommand::new("git");
        cmd.args(["clone", "--branch", branch, "--depth", "1", repo_url]).arg(work_dir);
        let output = timeout(self.config.clone_timeout, cmd.output())
            .await
            .map_err(|_| ForemanError::Timeout(self.config.clone_timeout))??;
        if !output.status.success() {
            return Err(ForemanError::Clone(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        Ok(())
    }

    async fn apply_diff(&self, diff: &str, work_dir: &Path) -> Result<(), ForemanError> {
        let mut cmd = TokioCommand::new("git");
        cmd.args(["apply", "--whitespace=fix", "-"]).current_dir(work_dir);
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        let mut child = cmd.spawn()?;
        {
            use tokio::io::AsyncWriteExt;
            let stdin = child.stdin.as_mut().expect("stdin was piped");
            stdin.write_all(diff.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ForemanError::DiffApply(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        Ok(())
    }

    async fn run_tests(&self, work_dir: &Path, package_manager: PackageManager) -> Result<(String, bool), ForemanError> {
        // Test execution has no fixed `AllowedCommand` variant (§4.6
        // lists install-deps/migrate/generate/create-directory/
        // type-check/lint-fix/format/custom) and isn't user-influenced
        // input, so it runs directly under Foreman's own timeout rather
        // than through the Command Executor's denylist.
        let mut cmd = TokioCommand::new(package_manager.as_str());
        cmd.args(["test"]).current_dir(work_dir);
        let output = timeout(self.config.test_timeout, cmd.output())
            .await
            .map_err(|_| ForemanError::Timeout(self.config.test_timeout))??;
        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok((combined, output.status.success()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detects_cargo_over_npm() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect_package_manager(dir.path()), PackageManager::Cargo);
    }

    #[test]
    fn falls_back_to_npm_with_no_markers() {
        let dir = tempdir().unwrap();
        assert_eq!(detect_package_manager(dir.path()), PackageManager::Npm);
    }
}
