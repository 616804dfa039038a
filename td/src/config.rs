//! TaskDaemon configuration types and loading.
//!
//! Configuration is a single YAML document, loaded with the same
//! local-then-user-then-default fallback chain the daemon always used,
//! plus a named-profile layer for LLM credentials so a repo can pin a
//! cheaper model for routine fixes and a stronger one for planning
//! without touching code.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::ValidatorConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: serde_yaml::Error },

    #[error("unknown LLM profile '{0}' (not found under llm.profiles)")]
    UnknownProfile(String),

    #[error("API key not found: set {api_key_env} or configure api-key-file")]
    MissingApiKey { api_key_env: String },

    #[error("failed to read api-key-file {path}: {source}")]
    ApiKeyFile { path: PathBuf, source: std::io::Error },
}

/// Top-level TaskDaemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub validation: ValidationConfig,
    pub storage: StorageConfig,
    pub webhook: WebhookConfig,
    pub repos: Vec<RepoConfig>,
}

impl Config {
    /// Load configuration with fallback chain: explicit path, then
    /// project-local `.taskdaemon.yml`, then `~/.config/taskdaemon/taskdaemon.yml`,
    /// then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(".taskdaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskdaemon").join("taskdaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Peek at just the log level, before the rest of config (and
    /// therefore logging) is set up. Never fails: a missing or
    /// unparsable config simply yields `None`, leaving the CLI flag
    /// or the INFO default to take over.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(p) => vec![p.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".taskdaemon.yml")];
                if let Some(dir) = dirs::config_dir() {
                    paths.push(dir.join("taskdaemon").join("taskdaemon.yml"));
                }
                paths
            }
        };

        for path in candidates {
            if let Ok(content) = fs::read_to_string(&path)
                && let Ok(value) = serde_yaml::from_str::<serde_yaml::Value>(&content)
            {
                let level = value.get("log-level").and_then(|v| v.as_str()).map(String::from);
                if level.is_some() {
                    return level;
                }
            }
        }
        None
    }

    pub fn find_repo(&self, repo: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|r| r.name == repo)
    }
}

/// Named LLM profiles plus a selector. Profiles let a repo keep a cheap
/// model wired up for `fix` iterations and a stronger one for `plan`/`replan`
/// without juggling separate config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Name of the active profile (key into `profiles`).
    pub default: String,
    pub profiles: HashMap<String, LlmProfile>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert("default".to_string(), LlmProfile::default());
        Self {
            default: "default".to_string(),
            profiles,
        }
    }
}

impl LlmConfig {
    /// Resolve the active profile, substituting defaults for anything
    /// the profile omits.
    pub fn resolve(&self) -> Result<ResolvedLlmConfig, ConfigError> {
        let profile = self
            .profiles
            .get(&self.default)
            .ok_or_else(|| ConfigError::UnknownProfile(self.default.clone()))?;

        Ok(ResolvedLlmConfig {
            provider: profile.provider.clone(),
            model: profile.model.clone(),
            base_url: profile.base_url.clone(),
            max_tokens: profile.max_tokens,
            timeout_ms: profile.timeout_ms,
            api_key_env: profile.api_key_env.clone(),
            api_key_file: profile.api_key_file.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmProfile {
    pub provider: String,
    pub model: String,
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,
    #[serde(rename = "api-key-file")]
    pub api_key_file: Option<PathBuf>,
    #[serde(rename = "base-url")]
    pub base_url: String,
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmProfile {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            api_key_file: None,
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 300_000,
        }
    }
}

/// A provider/model selection with credentials already looked up where
/// possible; only `get_api_key` may still fail.
#[derive(Debug, Clone)]
pub struct ResolvedLlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    api_key_env: String,
    api_key_file: Option<PathBuf>,
}

impl ResolvedLlmConfig {
    pub fn get_api_key(&self) -> Result<String, ConfigError> {
        if let Ok(value) = std::env::var(&self.api_key_env) {
            return Ok(value);
        }

        if let Some(path) = &self.api_key_file {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::ApiKeyFile {
                path: path.clone(),
                source,
            })?;
            return Ok(content.trim().to_string());
        }

        Err(ConfigError::MissingApiKey {
            api_key_env: self.api_key_env.clone(),
        })
    }
}

/// Validator defaults, applied when a task's target repo doesn't
/// override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    #[serde(rename = "type-check-command")]
    pub type_check_command: Option<String>,
    #[serde(rename = "lint-command")]
    pub lint_command: Option<String>,
    #[serde(rename = "test-command")]
    pub test_command: Option<String>,
    #[serde(rename = "build-command")]
    pub build_command: Option<String>,
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,
    #[serde(rename = "max-replans")]
    pub max_replans: u32,
    #[serde(rename = "confidence-threshold")]
    pub confidence_threshold: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            type_check_command: None,
            lint_command: None,
            test_command: None,
            build_command: None,
            timeout_ms: 300_000,
            max_iterations: 10,
            max_replans: 2,
            confidence_threshold: 0.7,
        }
    }
}

impl ValidationConfig {
    /// Build a [`ValidatorConfig`] for a specific checkout, layering the
    /// repo's overrides (if any) on top of these defaults.
    pub fn validator_config(&self, workdir: PathBuf, overrides: Option<&RepoConfig>) -> ValidatorConfig {
        ValidatorConfig {
            workdir,
            type_check_command: overrides
                .and_then(|r| r.type_check_command.clone())
                .or_else(|| self.type_check_command.clone()),
            lint_command: overrides.and_then(|r| r.lint_command.clone()).or_else(|| self.lint_command.clone()),
            test_command: overrides.and_then(|r| r.test_command.clone()).or_else(|| self.test_command.clone()),
            build_command: overrides.and_then(|r| r.build_command.clone()).or_else(|| self.build_command.clone()),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

/// On-disk storage configuration for the `taskstore`-backed collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "taskstore-dir")]
    pub taskstore_dir: String,
    #[serde(rename = "jsonl-warn-mb")]
    pub jsonl_warn_mb: u32,
    #[serde(rename = "jsonl-error-mb")]
    pub jsonl_error_mb: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            taskstore_dir: ".taskstore".to_string(),
            jsonl_warn_mb: 100,
            jsonl_error_mb: 500,
        }
    }
}

/// Webhook ingestion / retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,
    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 30_000,
        }
    }
}

/// A repository this daemon is authorized to act on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub name: String,
    #[serde(rename = "clone-url")]
    pub clone_url: String,
    #[serde(rename = "default-branch")]
    pub default_branch: String,
    #[serde(rename = "type-check-command")]
    pub type_check_command: Option<String>,
    #[serde(rename = "lint-command")]
    pub lint_command: Option<String>,
    #[serde(rename = "test-command")]
    pub test_command: Option<String>,
    #[serde(rename = "build-command")]
    pub build_command: Option<String>,
    #[serde(rename = "install-command")]
    pub install_command: Option<String>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            clone_url: String::new(),
            default_branch: "main".to_string(),
            type_check_command: None,
            lint_command: None,
            test_command: None,
            build_command: None,
            install_command: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_one_llm_profile() {
        let config = Config::default();
        assert_eq!(config.llm.default, "default");
        assert!(config.llm.profiles.contains_key("default"));
    }

    #[test]
    fn resolve_unknown_profile_errors() {
        let llm = LlmConfig {
            default: "missing".to_string(),
            profiles: HashMap::new(),
        };
        assert!(matches!(llm.resolve(), Err(ConfigError::UnknownProfile(_))));
    }

    #[test]
    fn resolve_known_profile_succeeds() {
        let config = Config::default();
        let resolved = config.llm.resolve().unwrap();
        assert_eq!(resolved.provider, "anthropic");
    }

    #[test]
    fn get_api_key_prefers_env_over_file() {
        let resolved = ResolvedLlmConfig {
            provider: "anthropic".to_string(),
            model: "m".to_string(),
            base_url: "https://example.com".to_string(),
            max_tokens: 100,
            timeout_ms: 1000,
            api_key_env: "TASKDAEMON_TEST_API_KEY_VAR".to_string(),
            api_key_file: None,
        };
        // SAFETY: test-local env var, not shared mutable state beyond this test.
        unsafe {
            std::env::set_var("TASKDAEMON_TEST_API_KEY_VAR", "secret-value");
        }
        assert_eq!(resolved.get_api_key().unwrap(), "secret-value");
        unsafe {
            std::env::remove_var("TASKDAEMON_TEST_API_KEY_VAR");
        }
    }

    #[test]
    fn deserialize_config_with_profiles() {
        let yaml = r#"
llm:
  default: strong
  profiles:
    strong:
      provider: anthropic
      model: claude-opus-4
      api-key-env: MY_API_KEY
      base-url: https://api.example.com
      max-tokens: 8192
      timeout-ms: 60000

validation:
  test-command: "make test"
  max-iterations: 5
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let resolved = config.llm.resolve().unwrap();
        assert_eq!(resolved.model, "claude-opus-4");
        assert_eq!(config.validation.max_iterations, 5);
    }
}
