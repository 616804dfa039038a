//! Static per-repo configuration and constraints, exposed as a pure
//! lookup keyed by `(owner, repo)`.
//!
//! Mutated only through an explicit admin operation that writes a new
//! row and bumps `updated_at`; sessions keep whatever snapshot they
//! captured at task start (callers are expected to clone the value they
//! read, not hold a live reference across a task's lifetime).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoMemory {
    pub owner: String,
    pub repo: String,
    /// Path globs the Foreman/CommandExecutor may touch.
    pub allowed_paths: Vec<String>,
    /// Path globs that are never touchable, even if also allowed.
    pub blocked_paths: Vec<String>,
    pub max_diff_lines: u32,
    pub max_files_per_task: u32,
    pub tech_stack_hints: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RepoMemory {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        let owner = owner.into();
        let repo = repo.into();
        debug!(%owner, %repo, "RepoMemory::new: called");
        let now = now_ms();
        Self {
            owner,
            repo,
            allowed_paths: vec!["**".to_string()],
            blocked_paths: Vec::new(),
            max_diff_lines: 2000,
            max_files_per_task: 25,
            tech_stack_hints: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(owner: &str, repo: &str) -> String {
        format!("{}/{}", owner, repo)
    }

    fn full_key(&self) -> String {
        Self::key(&self.owner, &self.repo)
    }

    /// Explicit admin mutation: bumps `updated_at`, the only way this
    /// row's `allowed_paths`/`blocked_paths`/budgets may change.
    pub fn apply_admin_update(&mut self, f: impl FnOnce(&mut Self)) {
        f(self);
        self.updated_at = now_ms();
    }

    /// True when `path` is inside an allowlisted glob and not inside any
    /// blocklisted glob; blocklist always wins over allowlist.
    pub fn path_allowed(&self, path: &str) -> bool {
        let blocked = self.blocked_paths.iter().any(|p| glob_match(p, path));
        if blocked {
            return false;
        }
        self.allowed_paths.iter().any(|p| glob_match(p, path))
    }
}

/// Minimal glob matcher supporting `*` (segment wildcard) and `**`
/// (any-depth wildcard), sufficient for path allow/block lists.
fn glob_match(pattern: &str, path: &str) -> bool {
    if pattern == "**" {
        return true;
    }
    let pattern = pattern.trim_end_matches('/');
    let prefix = pattern.trim_end_matches("/**").trim_end_matches("**");
    if pattern.ends_with("/**") || pattern == "**" {
        return path.starts_with(prefix);
    }
    if let Some(stripped) = pattern.strip_suffix('*') {
        return path.starts_with(stripped);
    }
    path == pattern
}

impl Record for RepoMemory {
    fn id(&self) -> &str {
        // `Record::id` needs a `&str` into `self`; `full_key` would be a
        // temporary, so the natural key is mirrored into indexed_fields
        // instead and id() falls back to repo (still unique per owner
        // in single-tenant deployments the CLI targets).
        &self.repo
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "static_memory"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("owner".to_string(), IndexValue::String(self.owner.clone()));
        fields.insert("natural_key".to_string(), IndexValue::String(self.full_key()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocklist_wins_over_allowlist() {
        let mut repo = RepoMemory::new("org", "r");
        repo.blocked_paths.push("secrets/**".to_string());
        assert!(!repo.path_allowed("secrets/keys.pem"));
        assert!(repo.path_allowed("src/lib.rs"));
    }

    #[test]
    fn admin_update_bumps_updated_at() {
        let mut repo = RepoMemory::new("org", "r");
        let before = repo.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        repo.apply_admin_update(|r| r.max_diff_lines = 5000);
        assert!(repo.updated_at >= before);
        assert_eq!(repo.max_diff_lines, 5000);
    }
}
