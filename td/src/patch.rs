//! Patch utilities: detect and normalize diff dialects into a single
//! unified-diff shape the Validator and Foreman can apply uniformly.
//!
//! LLM output is inconsistent about diff framing — sometimes a clean
//! unified diff, sometimes missing the `a/`/`b/` prefixes, sometimes a
//! raw "replace this block" description with no `---`/`+++` headers at
//! all. Normalization is best-effort: a dialect it can't recognize is
//! passed through unchanged and the downstream `diff_format` check is
//! trusted to reject it.

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffDialect {
    /// Has `---`/`+++` file headers and `@@` hunks.
    Unified,
    /// Has `@@` hunks but no file headers.
    HunksOnly,
    /// No recognizable diff structure.
    Unknown,
}

pub fn detect_dialect(text: &str) -> DiffDialect {
    let trimmed = text.trim();
    let has_hunk = trimmed.lines().any(|l| l.starts_with("@@"));
    let has_headers = trimmed.lines().any(|l| l.starts_with("--- ") || l.starts_with("+++ "));
    match (has_headers, has_hunk) {
        (true, true) => DiffDialect::Unified,
        (false, true) => DiffDialect::HunksOnly,
        _ => DiffDialect::Unknown,
    }
}

/// Normalize `text` into unified-diff form where possible. A
/// `HunksOnly` dialect gets synthetic `a/file`/`b/file` headers derived
/// from the first `diff --git` line if present; anything else is
/// returned unchanged.
pub fn normalize_to_unified_diff(text: &str) -> String {
    let dialect = detect_dialect(text);
    debug!(?dialect, len = text.len(), "normalize_to_unified_diff: called");
    match dialect {
        DiffDialect::Unified => text.trim().to_string(),
        DiffDialect::HunksOnly => synthesize_headers(text),
        DiffDialect::Unknown => text.trim().to_string(),
    }
}

fn synthesize_headers(text: &str) -> String {
    let path = text
        .lines()
        .find_map(|l| l.strip_prefix("diff --git a/"))
        .and_then(|rest| rest.split(' ').next())
        .unwrap_or("unknown_file");

    let mut out = format!("--- a/{}\n+++ b/{}\n", path, path);
    out.push_str(text.trim());
    out
}

/// A single file-level change extracted from a unified diff: which path
/// and which hunks touch it. Used by the Aggregator to detect conflicts
/// between sub-task diffs without a full patch-application pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub hunks: Vec<String>,
}

/// Split a unified diff into per-file change blocks.
pub fn split_into_file_changes(diff: &str) -> Vec<FileChange> {
    let mut changes = Vec::new();
    let mut current_path: Option<String> = None;
    let mut current_hunks: Vec<String> = Vec::new();
    let mut current_hunk = String::new();

    let flush_hunk = |hunk: &mut String, hunks: &mut Vec<String>| {
        if !hunk.trim().is_empty() {
            hunks.push(std::mem::take(hunk));
        }
    };

    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("+++ ") {
            flush_hunk(&mut current_hunk, &mut current_hunks);
            if let Some(path) = current_path.take() {
                changes.push(FileChange {
                    path,
                    hunks: std::mem::take(&mut current_hunks),
                });
            }
            let path = rest.strip_prefix("b/").unwrap_or(rest).to_string();
            current_path = Some(path);
        } else if line.starts_with("@@") {
            flush_hunk(&mut current_hunk, &mut current_hunks);
            current_hunk.push_str(line);
            current_hunk.push('\n');
        } else if line.starts_with("--- ") {
            continue;
        } else {
            current_hunk.push_str(line);
            current_hunk.push('\n');
        }
    }
    flush_hunk(&mut current_hunk, &mut current_hunks);
    if let Some(path) = current_path {
        changes.push(FileChange {
            path,
            hunks: current_hunks,
        });
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_unified_dialect() {
        let diff = "--- a/x.rs\n+++ b/x.rs\n@@ -1 +1 @@\n-old\n+new\n";
        assert_eq!(detect_dialect(diff), DiffDialect::Unified);
    }

    #[test]
    fn synthesizes_headers_for_hunks_only() {
        let diff = "diff --git a/src/lib.rs b/src/lib.rs\n@@ -1 +1 @@\n-old\n+new\n";
        let normalized = normalize_to_unified_diff(diff);
        assert!(normalized.starts_with("--- a/src/lib.rs"));
        assert!(normalized.contains("+++ b/src/lib.rs"));
    }

    #[test]
    fn normalize_is_identity_on_format_tag_for_unified_diffs() {
        // §8: detectPatchFormat ∘ normalizePatch is the identity on the
        // format tag for an already-unified diff.
        let diff = "--- a/x.rs\n+++ b/x.rs\n@@ -1 +1 @@\n-old\n+new\n";
        assert_eq!(detect_dialect(&normalize_to_unified_diff(diff)), DiffDialect::Unified);
    }

    #[test]
    fn splits_multi_file_diff() {
        let diff = "--- a/a.rs\n+++ b/a.rs\n@@ -1 +1 @@\n-1\n+2\n--- a/b.rs\n+++ b/b.rs\n@@ -1 +1 @@\n-3\n+4\n";
        let changes = split_into_file_changes(diff);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].path, "a.rs");
        assert_eq!(changes[1].path, "b.rs");
    }
}
