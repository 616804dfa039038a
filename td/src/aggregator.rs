//! Aggregator: merges sub-task diffs into one combined diff for an
//! orchestrated parent, last-write-wins in ascending sub-task id order.
//!
//! Never rewrites history: the per-sub-task diffs stay in the ledger
//! exactly as attempted; this only produces the derived artifact that
//! proceeds to Foreman/PR.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::patch::{FileChange, split_into_file_changes};

/// One sub-task's contribution: its id (used for ordering and
/// attribution) and its raw diff.
#[derive(Debug, Clone)]
pub struct SubtaskDiff {
    pub subtask_id: String,
    pub diff: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributedFileChange {
    pub path: String,
    pub source_subtask_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationResult {
    pub combined_diff: String,
    pub file_changes: Vec<AttributedFileChange>,
    /// Paths touched by more than one sub-task, each mapped to the ids
    /// that touched it.
    pub conflicts: BTreeMap<String, Vec<String>>,
    pub pr_body: String,
}

/// Aggregate `diffs` (already sorted or not — this sorts by
/// `subtask_id` itself) into one combined diff, last-write-wins on
/// conflicting paths.
pub fn aggregate(diffs: &[SubtaskDiff]) -> AggregationResult {
    debug!(count = diffs.len(), "aggregate: called");
    let mut ordered: Vec<&SubtaskDiff> = diffs.iter().collect();
    ordered.sort_by(|a, b| a.subtask_id.cmp(&b.subtask_id));

    // path -> (subtask_id, hunks) for every sub-task that touched it, in order.
    let mut touches: BTreeMap<String, Vec<(String, Vec<FileChange>)>> = BTreeMap::new();
    for sub in &ordered {
        let changes = split_into_file_changes(&sub.diff);
        let mut by_path: BTreeMap<String, Vec<FileChange>> = BTreeMap::new();
        for change in changes {
            by_path.entry(change.path.clone()).or_default().push(change);
        }
        for (path, changes) in by_path {
            touches.entry(path).or_default().push((sub.subtask_id.clone(), changes));
        }
    }

    let mut conflicts = BTreeMap::new();
    let mut file_changes = Vec::new();
    let mut combined = String::new();

    for (path, contributors) in &touches {
        if contributors.len() > 1 {
            conflicts.insert(path.clone(), contributors.iter().map(|(id, _)| id.clone()).collect());
        }
        // Last-write-wins: the contributor with the greatest subtask_id
        // (ordered list is ascending, so the last entry wins).
        let (winner_id, winner_changes) = contributors.last().expect("at least one contributor per path");
        file_changes.push(AttributedFileChange {
            path: path.clone(),
            source_subtask_id: winner_id.clone(),
        });
        combined.push_str(&format!("--- a/{}\n+++ b/{}\n", path, path));
        for change in winner_changes {
            for hunk in &change.hunks {
                combined.push_str(hunk);
            }
        }
    }

    let pr_body = build_pr_body(&ordered, &conflicts, &file_changes);

    AggregationResult {
        combined_diff: combined,
        file_changes,
        conflicts,
        pr_body,
    }
}

fn build_pr_body(
    subtasks: &[&SubtaskDiff],
    conflicts: &BTreeMap<String, Vec<String>>,
    file_changes: &[AttributedFileChange],
) -> String {
    let mut body = String::from("## Sub-tasks\n");
    for sub in subtasks {
        body.push_str(&format!("- {}\n", sub.subtask_id));
    }
    if !conflicts.is_empty() {
        body.push_str("\n## Conflicts\n");
        for (path, ids) in conflicts {
            body.push_str(&format!("- `{}` touched by: {}\n", path, ids.join(", ")));
        }
    }
    body.push_str("\n## Modified files\n");
    for change in file_changes {
        body.push_str(&format!("- `{}` (from {})\n", change.path, change.source_subtask_id));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff_for(path: &str, line: &str) -> String {
        format!("--- a/{p}\n+++ b/{p}\n@@ -1 +1 @@\n-old\n+{l}\n", p = path, l = line)
    }

    #[test]
    fn no_conflict_when_paths_disjoint() {
        let diffs = vec![
            SubtaskDiff {
                subtask_id: "sub-1".to_string(),
                diff: diff_for("a.rs", "from-1"),
            },
            SubtaskDiff {
                subtask_id: "sub-2".to_string(),
                diff: diff_for("b.rs", "from-2"),
            },
        ];
        let result = aggregate(&diffs);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.file_changes.len(), 2);
    }

    #[test]
    fn conflicting_path_resolved_last_write_wins_by_id() {
        let diffs = vec![
            SubtaskDiff {
                subtask_id: "sub-2".to_string(),
                diff: diff_for("a.rs", "from-2"),
            },
            SubtaskDiff {
                subtask_id: "sub-1".to_string(),
                diff: diff_for("a.rs", "from-1"),
            },
        ];
        let result = aggregate(&diffs);
        assert_eq!(result.conflicts.get("a.rs").unwrap(), &vec!["sub-1".to_string(), "sub-2".to_string()]);
        let winner = result.file_changes.iter().find(|c| c.path == "a.rs").unwrap();
        assert_eq!(winner.source_subtask_id, "sub-2");
        assert!(result.combined_diff.contains("from-2"));
    }

    #[test]
    fn original_diffs_are_not_mutated() {
        let diffs = vec![SubtaskDiff {
            subtask_id: "sub-1".to_string(),
            diff: diff_for("a.rs", "x"),
        }];
        let original = diffs[0].diff.clone();
        let _ = aggregate(&diffs);
        assert_eq!(diffs[0].diff, original);
    }
}
