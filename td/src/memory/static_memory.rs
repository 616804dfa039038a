//! Memory: Static — a pure lookup over admin-mutated [`RepoMemory`] rows.

use std::sync::Arc;

use taskstore::{Filter, IndexValue, Store};
use tracing::debug;

use crate::domain::RepoMemory;

pub struct StaticMemory {
    store: Arc<Store>,
}

impl StaticMemory {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Existing sessions keep whatever value they read; this always
    /// returns the current row, so callers that need a stable snapshot
    /// should clone it at task start.
    pub fn get(&self, owner: &str, repo: &str) -> taskstore::StoreResult<Option<RepoMemory>> {
        debug!(owner, repo, "StaticMemory::get: called");
        let filter = Filter::eq("natural_key", IndexValue::String(RepoMemory::key(owner, repo)));
        let mut matches: Vec<RepoMemory> = self.store.list(&[filter])?;
        Ok(matches.pop())
    }

    /// Admin operation: writes a new row (or updates in place) and bumps
    /// `updated_at`. Never mutates a row that's already been handed to a
    /// running session.
    pub fn upsert(&self, mut row: RepoMemory) -> taskstore::StoreResult<String> {
        debug!(owner = %row.owner, repo = %row.repo, "StaticMemory::upsert: called");
        if let Some(existing) = self.get(&row.owner, &row.repo)? {
            row.created_at = existing.created_at;
            self.store.update(row.clone())?;
            return Ok(row.repo.clone());
        }
        self.store.create(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn get_returns_none_before_any_upsert() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let memory = StaticMemory::new(store);
        assert!(memory.get("org", "repo").unwrap().is_none());
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let memory = StaticMemory::new(store);
        memory.upsert(RepoMemory::new("org", "repo")).unwrap();
        let found = memory.get("org", "repo").unwrap().unwrap();
        assert_eq!(found.owner, "org");
        assert_eq!(found.repo, "repo");
    }

    #[test]
    fn second_upsert_preserves_created_at() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let memory = StaticMemory::new(store);
        let mut row = RepoMemory::new("org", "repo");
        row.created_at = 100;
        memory.upsert(row).unwrap();

        let mut updated = memory.get("org", "repo").unwrap().unwrap();
        updated.created_at = 999;
        updated.max_diff_lines = 9999;
        memory.upsert(updated).unwrap();

        let refetched = memory.get("org", "repo").unwrap().unwrap();
        assert_eq!(refetched.created_at, 100);
        assert_eq!(refetched.max_diff_lines, 9999);
    }
}
