//! Archival memory: the long-term, embedding-indexed store shared across
//! tasks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskstore::{Filter, IndexValue, Record, Store, now_ms};
use tracing::debug;
use uuid::Uuid;

use crate::embedding::{Embedder, cosine_similarity, lexical_rank, zero_vector};

/// What kind of thing an archival row was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Observation,
    Feedback,
    Block,
    Checkpoint,
}

/// A single archived record: content, its embedding, and retrieval metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivalMemory {
    pub id: String,
    pub content: String,
    pub summary: Option<String>,
    pub embedding: Vec<f32>,
    pub source_type: SourceType,
    pub source_id: Option<String>,
    pub repo: Option<String>,
    pub task_id: Option<String>,
    pub is_global: bool,
    pub metadata: Value,
    pub token_count: Option<u32>,
    /// Starts neutral; nudged up or down as the row gets touched or ages.
    pub importance_score: f64,
    pub access_count: u32,
    pub last_accessed_at: Option<i64>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

impl ArchivalMemory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        content: impl Into<String>,
        embedding: Vec<f32>,
        source_type: SourceType,
        repo: Option<String>,
        task_id: Option<String>,
        is_global: bool,
    ) -> Self {
        let content = content.into();
        debug!(len = content.len(), ?source_type, is_global, "ArchivalMemory::new: called");
        Self {
            id: Uuid::now_v7().to_string(),
            content,
            summary: None,
            embedding,
            source_type,
            source_id: None,
            repo,
            task_id,
            is_global,
            metadata: Value::Null,
            token_count: None,
            importance_score: 0.5,
            access_count: 0,
            last_accessed_at: None,
            created_at: now_ms(),
            expires_at: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance_score = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.expires_at = Some(self.created_at + ttl_ms);
        self
    }

    /// A row with no `task_id` that also isn't marked global can never be
    /// surfaced by any search scope; such rows are write-only dead weight.
    pub fn is_reachable(&self) -> bool {
        self.is_global || self.task_id.is_some()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.map(|exp| exp < now).unwrap_or(false)
    }

    fn record_access(&mut self) {
        self.access_count += 1;
        self.last_accessed_at = Some(now_ms());
    }
}

impl Record for ArchivalMemory {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.last_accessed_at.unwrap_or(self.created_at)
    }

    fn collection_name() -> &'static str {
        "archival_memory"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        if let Some(ref repo) = self.repo {
            fields.insert("repo".to_string(), IndexValue::String(repo.clone()));
        }
        if let Some(ref task_id) = self.task_id {
            fields.insert("task_id".to_string(), IndexValue::String(task_id.clone()));
        }
        fields.insert("is_global".to_string(), IndexValue::Bool(self.is_global));
        fields
    }
}

/// Scoping constraints applied before ranking.
#[derive(Debug, Clone, Default)]
pub struct SearchScope {
    pub repo: Option<String>,
    pub task_id: Option<String>,
    pub include_global: bool,
    pub source_types: Option<Vec<SourceType>>,
}

/// One ranked search hit, at whatever layer was requested.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub similarity: f64,
    pub title: String,
    pub summary: Option<String>,
    pub full_content: Option<String>,
}

/// Three-layer progressive disclosure result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressiveDisclosure {
    /// Layer 1: titles + descriptions, ranked, for every candidate above threshold.
    pub index: Vec<SearchHit>,
    /// Layer 2: summaries for the closest subset.
    pub summaries: Vec<SearchHit>,
    /// Layer 3: full content, top matches only.
    pub full: Vec<SearchHit>,
}

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Thin wrapper around `Store` for the `archival_memory` collection.
pub struct ArchivalStore {
    store: Store,
}

impl ArchivalStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert-only: archival rows are never edited in place, only superseded.
    pub fn insert(&self, row: ArchivalMemory) -> taskstore::StoreResult<String> {
        debug!(id = %row.id, "ArchivalStore::insert: called");
        self.store.create(row)
    }

    pub fn get(&self, id: &str) -> taskstore::StoreResult<Option<ArchivalMemory>> {
        self.store.get(id)
    }

    /// Mark a row as accessed; only access metadata mutates on read.
    pub fn touch(&self, id: &str) -> taskstore::StoreResult<()> {
        if let Some(mut row) = self.store.get::<ArchivalMemory>(id)? {
            row.record_access();
            self.store.update(row)?;
        }
        Ok(())
    }

    /// Remove rows past `expiresAt`. Idempotent.
    pub fn cleanup_expired(&self) -> taskstore::StoreResult<usize> {
        let now = now_ms();
        let all: Vec<ArchivalMemory> = self.store.list(&[])?;
        let mut removed = 0;
        for row in all {
            if row.is_expired(now) {
                self.store.delete::<ArchivalMemory>(&row.id)?;
                removed += 1;
            }
        }
        debug!(removed, "ArchivalStore::cleanup_expired: done");
        Ok(removed)
    }

    fn scoped_candidates(&self, scope: &SearchScope) -> taskstore::StoreResult<Vec<ArchivalMemory>> {
        let mut filters = Vec::new();
        if let Some(ref repo) = scope.repo {
            filters.push(Filter::eq("repo", IndexValue::String(repo.clone())));
        }
        let candidates: Vec<ArchivalMemory> = self.store.list(&filters)?;
        let now = now_ms();
        Ok(candidates
            .into_iter()
            .filter(|r| !r.is_expired(now))
            .filter(|r| {
                if !r.is_reachable() {
                    return false;
                }
                match &scope.task_id {
                    Some(task_id) => r.task_id.as_deref() == Some(task_id.as_str()) || (r.is_global && scope.include_global),
                    None => scope.include_global || r.is_global,
                }
            })
            .filter(|r| match &scope.source_types {
                Some(types) => types.contains(&r.source_type),
                None => true,
            })
            .collect())
    }

    /// Semantic search: embed `query`, rank candidates by cosine similarity
    /// (falling back to lexical rank when both vectors are zero), drop
    /// results below `threshold`, honor `scope`.
    pub fn search(
        &self,
        query: &str,
        embedder: &dyn Embedder,
        scope: &SearchScope,
        threshold: f64,
        top_k: usize,
    ) -> taskstore::StoreResult<Vec<SearchHit>> {
        debug!(query, threshold, top_k, "ArchivalStore::search: called");
        let query_embedding = embedder.embed(query);
        let zero = zero_vector();
        let candidates = self.scoped_candidates(scope)?;

        let mut scored: Vec<(f64, &ArchivalMemory)> = candidates
            .iter()
            .map(|row| {
                let score = if row.embedding == zero {
                    lexical_rank(query, &row.content)
                } else {
                    cosine_similarity(&query_embedding, &row.embedding)
                };
                (score, row)
            })
            .filter(|(score, _)| *score >= threshold)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        for (_, row) in &scored {
            self.touch(&row.id)?;
        }

        Ok(scored
            .into_iter()
            .map(|(similarity, row)| SearchHit {
                id: row.id.clone(),
                similarity,
                title: title_of(&row.content),
                summary: row.summary.clone(),
                full_content: Some(row.content.clone()),
            })
            .collect())
    }

    /// Progressive disclosure: index -> summaries -> full content, each
    /// layer a narrower subset of the ranked result.
    pub fn progressive_search(
        &self,
        query: &str,
        embedder: &dyn Embedder,
        scope: &SearchScope,
        threshold: f64,
    ) -> taskstore::StoreResult<ProgressiveDisclosure> {
        let ranked = self.search(query, embedder, scope, threshold, 50)?;
        let index: Vec<SearchHit> = ranked
            .iter()
            .map(|h| SearchHit {
                id: h.id.clone(),
                similarity: h.similarity,
                title: h.title.clone(),
                summary: None,
                full_content: None,
            })
            .collect();
        let summaries: Vec<SearchHit> = ranked
            .iter()
            .take(10)
            .map(|h| SearchHit {
                id: h.id.clone(),
                similarity: h.similarity,
                title: h.title.clone(),
                summary: h.summary.clone(),
                full_content: None,
            })
            .collect();
        let full: Vec<SearchHit> = ranked.into_iter().take(3).collect();
        Ok(ProgressiveDisclosure { index, summaries, full })
    }

    pub fn raw_store(&self) -> &Store {
        &self.store
    }
}

fn title_of(content: &str) -> String {
    content.lines().next().unwrap_or("").chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, ArchivalStore) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, ArchivalStore::new(store))
    }

    #[test]
    fn task_scoped_unreachable_without_global_or_task() {
        let row = ArchivalMemory::new("x", zero_vector(), SourceType::Observation, None, None, false);
        assert!(!row.is_reachable());
    }

    #[test]
    fn search_drops_results_below_threshold() {
        let (_dir, store) = open_store();
        let embedder = HashEmbedder::new();
        let row = ArchivalMemory::new(
            "completely unrelated content about turtles",
            embedder.embed("completely unrelated content about turtles"),
            SourceType::Observation,
            None,
            Some("task-1".to_string()),
            false,
        );
        store.insert(row).unwrap();

        let hits = store
            .search(
                "null pointer exception fix",
                &embedder,
                &SearchScope {
                    task_id: Some("task-1".to_string()),
                    ..Default::default()
                },
                DEFAULT_SIMILARITY_THRESHOLD,
                10,
            )
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn search_finds_near_identical_content() {
        let (_dir, store) = open_store();
        let embedder = HashEmbedder::new();
        let content = "fix null pointer dereference in parser";
        let row = ArchivalMemory::new(
            content,
            embedder.embed(content),
            SourceType::Observation,
            None,
            Some("task-1".to_string()),
            false,
        );
        store.insert(row).unwrap();

        let hits = store
            .search(
                content,
                &embedder,
                &SearchScope {
                    task_id: Some("task-1".to_string()),
                    ..Default::default()
                },
                DEFAULT_SIMILARITY_THRESHOLD,
                10,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn cleanup_expired_removes_past_rows_only() {
        let (_dir, store) = open_store();
        let embedder = HashEmbedder::new();
        let expired = ArchivalMemory::new("old", embedder.embed("old"), SourceType::Observation, None, None, true)
            .with_ttl_ms(-1);
        let fresh = ArchivalMemory::new("new", embedder.embed("new"), SourceType::Observation, None, None, true)
            .with_ttl_ms(1_000_000);
        store.insert(expired).unwrap();
        store.insert(fresh.clone()).unwrap();

        let removed = store.cleanup_expired().unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&fresh.id).unwrap().is_some());
    }

    #[test]
    fn task_scoped_search_excludes_other_tasks_global_false() {
        let (_dir, store) = open_store();
        let embedder = HashEmbedder::new();
        let content = "refactor the auth middleware";
        let other_task = ArchivalMemory::new(
            content,
            embedder.embed(content),
            SourceType::Observation,
            None,
            Some("task-2".to_string()),
            false,
        );
        store.insert(other_task).unwrap();

        let hits = store
            .search(
                content,
                &embedder,
                &SearchScope {
                    task_id: Some("task-1".to_string()),
                    include_global: false,
                    ..Default::default()
                },
                0.0,
                10,
            )
            .unwrap();
        assert!(hits.is_empty());
    }
}
