//! Learned patterns: fixes, conventions, and error signatures the system
//! has seen recur, with a confidence that recomputes on every outcome.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{Filter, IndexValue, Record, Store, now_ms};
use tracing::debug;
use uuid::Uuid;

use crate::embedding::Embedder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Fix,
    Convention,
    Error,
    Style,
    Refactor,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternScope {
    pub repo: Option<String>,
    pub language: Option<String>,
    pub file_pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub id: String,
    pub pattern_type: PatternType,
    pub trigger_pattern: Option<String>,
    pub description: String,
    pub solution: Option<String>,
    /// Ordered sequence of examples that produced/confirmed this pattern.
    pub examples: Vec<String>,
    pub scope: PatternScope,
    pub confidence: f64,
    pub success_count: u32,
    pub failure_count: u32,
    pub embedding: Vec<f32>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// `confidence = successCount / (successCount + failureCount + 1)`,
/// recomputed on every outcome. The `+1` keeps a brand-new pattern's
/// confidence below any real success rate until it has evidence.
fn recompute_confidence(success: u32, failure: u32) -> f64 {
    success as f64 / (success as f64 + failure as f64 + 1.0)
}

impl LearnedPattern {
    pub fn new(
        pattern_type: PatternType,
        description: impl Into<String>,
        scope: PatternScope,
        embedding: Vec<f32>,
    ) -> Self {
        let description = description.into();
        debug!(?pattern_type, %description, "LearnedPattern::new: called");
        let now = now_ms();
        Self {
            id: Uuid::now_v7().to_string(),
            pattern_type,
            trigger_pattern: None,
            description,
            solution: None,
            examples: Vec::new(),
            scope,
            confidence: recompute_confidence(0, 0),
            success_count: 0,
            failure_count: 0,
            embedding,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.confidence = recompute_confidence(self.success_count, self.failure_count);
        self.updated_at = now_ms();
        debug!(
            success,
            self.confidence, self.success_count, self.failure_count, "LearnedPattern::record_outcome: called"
        );
    }

    pub fn add_example(&mut self, example: impl Into<String>) {
        self.examples.push(example.into());
        self.updated_at = now_ms();
    }

    pub fn is_eligible_for_promotion(&self, min_confidence: f64) -> bool {
        self.confidence >= min_confidence
    }
}

impl Record for LearnedPattern {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "learned_patterns"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        if let Some(ref repo) = self.scope.repo {
            fields.insert("repo".to_string(), IndexValue::String(repo.clone()));
        }
        fields.insert(
            "pattern_type".to_string(),
            IndexValue::String(format!("{:?}", self.pattern_type)),
        );
        fields
    }
}

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;
/// Patterns above this confidence are surfaced as "related" in a
/// progressive-disclosure retrieval.
pub const RELATED_PATTERN_THRESHOLD: f64 = 0.6;

/// Thin wrapper around `Store` for the `learned_patterns` collection.
pub struct PatternStore {
    store: Store,
}

impl PatternStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Create or upsert: a pattern with the same `trigger_pattern` + repo
    /// scope is updated in place (new example appended) rather than
    /// duplicated.
    pub fn record_pattern(&self, mut pattern: LearnedPattern) -> taskstore::StoreResult<String> {
        if let Some(trigger) = pattern.trigger_pattern.clone() {
            let existing = self.find_by_trigger(&trigger, pattern.scope.repo.as_deref())?;
            if let Some(mut found) = existing {
                found.examples.append(&mut pattern.examples);
                found.updated_at = now_ms();
                self.store.update(found.clone())?;
                return Ok(found.id);
            }
        }
        self.store.create(pattern)
    }

    fn find_by_trigger(&self, trigger: &str, repo: Option<&str>) -> taskstore::StoreResult<Option<LearnedPattern>> {
        let mut filters = Vec::new();
        if let Some(repo) = repo {
            filters.push(Filter::eq("repo", IndexValue::String(repo.to_string())));
        }
        let candidates: Vec<LearnedPattern> = self.store.list(&filters)?;
        Ok(candidates.into_iter().find(|p| p.trigger_pattern.as_deref() == Some(trigger)))
    }

    /// Mutate success/failure counters and recompute confidence.
    pub fn update_pattern_outcome(&self, id: &str, success: bool) -> taskstore::StoreResult<Option<LearnedPattern>> {
        let Some(mut pattern) = self.store.get::<LearnedPattern>(id)? else {
            return Ok(None);
        };
        pattern.record_outcome(success);
        self.store.update(pattern.clone())?;
        Ok(Some(pattern))
    }

    pub fn get(&self, id: &str) -> taskstore::StoreResult<Option<LearnedPattern>> {
        self.store.get(id)
    }

    /// Patterns with `confidence >= min_confidence`.
    pub fn eligible_for_promotion(&self, min_confidence: f64) -> taskstore::StoreResult<Vec<LearnedPattern>> {
        let all: Vec<LearnedPattern> = self.store.list(&[])?;
        Ok(all.into_iter().filter(|p| p.is_eligible_for_promotion(min_confidence)).collect())
    }

    /// Strip repo/task binding, making a pattern globally applicable.
    pub fn promote_to_global(&self, id: &str) -> taskstore::StoreResult<Option<LearnedPattern>> {
        let Some(mut pattern) = self.store.get::<LearnedPattern>(id)? else {
            return Ok(None);
        };
        pattern.scope.repo = None;
        pattern.updated_at = now_ms();
        self.store.update(pattern.clone())?;
        Ok(Some(pattern))
    }

    /// Related patterns for a progressive-disclosure retrieval: ranked by
    /// embedding similarity, filtered to confidence above the related
    /// threshold.
    pub fn related(&self, query: &str, embedder: &dyn Embedder, repo: Option<&str>) -> taskstore::StoreResult<Vec<LearnedPattern>> {
        let mut filters = Vec::new();
        if let Some(repo) = repo {
            filters.push(Filter::eq("repo", IndexValue::String(repo.to_string())));
        }
        let candidates: Vec<LearnedPattern> = self.store.list(&filters)?;
        let query_embedding = embedder.embed(query);
        let mut scored: Vec<(f64, LearnedPattern)> = candidates
            .into_iter()
            .filter(|p| p.confidence > RELATED_PATTERN_THRESHOLD)
            .map(|p| {
                let score = crate::embedding::cosine_similarity(&query_embedding, &p.embedding);
                (score, p)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().map(|(_, p)| p).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, PatternStore) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, PatternStore::new(store))
    }

    #[test]
    fn confidence_formula_matches_spec() {
        let mut p = LearnedPattern::new(PatternType::Fix, "missing import", PatternScope::default(), vec![]);
        p.record_outcome(true);
        p.record_outcome(true);
        p.record_outcome(false);
        assert_eq!(p.confidence, 2.0 / (2.0 + 1.0 + 1.0));
    }

    #[test]
    fn update_pattern_outcome_persists_recomputed_confidence() {
        let (_dir, store) = open_store();
        let pattern = LearnedPattern::new(PatternType::Fix, "add missing import", PatternScope::default(), vec![]);
        let id = store.record_pattern(pattern).unwrap();

        store.update_pattern_outcome(&id, true).unwrap();
        let updated = store.get(&id).unwrap().unwrap();
        assert_eq!(updated.success_count, 1);
        assert_eq!(updated.confidence, 1.0 / (1.0 + 0.0 + 1.0));
    }

    #[test]
    fn eligible_for_promotion_filters_by_confidence() {
        let (_dir, store) = open_store();
        let mut strong = LearnedPattern::new(PatternType::Fix, "strong", PatternScope::default(), vec![]);
        for _ in 0..10 {
            strong.record_outcome(true);
        }
        let weak = LearnedPattern::new(PatternType::Fix, "weak", PatternScope::default(), vec![]);
        store.record_pattern(strong).unwrap();
        store.record_pattern(weak).unwrap();

        let eligible = store.eligible_for_promotion(DEFAULT_MIN_CONFIDENCE).unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].description, "strong");
    }

    #[test]
    fn record_pattern_upserts_on_matching_trigger() {
        let (_dir, store) = open_store();
        let mut first = LearnedPattern::new(PatternType::Error, "TS2304", PatternScope::default(), vec![]);
        first.trigger_pattern = Some("TS2304".to_string());
        first.add_example("example one");
        let id = store.record_pattern(first).unwrap();

        let mut second = LearnedPattern::new(PatternType::Error, "TS2304", PatternScope::default(), vec![]);
        second.trigger_pattern = Some("TS2304".to_string());
        second.add_example("example two");
        let id2 = store.record_pattern(second).unwrap();

        assert_eq!(id, id2);
        let merged = store.get(&id).unwrap().unwrap();
        assert_eq!(merged.examples.len(), 2);
    }

    #[test]
    fn promote_to_global_strips_repo_binding() {
        let (_dir, store) = open_store();
        let pattern = LearnedPattern::new(
            PatternType::Convention,
            "use snake_case",
            PatternScope {
                repo: Some("org/r".to_string()),
                ..Default::default()
            },
            vec![],
        );
        let id = store.record_pattern(pattern).unwrap();
        let promoted = store.promote_to_global(&id).unwrap().unwrap();
        assert!(promoted.scope.repo.is_none());
    }

    #[test]
    fn related_orders_by_similarity_above_threshold() {
        let (_dir, store) = open_store();
        let embedder = HashEmbedder::new();
        let mut relevant = LearnedPattern::new(
            PatternType::Fix,
            "null pointer fix",
            PatternScope::default(),
            embedder.embed("null pointer fix"),
        );
        for _ in 0..5 {
            relevant.record_outcome(true);
        }
        store.record_pattern(relevant).unwrap();

        let hits = store.related("null pointer fix", &embedder, None).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
