//! Embedding abstraction and the deterministic lexical fallback.
//!
//! The archival store never blocks on an embedding provider being
//! configured: when none is, `HashEmbedder` produces a fixed-dimension
//! bag-of-words hash vector so cosine similarity still ranks results
//! sensibly without a network call or an external provider key.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tracing::debug;

/// Fixed embedding dimension used throughout the archival store.
pub const EMBEDDING_DIM: usize = 256;

/// Produces a fixed-dimension embedding for a piece of text.
pub trait Embedder: Send + Sync {
    /// Embed `text`, returning a vector of exactly [`EMBEDDING_DIM`] floats.
    fn embed(&self, text: &str) -> Vec<f32>;

    /// Short name, recorded alongside stored embeddings for provenance.
    fn name(&self) -> &str;
}

/// Deterministic hashing bag-of-words embedder. No network calls, no
/// external provider: every token is hashed into one of [`EMBEDDING_DIM`]
/// buckets and the resulting vector is L2-normalized. Same text always
/// produces the same vector, so this doubles as a stable test fixture.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn new() -> Self {
        Self
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        debug!(text_len = text.len(), "HashEmbedder::embed: called");
        let mut buckets = vec![0f32; EMBEDDING_DIM];
        for token in tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let idx = (hasher.finish() as usize) % EMBEDDING_DIM;
            buckets[idx] += 1.0;
        }
        normalize(&mut buckets);
        buckets
    }

    fn name(&self) -> &str {
        "hash-bow-v1"
    }
}

/// The all-zero embedding used when a record is stored with no embedder
/// configured at all.
pub fn zero_vector() -> Vec<f32> {
    vec![0.0; EMBEDDING_DIM]
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity between two equal-length vectors. Returns 0.0 for a
/// zero-norm input rather than dividing by zero (an unembedded record
/// never spuriously ranks first).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

/// Plain-text rank used when both embeddings are zero vectors: fraction
/// of query tokens present in the candidate text.
pub fn lexical_rank(query: &str, text: &str) -> f64 {
    let query_tokens: Vec<String> = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_tokens: std::collections::HashSet<String> = tokenize(text).into_iter().collect();
    let hits = query_tokens.iter().filter(|t| text_tokens.contains(*t)).count();
    hits as f64 / query_tokens.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embedder_is_deterministic() {
        let e = HashEmbedder::new();
        assert_eq!(e.embed("hello world"), e.embed("hello world"));
    }

    #[test]
    fn hash_embedder_produces_fixed_dim() {
        let e = HashEmbedder::new();
        assert_eq!(e.embed("anything at all").len(), EMBEDDING_DIM);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let e = HashEmbedder::new();
        let v = e.embed("fix the null pointer dereference");
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn cosine_similarity_of_zero_vector_is_zero() {
        let z = zero_vector();
        assert_eq!(cosine_similarity(&z, &z), 0.0);
    }

    #[test]
    fn lexical_rank_rewards_shared_tokens() {
        assert!(lexical_rank("null pointer", "fix the null pointer bug") > 0.0);
        assert_eq!(lexical_rank("xyzzy", "totally unrelated text"), 0.0);
    }
}
