//! contextstore - long-term archival memory with semantic retrieval
//!
//! Content-addressed `ArchivalMemory` rows with embeddings and
//! progressive-disclosure retrieval, plus `LearnedPattern` rows with a
//! confidence that recomputes on every recorded outcome. Built on
//! `taskstore::Store`; this crate adds no persistence mechanism of its
//! own.
//!
//! Embeddings are optional: when no [`Embedder`] is configured,
//! [`HashEmbedder`] provides a deterministic local fallback and search
//! degrades to a lexical rank.

pub mod archival;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod pattern;

pub use archival::{ArchivalMemory, ArchivalStore, ProgressiveDisclosure, SearchHit, SearchScope, SourceType};
pub use embedding::{EMBEDDING_DIM, Embedder, HashEmbedder, cosine_similarity, lexical_rank, zero_vector};
pub use pattern::{LearnedPattern, PatternScope, PatternStore, PatternType};
