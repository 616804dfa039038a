//! ID generation and resolution
//!
//! Every persisted domain record gets a generated id of the form
//! `{random}-{kind}-{seed}`, e.g. `a3f9-loop-phase-oauth-endpoints-p1`.
//! Keeping the kind and seed verbatim in the id makes store dumps and
//! log lines grep-able without a lookup.

use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Generate an id of the form `{random}-{kind}-{seed}`.
///
/// `kind` is usually a short noun ("loop", "task", "checkpoint").
/// `seed` is free text (often `"{type}-{description}"`) and is not
/// sanitized - callers that want a clean id should slugify first.
pub fn generate_id(kind: &str, seed: &str) -> String {
    debug!(%kind, %seed, "generate_id: called");
    let prefix = short_prefix();
    format!("{}-{}-{}", prefix, kind, seed)
}

/// Four hex chars taken from a fresh UUIDv7 (time-ordered, so ids
/// generated close together sort close together too).
fn short_prefix() -> String {
    let id = Uuid::now_v7();
    let bytes = id.as_bytes();
    format!("{:02x}{:02x}", bytes[0], bytes[1])
}

/// A domain id, newtype-wrapped so call sites can't accidentally pass
/// a raw string meant for a different collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(String);

impl DomainId {
    pub fn new(kind: &str, seed: &str) -> Self {
        Self(generate_id(kind, seed))
    }

    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<DomainId> for String {
    fn from(id: DomainId) -> Self {
        id.0
    }
}

impl AsRef<str> for DomainId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolves a short, user-typed id fragment (e.g. the first few chars
/// pasted from a terminal) against a set of known full ids, the way
/// `git` resolves abbreviated commit hashes.
pub struct IdResolver<'a> {
    candidates: &'a [String],
}

/// Outcome of resolving a fragment against a candidate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Exactly one id matched.
    Found(String),
    /// No id started with the fragment.
    NotFound,
    /// More than one id started with the fragment.
    Ambiguous(Vec<String>),
}

impl<'a> IdResolver<'a> {
    pub fn new(candidates: &'a [String]) -> Self {
        Self { candidates }
    }

    /// Resolve `fragment` against the candidate set. An exact match
    /// always wins even if it is also a prefix of other candidates.
    pub fn resolve(&self, fragment: &str) -> ResolveOutcome {
        debug!(%fragment, num_candidates = self.candidates.len(), "IdResolver::resolve: called");
        if let Some(exact) = self.candidates.iter().find(|id| id.as_str() == fragment) {
            debug!(%exact, "IdResolver::resolve: exact match");
            return ResolveOutcome::Found(exact.clone());
        }

        let matches: Vec<String> = self
            .candidates
            .iter()
            .filter(|id| id.starts_with(fragment))
            .cloned()
            .collect();

        match matches.len() {
            0 => {
                debug!("IdResolver::resolve: no prefix match");
                ResolveOutcome::NotFound
            }
            1 => {
                debug!(id = %matches[0], "IdResolver::resolve: unique prefix match");
                ResolveOutcome::Found(matches.into_iter().next().expect("len checked"))
            }
            _ => {
                debug!(count = matches.len(), "IdResolver::resolve: ambiguous prefix match");
                ResolveOutcome::Ambiguous(matches)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_id_embeds_kind_and_seed() {
        let id = generate_id("loop", "phase-oauth-endpoints-p1");
        assert!(id.contains("-loop-"));
        assert!(id.contains("phase-oauth-endpoints-p1"));
    }

    #[test]
    fn generate_id_is_unique_across_calls() {
        let a = generate_id("task", "same-seed");
        let b = generate_id("task", "same-seed");
        assert_ne!(a, b);
    }

    #[test]
    fn domain_id_round_trips_through_display() {
        let id = DomainId::new("checkpoint", "before-validate");
        let rendered = id.to_string();
        assert_eq!(rendered, id.as_str());
    }

    #[test]
    fn resolver_finds_unique_prefix() {
        let ids = vec!["ab12-task-one".to_string(), "cd34-task-two".to_string()];
        let resolver = IdResolver::new(&ids);
        assert_eq!(resolver.resolve("ab12"), ResolveOutcome::Found(ids[0].clone()));
    }

    #[test]
    fn resolver_reports_ambiguous_prefix() {
        let ids = vec!["ab12-task-one".to_string(), "ab99-task-two".to_string()];
        let resolver = IdResolver::new(&ids);
        match resolver.resolve("ab") {
            ResolveOutcome::Ambiguous(matches) => assert_eq!(matches.len(), 2),
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn resolver_reports_not_found() {
        let ids = vec!["ab12-task-one".to_string()];
        let resolver = IdResolver::new(&ids);
        assert_eq!(resolver.resolve("zz"), ResolveOutcome::NotFound);
    }

    #[test]
    fn resolver_prefers_exact_match_over_ambiguous_prefix() {
        let ids = vec!["ab12-task-one".to_string(), "ab12-task-one-extended".to_string()];
        let resolver = IdResolver::new(&ids);
        assert_eq!(resolver.resolve("ab12-task-one"), ResolveOutcome::Found(ids[0].clone()));
    }
}
