//! The `Record` trait and the small index-query vocabulary built on top of it.
//!
//! Every persisted entity in the daemon (tasks, session ledgers, checkpoints,
//! archival rows, ...) implements `Record` and is stored in its own named
//! collection inside a `Store`. `indexed_fields` controls what a collection
//! can be filtered by without deserializing every row.

use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;

/// A value that can appear in an index and be compared by `FilterOp::Eq`.
///
/// Kept intentionally small: this is a query-time comparison key, not a
/// general value type. Records still serialize their full field set as JSON;
/// only fields worth filtering on get mirrored into an `IndexValue`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl std::fmt::Display for IndexValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexValue::String(s) => write!(f, "{}", s),
            IndexValue::Int(i) => write!(f, "{}", i),
            IndexValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Comparison operator for a `Filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

/// A single `field op value` constraint. `Store::list` ANDs all filters
/// passed together.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: IndexValue) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value,
        }
    }

    /// Evaluate this filter against a record's indexed fields.
    pub(crate) fn matches(&self, fields: &HashMap<String, IndexValue>) -> bool {
        let Some(actual) = fields.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Ne => actual != &self.value,
            FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte => {
                match (actual, &self.value) {
                    (IndexValue::Int(a), IndexValue::Int(b)) => match self.op {
                        FilterOp::Gt => a > b,
                        FilterOp::Lt => a < b,
                        FilterOp::Gte => a >= b,
                        FilterOp::Lte => a <= b,
                        FilterOp::Eq | FilterOp::Ne => unreachable!(),
                    },
                    (IndexValue::String(a), IndexValue::String(b)) => match self.op {
                        FilterOp::Gt => a > b,
                        FilterOp::Lt => a < b,
                        FilterOp::Gte => a >= b,
                        FilterOp::Lte => a <= b,
                        FilterOp::Eq | FilterOp::Ne => unreachable!(),
                    },
                    _ => false,
                }
            }
        }
    }
}

/// A type persisted in a `Store`. Each implementor owns one collection
/// (table + JSONL log), keyed by `id()`.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Stable identifier, unique within the collection.
    fn id(&self) -> &str;

    /// Last-modified timestamp (Unix milliseconds). Used to order
    /// createdAt-descending retrieval (e.g. checkpoint listing).
    fn updated_at(&self) -> i64;

    /// The collection (table) name this record type is stored under.
    fn collection_name() -> &'static str;

    /// The subset of fields this record exposes for `Store::list` filtering.
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}
