//! Error type for `taskstore` operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("record already exists: {collection}/{id}")]
    AlreadyExists { collection: &'static str, id: String },

    #[error("record not found: {collection}/{id}")]
    NotFound { collection: &'static str, id: String },

    #[error("failed to acquire store lock: {0}")]
    Lock(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
