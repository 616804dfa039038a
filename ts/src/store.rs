//! `Store` — a generic, per-collection persistent record store.
//!
//! Backing is SQLite (one `records` table, keyed by `(collection, id)`,
//! storing each record as JSON) plus an append-only JSONL log per store
//! directory that mirrors every create/update for external tailing and
//! crash-forensic recovery. An exclusive file lock (`fs2`) on the store
//! directory enforces the single-writer invariant described in the memory
//! model (§5: "Session memory for task T is written only by the worker
//! holding T" generalizes to "one process holds the Store").
//!
//! Filtering is index-assisted: `rebuild_indexes::<T>()` populates an
//! in-memory `field -> value -> {id}` map from every record's
//! `indexed_fields()`; `list` uses that map when the first filter hits an
//! indexed field, and falls back to a full collection scan otherwise.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fs2::FileExt;
use log::debug;
use rusqlite::Connection;

use crate::error::{StoreError, StoreResult};
use crate::record::{Filter, IndexValue, Record};
use crate::time::now_ms;

type IndexMap = HashMap<&'static str, HashMap<String, HashMap<IndexValue, HashSet<String>>>>;

/// A generic persistent store: SQLite for random access, JSONL for audit.
pub struct Store {
    conn: Connection,
    base_path: PathBuf,
    indexes: RwLock<IndexMap>,
    _lock_file: File,
}

impl Store {
    /// Open (or create) a store rooted at `path`.
    ///
    /// Acquires an exclusive advisory lock on `path/.lock` for the lifetime
    /// of the returned `Store`; a second process opening the same path
    /// fails fast instead of silently corrupting state.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let base_path = path.as_ref().to_path_buf();
        debug!("Store::open: {}", base_path.display());
        fs::create_dir_all(&base_path)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(base_path.join(".lock"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|e| StoreError::Lock(e.to_string()))?;

        let conn = Connection::open(base_path.join("store.db"))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection)",
            [],
        )?;

        Ok(Self {
            conn,
            base_path,
            indexes: RwLock::new(HashMap::new()),
            _lock_file: lock_file,
        })
    }

    fn log_path(&self) -> PathBuf {
        self.base_path.join("log.jsonl")
    }

    fn append_log(&self, collection: &str, record_json: &str) -> StoreResult<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(self.log_path())?;
        writeln!(
            file,
            r#"{{"ts":{},"collection":"{}","data":{}}}"#,
            now_ms(),
            collection,
            record_json
        )?;
        Ok(())
    }

    fn index_record<T: Record>(&self, record: &T) {
        let fields = record.indexed_fields();
        let mut indexes = self.indexes.write().expect("index lock poisoned");
        let collection_index = indexes.entry(T::collection_name()).or_default();
        for (field, value) in fields {
            collection_index
                .entry(field)
                .or_default()
                .entry(value)
                .or_default()
                .insert(record.id().to_string());
        }
    }

    fn deindex_id<T: Record>(&self, id: &str) {
        let mut indexes = self.indexes.write().expect("index lock poisoned");
        if let Some(collection_index) = indexes.get_mut(T::collection_name()) {
            for value_map in collection_index.values_mut() {
                for ids in value_map.values_mut() {
                    ids.remove(id);
                }
            }
        }
    }

    /// Insert a new record. Errors if a record with the same id already exists.
    pub fn create<T: Record>(&self, record: T) -> StoreResult<String> {
        let collection = T::collection_name();
        let id = record.id().to_string();
        debug!("Store::create: {}/{}", collection, id);

        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM records WHERE collection = ?1 AND id = ?2",
                rusqlite::params![collection, id],
                |row| row.get(0),
            )
            .ok();
        if exists.is_some() {
            return Err(StoreError::AlreadyExists { collection, id });
        }

        let json = serde_json::to_string(&record)?;
        self.conn.execute(
            "INSERT INTO records (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![collection, id, json, record.updated_at()],
        )?;
        self.append_log(collection, &json)?;
        self.index_record(&record);

        Ok(id)
    }

    /// Fetch a single record by id.
    pub fn get<T: Record>(&self, id: &str) -> StoreResult<Option<T>> {
        let collection = T::collection_name();
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM records WHERE collection = ?1 AND id = ?2",
                rusqlite::params![collection, id],
                |row| row.get(0),
            )
            .ok();
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Upsert a record (create-or-replace semantics, unlike `create`).
    pub fn update<T: Record>(&self, record: T) -> StoreResult<()> {
        let collection = T::collection_name();
        let id = record.id().to_string();
        debug!("Store::update: {}/{}", collection, id);

        let json = serde_json::to_string(&record)?;
        self.conn.execute(
            "INSERT INTO records (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            rusqlite::params![collection, id, json, record.updated_at()],
        )?;
        self.append_log(collection, &json)?;
        self.index_record(&record);

        Ok(())
    }

    /// List all records of a collection matching every filter (ANDed).
    pub fn list<T: Record>(&self, filters: &[Filter]) -> StoreResult<Vec<T>> {
        // Fast path: first filter hits an index.
        if let Some(first) = filters.first() {
            let indexes = self.indexes.read().expect("index lock poisoned");
            if let Some(ids) = indexes
                .get(T::collection_name())
                .and_then(|c| c.get(&first.field))
                .and_then(|v| v.get(&first.value))
            {
                let ids: Vec<String> = ids.iter().cloned().collect();
                drop(indexes);
                let mut out = Vec::new();
                for id in ids {
                    if let Some(record) = self.get::<T>(&id)? {
                        let fields = record.indexed_fields();
                        if filters.iter().all(|f| f.matches(&fields)) {
                            out.push(record);
                        }
                    }
                }
                return Ok(out);
            }
        }

        // Fallback: full scan.
        let collection = T::collection_name();
        let mut stmt = self.conn.prepare("SELECT data FROM records WHERE collection = ?1")?;
        let rows = stmt.query_map(rusqlite::params![collection], |row| {
            let json: String = row.get(0)?;
            Ok(json)
        })?;

        let mut out = Vec::new();
        for row in rows {
            let json = row?;
            let record: T = serde_json::from_str(&json)?;
            let fields = record.indexed_fields();
            if filters.iter().all(|f| f.matches(&fields)) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Delete every record of `T` whose indexed field `field` equals `value`.
    /// Returns the number of deleted rows.
    pub fn delete_by_index<T: Record>(&self, field: &str, value: IndexValue) -> StoreResult<usize> {
        let matches = self.list::<T>(&[Filter::eq(field, value)])?;
        let collection = T::collection_name();
        for record in &matches {
            self.conn.execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                rusqlite::params![collection, record.id()],
            )?;
            self.deindex_id::<T>(record.id());
        }
        Ok(matches.len())
    }

    /// Delete a single record by id.
    pub fn delete<T: Record>(&self, id: &str) -> StoreResult<bool> {
        let collection = T::collection_name();
        let changed = self.conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            rusqlite::params![collection, id],
        )?;
        if changed > 0 {
            self.deindex_id::<T>(id);
        }
        Ok(changed > 0)
    }

    /// Rebuild the in-memory index for a collection by scanning every row.
    /// Returns the number of records indexed.
    pub fn rebuild_indexes<T: Record>(&self) -> StoreResult<usize> {
        let collection = T::collection_name();
        debug!("Store::rebuild_indexes: {}", collection);
        {
            let mut indexes = self.indexes.write().expect("index lock poisoned");
            indexes.insert(collection, HashMap::new());
        }

        let mut stmt = self.conn.prepare("SELECT data FROM records WHERE collection = ?1")?;
        let rows = stmt.query_map(rusqlite::params![collection], |row| {
            let json: String = row.get(0)?;
            Ok(json)
        })?;

        let mut count = 0;
        for row in rows {
            let json = row?;
            let record: T = serde_json::from_str(&json)?;
            self.index_record(&record);
            count += 1;
        }
        Ok(count)
    }

    /// Flush pending writes. SQLite autocommits each statement here, so this
    /// is primarily a hook for callers that want an explicit durability point.
    pub fn sync(&self) -> StoreResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);").ok();
        Ok(())
    }

    /// Distinct collection names currently present (for ops tooling that
    /// has no concrete `Record` type to ask).
    pub fn raw_collections(&self) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT collection FROM records ORDER BY collection")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Ids present in a collection, without deserializing into a `Record`.
    pub fn raw_list_ids(&self, collection: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM records WHERE collection = ?1 ORDER BY id")?;
        let rows = stmt.query_map(rusqlite::params![collection], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Raw JSON for a single record, without deserializing into a `Record`.
    pub fn raw_get(&self, collection: &str, id: &str) -> StoreResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT data FROM records WHERE collection = ?1 AND id = ?2",
                rusqlite::params![collection, id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| if matches!(e, rusqlite::Error::QueryReturnedNoRows) { Ok(None) } else { Err(e.into()) })
    }

    /// Path this store was opened at (used by callers that want to colocate
    /// other artifacts, e.g. Foreman scratch directories, next to the DB).
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: String,
        status: String,
        updated_at: i64,
    }

    impl Record for Widget {
        fn id(&self) -> &str {
            &self.id
        }
        fn updated_at(&self) -> i64 {
            self.updated_at
        }
        fn collection_name() -> &'static str {
            "widgets"
        }
        fn indexed_fields(&self) -> HashMap<String, IndexValue> {
            let mut m = HashMap::new();
            m.insert("status".to_string(), IndexValue::String(self.status.clone()));
            m
        }
    }

    fn widget(id: &str, status: &str) -> Widget {
        Widget {
            id: id.to_string(),
            status: status.to_string(),
            updated_at: now_ms(),
        }
    }

    #[test]
    fn create_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.create(widget("w1", "pending")).unwrap();

        let got: Widget = store.get("w1").unwrap().unwrap();
        assert_eq!(got.status, "pending");
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.create(widget("w1", "pending")).unwrap();

        let err = store.create(widget("w1", "pending")).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn update_upserts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.create(widget("w1", "pending")).unwrap();
        store.update(widget("w1", "running")).unwrap();

        let got: Widget = store.get("w1").unwrap().unwrap();
        assert_eq!(got.status, "running");
    }

    #[test]
    fn list_filters_by_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.create(widget("w1", "pending")).unwrap();
        store.create(widget("w2", "running")).unwrap();
        store.create(widget("w3", "pending")).unwrap();

        let pending = store
            .list::<Widget>(&[Filter::eq("status", IndexValue::String("pending".into()))])
            .unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn list_without_filters_returns_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.create(widget("w1", "pending")).unwrap();
        store.create(widget("w2", "running")).unwrap();

        let all = store.list::<Widget>(&[]).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn delete_by_index_removes_matching() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.create(widget("w1", "pending")).unwrap();
        store.create(widget("w2", "pending")).unwrap();
        store.create(widget("w3", "running")).unwrap();

        let deleted = store
            .delete_by_index::<Widget>("status", IndexValue::String("pending".into()))
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.list::<Widget>(&[]).unwrap().len(), 1);
    }

    #[test]
    fn rebuild_indexes_restores_filterability() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path()).unwrap();
            store.create(widget("w1", "pending")).unwrap();
        }
        // Simulate reopening the store (fresh process): indexes start empty
        // until rebuild_indexes is called, as the daemon does on startup.
        let store = Store::open(dir.path()).unwrap();
        let count = store.rebuild_indexes::<Widget>().unwrap();
        assert_eq!(count, 1);

        let pending = store
            .list::<Widget>(&[Filter::eq("status", IndexValue::String("pending".into()))])
            .unwrap();
        assert_eq!(pending.len(), 1);
    }
}
