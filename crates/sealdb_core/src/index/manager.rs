//! Index manager: creation, maintenance, persistence, lookup planning.

use crate::codec::FileCodec;
use crate::dir::DatabaseDir;
use crate::error::{DbError, DbResult};
use crate::index::{composite_key, Bucket, IndexDefinition, IndexKind};
use crate::table::row_id;
use crate::types::{RecordId, Row};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::Arc;

/// Persisted payload for one index file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexFile {
    definition: IndexDefinition,
    entries: BTreeMap<String, Bucket>,
}

/// Key-to-bucket storage, behaviorally identical for equality; only
/// the btree variant defines scan order.
#[derive(Debug)]
enum Buckets {
    BTree(BTreeMap<String, Bucket>),
    Hash(HashMap<String, Bucket>),
}

impl Buckets {
    fn new(kind: IndexKind) -> Self {
        match kind {
            IndexKind::BTree => Self::BTree(BTreeMap::new()),
            IndexKind::Hash => Self::Hash(HashMap::new()),
        }
    }

    fn from_entries(kind: IndexKind, entries: BTreeMap<String, Bucket>) -> Self {
        match kind {
            IndexKind::BTree => Self::BTree(entries),
            IndexKind::Hash => Self::Hash(entries.into_iter().collect()),
        }
    }

    fn get(&self, key: &str) -> Option<&Bucket> {
        match self {
            Self::BTree(map) => map.get(key),
            Self::Hash(map) => map.get(key),
        }
    }

    fn insert_id(&mut self, key: String, id: RecordId) {
        let bucket = match self {
            Self::BTree(map) => map.entry(key).or_default(),
            Self::Hash(map) => map.entry(key).or_default(),
        };
        if !bucket.contains(&id) {
            bucket.push(id);
        }
    }

    fn remove_id(&mut self, key: &str, id: &RecordId) {
        let emptied = match self {
            Self::BTree(map) => {
                if let Some(bucket) = map.get_mut(key) {
                    bucket.retain(|existing| existing != id);
                    bucket.is_empty()
                } else {
                    false
                }
            }
            Self::Hash(map) => {
                if let Some(bucket) = map.get_mut(key) {
                    bucket.retain(|existing| existing != id);
                    bucket.is_empty()
                } else {
                    false
                }
            }
        };
        if emptied {
            match self {
                Self::BTree(map) => {
                    map.remove(key);
                }
                Self::Hash(map) => {
                    map.remove(key);
                }
            }
        }
    }

    fn clear(&mut self) {
        match self {
            Self::BTree(map) => map.clear(),
            Self::Hash(map) => map.clear(),
        }
    }

    /// Entries in persisted form; sorted regardless of variant so
    /// index files are deterministic.
    fn to_entries(&self) -> BTreeMap<String, Bucket> {
        match self {
            Self::BTree(map) => map.clone(),
            Self::Hash(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    /// Keys in scan order. Defined (ascending) only for the btree
    /// variant; hash scan order is whatever the map yields.
    fn scan_keys(&self) -> Vec<String> {
        match self {
            Self::BTree(map) => map.keys().cloned().collect(),
            Self::Hash(map) => map.keys().cloned().collect(),
        }
    }
}

#[derive(Debug)]
struct IndexState {
    def: IndexDefinition,
    buckets: Buckets,
}

/// Manages all secondary indexes of a database.
///
/// Indexes are held in creation order; that order is the tie-break
/// when several indexes could serve the same lookup.
#[derive(Debug)]
pub struct IndexManager {
    dir: Arc<DatabaseDir>,
    codec: Arc<FileCodec>,
    indexes: RwLock<Vec<IndexState>>,
}

impl IndexManager {
    /// Creates an empty index manager.
    #[must_use]
    pub fn new(dir: Arc<DatabaseDir>, codec: Arc<FileCodec>) -> Self {
        Self {
            dir,
            codec,
            indexes: RwLock::new(Vec::new()),
        }
    }

    /// Loads every persisted index file from `indexes/`.
    ///
    /// Called once during open, before the engine becomes ready.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but does not decode cleanly.
    pub fn load_from_disk(&self) -> DbResult<()> {
        let mut loaded = Vec::new();
        for name in self.dir.list_indexes()? {
            let path = self.dir.index_path(&name)?;
            let bytes = fs::read(&path)?;
            let file: IndexFile = self.codec.decode(&bytes, &format!("index '{name}'"))?;
            loaded.push(IndexState {
                buckets: Buckets::from_entries(file.definition.kind, file.entries),
                def: file.definition,
            });
        }
        // Directory listing is name-sorted; restore creation order
        loaded.sort_by_key(|state| state.def.created_at);
        *self.indexes.write() = loaded;
        Ok(())
    }

    /// Creates a new index and builds it from the table's current rows.
    ///
    /// # Errors
    ///
    /// Returns a state error if the name is taken, and
    /// [`DbError::UniqueViolation`] if existing data already violates a
    /// requested uniqueness constraint (the index is not created).
    pub fn create(&self, def: IndexDefinition, rows: &[Row]) -> DbResult<()> {
        let mut indexes = self.indexes.write();
        if indexes.iter().any(|state| state.def.name == def.name) {
            return Err(DbError::state(format!(
                "index '{}' already exists",
                def.name
            )));
        }

        let mut buckets = Buckets::new(def.kind);
        for row in rows {
            let Some(id) = row_id(row) else { continue };
            let key = composite_key(row, &def.columns);
            if def.unique {
                if let Some(existing) = buckets.get(&key) {
                    if !existing.is_empty() {
                        return Err(DbError::UniqueViolation {
                            index: def.name.clone(),
                            key,
                        });
                    }
                }
            }
            buckets.insert_id(key, RecordId::from(id));
        }

        let state = IndexState { def, buckets };
        self.persist(&state)?;
        indexes.push(state);
        Ok(())
    }

    /// Drops an index and deletes its file.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IndexNotFound`] when no such index exists.
    pub fn drop_index(&self, name: &str) -> DbResult<()> {
        let mut indexes = self.indexes.write();
        let pos = indexes
            .iter()
            .position(|state| state.def.name == name)
            .ok_or_else(|| DbError::IndexNotFound {
                name: name.to_string(),
            })?;
        indexes.remove(pos);
        drop(indexes);

        let path = self.dir.index_path(name)?;
        self.dir.remove_file(&path)
    }

    /// Drops every index owned by a table (table deletion).
    ///
    /// # Errors
    ///
    /// Returns an error if a file removal fails.
    pub fn drop_for_table(&self, table: &str) -> DbResult<()> {
        let removed: Vec<IndexState> = {
            let mut indexes = self.indexes.write();
            let mut kept = Vec::new();
            let mut dropped = Vec::new();
            for state in indexes.drain(..) {
                if state.def.table == table {
                    dropped.push(state);
                } else {
                    kept.push(state);
                }
            }
            *indexes = kept;
            dropped
        };
        for state in removed {
            let path = self.dir.index_path(&state.def.name)?;
            self.dir.remove_file(&path)?;
        }
        Ok(())
    }

    /// Returns all index definitions, in creation order.
    #[must_use]
    pub fn definitions(&self) -> Vec<IndexDefinition> {
        self.indexes.read().iter().map(|s| s.def.clone()).collect()
    }

    /// Checks whether inserting `row` would violate a unique index.
    ///
    /// Lets the commit path reject a duplicate before the table file
    /// is rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UniqueViolation`] on a duplicate key.
    pub fn check_insert(&self, table: &str, row: &Row) -> DbResult<()> {
        let Some(id) = row_id(row).map(RecordId::from) else {
            return Ok(());
        };
        let indexes = self.indexes.read();
        for state in indexes.iter().filter(|s| s.def.table == table && s.def.unique) {
            let key = composite_key(row, &state.def.columns);
            if let Some(bucket) = state.buckets.get(&key) {
                if bucket.iter().any(|existing| existing != &id) {
                    return Err(DbError::UniqueViolation {
                        index: state.def.name.clone(),
                        key,
                    });
                }
            }
        }
        Ok(())
    }

    /// Checks whether updating `old_row` to `new_row` would violate a
    /// unique index. Indexes whose key does not change are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UniqueViolation`] on a duplicate key.
    pub fn check_update(&self, table: &str, old_row: &Row, new_row: &Row) -> DbResult<()> {
        let Some(id) = row_id(new_row).map(RecordId::from) else {
            return Ok(());
        };
        let indexes = self.indexes.read();
        for state in indexes.iter().filter(|s| s.def.table == table && s.def.unique) {
            let old_key = composite_key(old_row, &state.def.columns);
            let new_key = composite_key(new_row, &state.def.columns);
            if old_key == new_key {
                continue;
            }
            if let Some(bucket) = state.buckets.get(&new_key) {
                if bucket.iter().any(|existing| existing != &id) {
                    return Err(DbError::UniqueViolation {
                        index: state.def.name.clone(),
                        key: new_key,
                    });
                }
            }
        }
        Ok(())
    }

    /// Records a freshly inserted row in every index of its table.
    ///
    /// Uniqueness is checked across all affected indexes before any of
    /// them is mutated, so a violation leaves the indexes untouched.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UniqueViolation`] on a duplicate key.
    pub fn note_insert(&self, table: &str, row: &Row) -> DbResult<()> {
        let Some(id) = row_id(row).map(RecordId::from) else {
            return Ok(());
        };
        let mut indexes = self.indexes.write();

        for state in indexes.iter().filter(|s| s.def.table == table) {
            if !state.def.unique {
                continue;
            }
            let key = composite_key(row, &state.def.columns);
            if let Some(bucket) = state.buckets.get(&key) {
                if bucket.iter().any(|existing| existing != &id) {
                    return Err(DbError::UniqueViolation {
                        index: state.def.name.clone(),
                        key,
                    });
                }
            }
        }

        let mut touched = Vec::new();
        for (pos, state) in indexes.iter_mut().enumerate() {
            if state.def.table != table {
                continue;
            }
            let key = composite_key(row, &state.def.columns);
            state.buckets.insert_id(key, id.clone());
            touched.push(pos);
        }
        self.persist_touched(&indexes, &touched)
    }

    /// Moves an updated row between buckets where its keys changed.
    ///
    /// Indexes whose columns did not change are not touched.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UniqueViolation`] when the new key collides.
    pub fn note_update(&self, table: &str, old_row: &Row, new_row: &Row) -> DbResult<()> {
        let Some(id) = row_id(new_row).map(RecordId::from) else {
            return Ok(());
        };
        let mut indexes = self.indexes.write();

        // Plan first so a violation mutates nothing
        let mut moves: Vec<(usize, String, String)> = Vec::new();
        for (pos, state) in indexes.iter().enumerate() {
            if state.def.table != table {
                continue;
            }
            let old_key = composite_key(old_row, &state.def.columns);
            let new_key = composite_key(new_row, &state.def.columns);
            if old_key == new_key {
                continue;
            }
            if state.def.unique {
                if let Some(bucket) = state.buckets.get(&new_key) {
                    if bucket.iter().any(|existing| existing != &id) {
                        return Err(DbError::UniqueViolation {
                            index: state.def.name.clone(),
                            key: new_key,
                        });
                    }
                }
            }
            moves.push((pos, old_key, new_key));
        }

        let mut touched = Vec::new();
        for (pos, old_key, new_key) in moves {
            let state = &mut indexes[pos];
            state.buckets.remove_id(&old_key, &id);
            state.buckets.insert_id(new_key, id.clone());
            touched.push(pos);
        }
        self.persist_touched(&indexes, &touched)
    }

    /// Removes a deleted row from every index of its table.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting an index file fails.
    pub fn note_delete(&self, table: &str, row: &Row) -> DbResult<()> {
        let Some(id) = row_id(row).map(RecordId::from) else {
            return Ok(());
        };
        let mut indexes = self.indexes.write();
        let mut touched = Vec::new();
        for (pos, state) in indexes.iter_mut().enumerate() {
            if state.def.table != table {
                continue;
            }
            let key = composite_key(row, &state.def.columns);
            state.buckets.remove_id(&key, &id);
            touched.push(pos);
        }
        self.persist_touched(&indexes, &touched)
    }

    /// Rebuilds every index of a table from a full row sequence.
    ///
    /// Used when a whole-table write replaces the row sequence (WAL
    /// replay, transaction `Write` operations).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UniqueViolation`] if the new rows violate a
    /// uniqueness constraint.
    pub fn rebuild_table(&self, table: &str, rows: &[Row]) -> DbResult<()> {
        let mut indexes = self.indexes.write();
        let mut touched = Vec::new();
        for (pos, state) in indexes.iter_mut().enumerate() {
            if state.def.table != table {
                continue;
            }
            state.buckets.clear();
            for row in rows {
                let Some(id) = row_id(row) else { continue };
                let key = composite_key(row, &state.def.columns);
                if state.def.unique {
                    if let Some(bucket) = state.buckets.get(&key) {
                        if !bucket.is_empty() {
                            return Err(DbError::UniqueViolation {
                                index: state.def.name.clone(),
                                key,
                            });
                        }
                    }
                }
                state.buckets.insert_id(key, RecordId::from(id));
            }
            touched.push(pos);
        }
        self.persist_touched(&indexes, &touched)
    }

    /// Picks the index to serve an equality lookup on `table`.
    ///
    /// An index qualifies when every one of its columns appears in
    /// `eq_columns`; among qualifiers the earliest-created wins.
    #[must_use]
    pub fn select_for(&self, table: &str, eq_columns: &[&str]) -> Option<IndexDefinition> {
        self.indexes
            .read()
            .iter()
            .find(|state| {
                state.def.table == table
                    && state
                        .def
                        .columns
                        .iter()
                        .all(|col| eq_columns.contains(&col.as_str()))
            })
            .map(|state| state.def.clone())
    }

    /// Returns the ids stored under a key, in insertion order.
    #[must_use]
    pub fn lookup(&self, name: &str, key: &str) -> Vec<RecordId> {
        self.indexes
            .read()
            .iter()
            .find(|state| state.def.name == name)
            .and_then(|state| state.buckets.get(key).cloned())
            .unwrap_or_default()
    }

    /// Returns an index's keys in scan order.
    ///
    /// Ascending for `btree` indexes; unspecified for `hash`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IndexNotFound`] when no such index exists.
    pub fn scan_keys(&self, name: &str) -> DbResult<Vec<String>> {
        let indexes = self.indexes.read();
        let state = indexes
            .iter()
            .find(|state| state.def.name == name)
            .ok_or_else(|| DbError::IndexNotFound {
                name: name.to_string(),
            })?;
        Ok(state.buckets.scan_keys())
    }

    fn persist(&self, state: &IndexState) -> DbResult<()> {
        let file = IndexFile {
            definition: state.def.clone(),
            entries: state.buckets.to_entries(),
        };
        let bytes = self.codec.encode(&file)?;
        let path = self.dir.index_path(&state.def.name)?;
        self.dir.write_atomic(&path, &bytes)
    }

    fn persist_touched(&self, indexes: &[IndexState], touched: &[usize]) -> DbResult<()> {
        for &pos in touched {
            self.persist(&indexes[pos])?;
        }
        Ok(())
    }
}
