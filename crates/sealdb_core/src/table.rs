//! On-disk table store.
//!
//! Each table lives in a single file at `<db>/<table>.db` holding the
//! codec-encoded full row sequence. Every committed mutation rewrites
//! the whole file; there is no page-level update. At this engine's
//! scale target the rewrite is the simplest thing that preserves the
//! read-snapshot property: a reader decoding the file sees either the
//! pre-commit or post-commit row sequence, never a blend.

use crate::codec::FileCodec;
use crate::dir::DatabaseDir;
use crate::error::{DbError, DbResult};
use crate::schema::Schema;
use crate::types::{unix_millis, Row, ID_FIELD};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;

/// Returns a row's `id` field, when present and a string.
#[must_use]
pub fn row_id(row: &Row) -> Option<&str> {
    row.get(ID_FIELD).and_then(serde_json::Value::as_str)
}

/// The payload persisted for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableFile {
    /// Table name.
    pub name: String,
    /// Declared schema, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    /// The full row sequence, in insertion order.
    pub rows: Vec<Row>,
    /// Creation timestamp (ms since epoch).
    pub created_at: u64,
    /// Monotonic version, bumped on every committed mutation.
    pub version: u64,
    /// Last mutation timestamp (ms since epoch).
    pub last_modified: u64,
}

impl TableFile {
    /// Creates an empty table.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: Option<Schema>) -> Self {
        let now = unix_millis();
        Self {
            name: name.into(),
            schema,
            rows: Vec::new(),
            created_at: now,
            version: 0,
            last_modified: now,
        }
    }

    /// Finds a row by id.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Row> {
        self.rows.iter().find(|row| row_id(row) == Some(id))
    }

    /// Returns the position of a row by id.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.rows.iter().position(|row| row_id(row) == Some(id))
    }

    /// Bumps the version and last-modified stamp after a mutation.
    pub fn touch(&mut self) {
        self.version += 1;
        self.last_modified = unix_millis();
    }
}

/// Loads and persists table files through the codec.
///
/// The store is stateless on purpose: every read decodes the file
/// fresh, which is what gives readers their consistent snapshot.
#[derive(Debug)]
pub struct TableStore {
    dir: Arc<DatabaseDir>,
    codec: Arc<FileCodec>,
}

impl TableStore {
    /// Creates a table store over a directory and codec.
    #[must_use]
    pub fn new(dir: Arc<DatabaseDir>, codec: Arc<FileCodec>) -> Self {
        Self { dir, codec }
    }

    /// Returns true when the table's file exists.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unusable table names.
    pub fn exists(&self, table: &str) -> DbResult<bool> {
        Ok(self.dir.table_path(table)?.exists())
    }

    /// Loads a table from disk.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TableNotFound`] when the file is absent, and
    /// decode errors (including [`DbError::AuthFailed`]) when it does
    /// not decode cleanly.
    pub fn load(&self, table: &str) -> DbResult<TableFile> {
        let path = self.dir.table_path(table)?;
        if !path.exists() {
            return Err(DbError::table_not_found(table));
        }
        let bytes = fs::read(&path)?;
        self.codec.decode(&bytes, &format!("table '{table}'"))
    }

    /// Persists a table atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn persist(&self, file: &TableFile) -> DbResult<()> {
        let path = self.dir.table_path(&file.name)?;
        let bytes = self.codec.encode(file)?;
        self.dir.write_atomic(&path, &bytes)
    }

    /// Removes a table's file.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails.
    pub fn remove(&self, table: &str) -> DbResult<()> {
        let path = self.dir.table_path(table)?;
        self.dir.remove_file(&path)
    }

    /// Lists all tables present on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn list(&self) -> DbResult<Vec<String>> {
        self.dir.list_tables()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{BlobCipher, MasterKey};
    use serde_json::json;
    use tempfile::tempdir;

    fn store(key: &MasterKey, path: &std::path::Path) -> TableStore {
        let dir = Arc::new(DatabaseDir::open(path, true).unwrap());
        let codec = Arc::new(FileCodec::new(BlobCipher::new(key), false));
        TableStore::new(dir, codec)
    }

    fn sample_row(id: &str, name: &str) -> Row {
        let mut row = Row::new();
        row.insert("id".to_string(), json!(id));
        row.insert("name".to_string(), json!(name));
        row
    }

    #[test]
    fn persist_and_load_roundtrip() {
        let temp = tempdir().unwrap();
        let key = MasterKey::generate();
        let store = store(&key, &temp.path().join("db"));

        let mut file = TableFile::new("users", None);
        file.rows.push(sample_row("a1", "Alice"));
        store.persist(&file).unwrap();

        let loaded = store.load("users").unwrap();
        assert_eq!(loaded.name, "users");
        assert_eq!(loaded.rows.len(), 1);
        assert_eq!(row_id(&loaded.rows[0]), Some("a1"));
    }

    #[test]
    fn load_missing_table_fails() {
        let temp = tempdir().unwrap();
        let key = MasterKey::generate();
        let store = store(&key, &temp.path().join("db"));

        assert!(matches!(
            store.load("ghost"),
            Err(DbError::TableNotFound { .. })
        ));
    }

    #[test]
    fn touch_bumps_version() {
        let mut file = TableFile::new("t", None);
        assert_eq!(file.version, 0);
        file.touch();
        file.touch();
        assert_eq!(file.version, 2);
    }

    #[test]
    fn find_and_position() {
        let mut file = TableFile::new("t", None);
        file.rows.push(sample_row("a", "first"));
        file.rows.push(sample_row("b", "second"));

        assert_eq!(file.position("b"), Some(1));
        assert_eq!(file.find("a").unwrap()["name"], json!("first"));
        assert!(file.find("zzz").is_none());
    }

    #[test]
    fn remove_deletes_file() {
        let temp = tempdir().unwrap();
        let key = MasterKey::generate();
        let store = store(&key, &temp.path().join("db"));

        store.persist(&TableFile::new("gone", None)).unwrap();
        assert!(store.exists("gone").unwrap());
        store.remove("gone").unwrap();
        assert!(!store.exists("gone").unwrap());
    }

    #[test]
    fn schema_survives_roundtrip() {
        let temp = tempdir().unwrap();
        let key = MasterKey::generate();
        let store = store(&key, &temp.path().join("db"));

        let schema = Schema::object(&["email"]);
        store
            .persist(&TableFile::new("users", Some(schema.clone())))
            .unwrap();

        let loaded = store.load("users").unwrap();
        assert_eq!(loaded.schema, Some(schema));
    }
}
