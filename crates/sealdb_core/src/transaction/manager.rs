//! Transaction manager: staging, locking, commit, rollback.

use crate::error::{DbError, DbResult};
use crate::events::{Event, EventBus, EventKind};
use crate::index::IndexManager;
use crate::lock::LockManager;
use crate::schema::Schema;
use crate::table::{row_id, TableFile, TableStore};
use crate::transaction::state::{Transaction, TxnOperation};
use crate::types::{IsolationLevel, RecordId, Row, TransactionId, ID_FIELD};
use crate::wal::{Operation, WalManager};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A transaction's view of one table: the committed state plus its own
/// buffered operations, in order.
enum TableView {
    Missing,
    Present {
        schema: Option<Schema>,
        rows: Vec<Row>,
    },
}

/// Coordinates transactions with the WAL, table store, and indexes.
///
/// Active transactions live in an arena keyed by id; everything refers
/// to them by id, never by reference. Commit applies the buffered
/// operations in order (for each one: WAL intent, table rewrite,
/// index update, event), then releases every held lock. Any failure
/// mid-commit rolls the transaction back and propagates.
pub struct TransactionManager {
    tables: Arc<TableStore>,
    indexes: Arc<IndexManager>,
    locks: Arc<LockManager>,
    events: Arc<EventBus>,
    wal: Option<Arc<WalManager>>,
    lock_timeout: Duration,
    active: RwLock<HashMap<TransactionId, Transaction>>,
}

impl TransactionManager {
    /// Creates a transaction manager.
    #[must_use]
    pub fn new(
        tables: Arc<TableStore>,
        indexes: Arc<IndexManager>,
        locks: Arc<LockManager>,
        events: Arc<EventBus>,
        wal: Option<Arc<WalManager>>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            tables,
            indexes,
            locks,
            events,
            wal,
            lock_timeout,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a transaction and returns its id.
    pub fn begin(&self, isolation: IsolationLevel) -> TransactionId {
        let txn = Transaction::new(isolation);
        let id = txn.id();
        self.active.write().insert(id, txn);
        id
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Stages an insert. Assigns a fresh id when the row lacks one and
    /// returns it.
    ///
    /// # Errors
    ///
    /// Fails when the transaction or table is missing, the lock times
    /// out, the row violates the schema, or its id duplicates an
    /// existing row.
    pub fn stage_add(&self, txn_id: TransactionId, table: &str, mut row: Row) -> DbResult<RecordId> {
        self.lock_table(txn_id, table)?;

        let id = match row.get(ID_FIELD) {
            None => {
                let id = RecordId::generate();
                row.insert(ID_FIELD.to_string(), Value::String(id.as_str().to_string()));
                id
            }
            Some(Value::String(s)) => RecordId::from(s.as_str()),
            Some(_) => return Err(DbError::validation("record id must be a string")),
        };

        let arena = self.active.read();
        let txn = arena
            .get(&txn_id)
            .ok_or_else(|| DbError::TransactionNotFound {
                id: txn_id.to_string(),
            })?;
        let view = self.effective_view(txn, table)?;
        let TableView::Present { schema, rows } = view else {
            return Err(DbError::table_not_found(table));
        };

        if let Some(schema) = &schema {
            schema.validate(&Value::Object(row.clone()))?;
        }
        if rows.iter().any(|existing| row_id(existing) == Some(id.as_str())) {
            return Err(DbError::validation(format!(
                "table '{table}' already holds a record with id '{id}'"
            )));
        }
        drop(arena);

        self.buffer(txn_id, TxnOperation::Add {
            table: table.to_string(),
            row,
        })?;
        Ok(id)
    }

    /// Stages an update. The supplied fields merge into the existing
    /// record (the id is preserved); returns the merged row.
    ///
    /// # Errors
    ///
    /// Fails when the transaction, table, or record is missing, the
    /// lock times out, or the merged row violates the schema.
    pub fn stage_update(
        &self,
        txn_id: TransactionId,
        table: &str,
        id: &str,
        changes: Row,
    ) -> DbResult<Row> {
        self.lock_table(txn_id, table)?;

        let arena = self.active.read();
        let txn = arena
            .get(&txn_id)
            .ok_or_else(|| DbError::TransactionNotFound {
                id: txn_id.to_string(),
            })?;
        let TableView::Present { schema, rows } = self.effective_view(txn, table)? else {
            return Err(DbError::table_not_found(table));
        };
        let old_row = rows
            .iter()
            .find(|row| row_id(row) == Some(id))
            .cloned()
            .ok_or_else(|| DbError::record_not_found(table, id))?;

        let mut new_row = old_row.clone();
        for (field, value) in changes {
            if field == ID_FIELD {
                continue;
            }
            new_row.insert(field, value);
        }
        if let Some(schema) = &schema {
            schema.validate(&Value::Object(new_row.clone()))?;
        }
        drop(arena);

        self.buffer(txn_id, TxnOperation::Update {
            table: table.to_string(),
            id: RecordId::from(id),
            new_row: new_row.clone(),
            old_row,
        })?;
        Ok(new_row)
    }

    /// Stages a delete; returns the row as it was.
    ///
    /// # Errors
    ///
    /// Fails when the transaction, table, or record is missing, or the
    /// lock times out.
    pub fn stage_delete(&self, txn_id: TransactionId, table: &str, id: &str) -> DbResult<Row> {
        self.lock_table(txn_id, table)?;

        let arena = self.active.read();
        let txn = arena
            .get(&txn_id)
            .ok_or_else(|| DbError::TransactionNotFound {
                id: txn_id.to_string(),
            })?;
        let TableView::Present { rows, .. } = self.effective_view(txn, table)? else {
            return Err(DbError::table_not_found(table));
        };
        let old_row = rows
            .iter()
            .find(|row| row_id(row) == Some(id))
            .cloned()
            .ok_or_else(|| DbError::record_not_found(table, id))?;
        drop(arena);

        self.buffer(txn_id, TxnOperation::Delete {
            table: table.to_string(),
            id: RecordId::from(id),
            old_row: old_row.clone(),
        })?;
        Ok(old_row)
    }

    /// Stages a table creation.
    ///
    /// # Errors
    ///
    /// Fails when the table already exists or the lock times out.
    pub fn stage_create_table(
        &self,
        txn_id: TransactionId,
        table: &str,
        schema: Option<Schema>,
    ) -> DbResult<()> {
        self.lock_table(txn_id, table)?;

        let arena = self.active.read();
        let txn = arena
            .get(&txn_id)
            .ok_or_else(|| DbError::TransactionNotFound {
                id: txn_id.to_string(),
            })?;
        if !matches!(self.effective_view(txn, table)?, TableView::Missing) {
            return Err(DbError::state(format!("table '{table}' already exists")));
        }
        drop(arena);

        self.buffer(txn_id, TxnOperation::CreateTable {
            table: table.to_string(),
            schema,
        })
    }

    /// Stages a table deletion.
    ///
    /// # Errors
    ///
    /// Fails when the table does not exist or the lock times out.
    pub fn stage_delete_table(&self, txn_id: TransactionId, table: &str) -> DbResult<()> {
        self.lock_table(txn_id, table)?;

        let arena = self.active.read();
        let txn = arena
            .get(&txn_id)
            .ok_or_else(|| DbError::TransactionNotFound {
                id: txn_id.to_string(),
            })?;
        if matches!(self.effective_view(txn, table)?, TableView::Missing) {
            return Err(DbError::table_not_found(table));
        }
        drop(arena);

        self.buffer(txn_id, TxnOperation::DeleteTable {
            table: table.to_string(),
        })
    }

    /// Stages a whole-table write replacing the full row sequence.
    /// Rows without an id are assigned one.
    ///
    /// # Errors
    ///
    /// Fails when the lock times out or a row violates the schema.
    pub fn stage_write(
        &self,
        txn_id: TransactionId,
        table: &str,
        mut rows: Vec<Row>,
    ) -> DbResult<()> {
        self.lock_table(txn_id, table)?;

        for row in &mut rows {
            if row.get(ID_FIELD).is_none() {
                let id = RecordId::generate();
                row.insert(ID_FIELD.to_string(), Value::String(id.as_str().to_string()));
            }
        }

        let arena = self.active.read();
        let txn = arena
            .get(&txn_id)
            .ok_or_else(|| DbError::TransactionNotFound {
                id: txn_id.to_string(),
            })?;
        if let TableView::Present {
            schema: Some(schema),
            ..
        } = self.effective_view(txn, table)?
        {
            for row in &rows {
                schema.validate(&Value::Object(row.clone()))?;
            }
        }
        drop(arena);

        self.buffer(txn_id, TxnOperation::Write {
            table: table.to_string(),
            rows,
        })
    }

    /// Commits a transaction: applies every buffered operation in
    /// order, releases all held locks, and emits the commit event.
    ///
    /// On any failure the transaction is rolled back and the error
    /// propagated.
    ///
    /// # Errors
    ///
    /// Fails when the transaction is unknown or an operation cannot be
    /// applied.
    pub fn commit(&self, txn_id: TransactionId) -> DbResult<()> {
        let mut txn = self
            .active
            .write()
            .remove(&txn_id)
            .ok_or_else(|| DbError::TransactionNotFound {
                id: txn_id.to_string(),
            })?;

        let result = self.apply_all(&txn);
        self.locks
            .release_all(txn.locks().iter().map(String::as_str), txn.id());

        match result {
            Ok(()) => {
                txn.mark_committed();
                tracing::debug!(txn = %txn_id, ops = txn.operations().len(), "transaction committed");
                self.events.emit(&Event::new(
                    EventKind::CommitTransaction,
                    None,
                    Some(Value::String(txn_id.to_string())),
                ));
                Ok(())
            }
            Err(e) => {
                txn.mark_rolled_back();
                tracing::debug!(txn = %txn_id, error = %e, "commit failed, rolled back");
                self.events.emit(&Event::new(
                    EventKind::RollbackTransaction,
                    None,
                    Some(Value::String(txn_id.to_string())),
                ));
                Err(e)
            }
        }
    }

    /// Rolls back a transaction: releases its locks and discards the
    /// buffer. Effects are only ever applied at commit, so this is a
    /// pure in-memory drop.
    ///
    /// # Errors
    ///
    /// Fails when the transaction is unknown.
    pub fn rollback(&self, txn_id: TransactionId) -> DbResult<()> {
        let mut txn = self
            .active
            .write()
            .remove(&txn_id)
            .ok_or_else(|| DbError::TransactionNotFound {
                id: txn_id.to_string(),
            })?;

        self.locks
            .release_all(txn.locks().iter().map(String::as_str), txn.id());
        txn.mark_rolled_back();
        self.events.emit(&Event::new(
            EventKind::RollbackTransaction,
            None,
            Some(Value::String(txn_id.to_string())),
        ));
        Ok(())
    }

    /// Acquires the table lock for a transaction and records it.
    fn lock_table(&self, txn_id: TransactionId, table: &str) -> DbResult<()> {
        {
            let arena = self.active.read();
            if !arena.contains_key(&txn_id) {
                return Err(DbError::TransactionNotFound {
                    id: txn_id.to_string(),
                });
            }
        }
        // The arena lock is dropped before blocking on the table lock
        self.locks.acquire(table, txn_id, self.lock_timeout)?;

        let mut arena = self.active.write();
        match arena.get_mut(&txn_id) {
            Some(txn) => {
                txn.add_lock(table);
                Ok(())
            }
            None => {
                // Rolled back while we waited; give the lock straight back
                self.locks.release(table, txn_id);
                Err(DbError::TransactionNotFound {
                    id: txn_id.to_string(),
                })
            }
        }
    }

    fn buffer(&self, txn_id: TransactionId, op: TxnOperation) -> DbResult<()> {
        let mut arena = self.active.write();
        let txn = arena
            .get_mut(&txn_id)
            .ok_or_else(|| DbError::TransactionNotFound {
                id: txn_id.to_string(),
            })?;
        txn.buffer(op);
        Ok(())
    }

    /// Computes a transaction's view of a table: the committed state
    /// with the transaction's own buffered operations replayed on top.
    fn effective_view(&self, txn: &Transaction, table: &str) -> DbResult<TableView> {
        let mut view = match self.tables.load(table) {
            Ok(file) => TableView::Present {
                schema: file.schema,
                rows: file.rows,
            },
            Err(DbError::TableNotFound { .. }) => TableView::Missing,
            Err(e) => return Err(e),
        };

        for op in txn.operations().iter().filter(|op| op.table() == table) {
            match op {
                TxnOperation::CreateTable { schema, .. } => {
                    view = TableView::Present {
                        schema: schema.clone(),
                        rows: Vec::new(),
                    };
                }
                TxnOperation::DeleteTable { .. } => view = TableView::Missing,
                TxnOperation::Add { row, .. } => {
                    if let TableView::Present { rows, .. } = &mut view {
                        rows.push(row.clone());
                    }
                }
                TxnOperation::Update { id, new_row, .. } => {
                    if let TableView::Present { rows, .. } = &mut view {
                        if let Some(pos) =
                            rows.iter().position(|row| row_id(row) == Some(id.as_str()))
                        {
                            rows[pos] = new_row.clone();
                        }
                    }
                }
                TxnOperation::Delete { id, .. } => {
                    if let TableView::Present { rows, .. } = &mut view {
                        rows.retain(|row| row_id(row) != Some(id.as_str()));
                    }
                }
                TxnOperation::Write { rows: new_rows, .. } => {
                    if let TableView::Present { rows, .. } = &mut view {
                        *rows = new_rows.clone();
                    } else {
                        view = TableView::Present {
                            schema: None,
                            rows: new_rows.clone(),
                        };
                    }
                }
            }
        }
        Ok(view)
    }

    fn apply_all(&self, txn: &Transaction) -> DbResult<()> {
        for op in txn.operations() {
            self.apply_one(op)?;
        }
        Ok(())
    }

    /// Applies one operation: WAL intent, table rewrite, index update,
    /// event, in that order.
    fn apply_one(&self, op: &TxnOperation) -> DbResult<()> {
        match op {
            TxnOperation::CreateTable { table, schema } => {
                if self.tables.exists(table)? {
                    return Err(DbError::state(format!("table '{table}' already exists")));
                }
                self.wal_append(Operation::CreateTable {
                    table: table.clone(),
                    schema: schema.clone(),
                })?;
                self.tables.persist(&TableFile::new(table.clone(), schema.clone()))?;
                self.events.emit(&Event::new(
                    EventKind::CreateTable,
                    Some(table.clone()),
                    schema.as_ref().and_then(|s| serde_json::to_value(s).ok()),
                ));
            }

            TxnOperation::DeleteTable { table } => {
                self.wal_append(Operation::DeleteTable {
                    table: table.clone(),
                })?;
                self.tables.remove(table)?;
                self.indexes.drop_for_table(table)?;
                self.events.emit(&Event::new(
                    EventKind::DeleteTable,
                    Some(table.clone()),
                    None,
                ));
            }

            TxnOperation::Add { table, row } => {
                let mut file = self.tables.load(table)?;
                if let Some(schema) = &file.schema {
                    schema.validate(&Value::Object(row.clone()))?;
                }
                if let Some(id) = row_id(row) {
                    if file.find(id).is_some() {
                        return Err(DbError::validation(format!(
                            "table '{table}' already holds a record with id '{id}'"
                        )));
                    }
                }
                self.indexes.check_insert(table, row)?;

                file.rows.push(row.clone());
                file.touch();
                self.wal_append(Operation::Write {
                    table: table.clone(),
                    rows: file.rows.clone(),
                })?;
                self.tables.persist(&file)?;
                self.indexes.note_insert(table, row)?;
                self.events.emit(&Event::new(
                    EventKind::Add,
                    Some(table.clone()),
                    Some(Value::Object(row.clone())),
                ));
            }

            TxnOperation::Update {
                table,
                id,
                new_row,
                old_row,
            } => {
                let mut file = self.tables.load(table)?;
                let pos = file
                    .position(id.as_str())
                    .ok_or_else(|| DbError::record_not_found(table, id.as_str()))?;
                if let Some(schema) = &file.schema {
                    schema.validate(&Value::Object(new_row.clone()))?;
                }
                self.indexes.check_update(table, old_row, new_row)?;

                file.rows[pos] = new_row.clone();
                file.touch();
                self.wal_append(Operation::Write {
                    table: table.clone(),
                    rows: file.rows.clone(),
                })?;
                self.tables.persist(&file)?;
                self.indexes.note_update(table, old_row, new_row)?;
                self.events.emit(&Event::new(
                    EventKind::Update,
                    Some(table.clone()),
                    Some(Value::Object(new_row.clone())),
                ));
            }

            TxnOperation::Delete { table, id, old_row } => {
                let mut file = self.tables.load(table)?;
                let pos = file
                    .position(id.as_str())
                    .ok_or_else(|| DbError::record_not_found(table, id.as_str()))?;

                file.rows.remove(pos);
                file.touch();
                self.wal_append(Operation::Write {
                    table: table.clone(),
                    rows: file.rows.clone(),
                })?;
                self.tables.persist(&file)?;
                self.indexes.note_delete(table, old_row)?;
                self.events.emit(&Event::new(
                    EventKind::Delete,
                    Some(table.clone()),
                    Some(Value::Object(old_row.clone())),
                ));
            }

            TxnOperation::Write { table, rows } => {
                let mut file = match self.tables.load(table) {
                    Ok(file) => file,
                    Err(DbError::TableNotFound { .. }) => TableFile::new(table.clone(), None),
                    Err(e) => return Err(e),
                };
                if let Some(schema) = &file.schema {
                    for row in rows {
                        schema.validate(&Value::Object(row.clone()))?;
                    }
                }
                self.wal_append(Operation::Write {
                    table: table.clone(),
                    rows: rows.clone(),
                })?;
                file.rows = rows.clone();
                file.touch();
                self.tables.persist(&file)?;
                self.indexes.rebuild_table(table, rows)?;
            }
        }
        Ok(())
    }

    fn wal_append(&self, op: Operation) -> DbResult<()> {
        if let Some(wal) = &self.wal {
            wal.append(op)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.active_count())
            .field("wal", &self.wal.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FileCodec;
    use crate::crypto::{BlobCipher, MasterKey};
    use crate::dir::DatabaseDir;
    use serde_json::json;
    use tempfile::tempdir;

    fn manager(path: &std::path::Path) -> TransactionManager {
        let dir = Arc::new(DatabaseDir::open(path, true).unwrap());
        let codec = Arc::new(FileCodec::new(
            BlobCipher::new(&MasterKey::generate()),
            false,
        ));
        let tables = Arc::new(TableStore::new(Arc::clone(&dir), Arc::clone(&codec)));
        let indexes = Arc::new(IndexManager::new(dir, codec));
        TransactionManager::new(
            tables,
            indexes,
            Arc::new(LockManager::new()),
            Arc::new(EventBus::new()),
            None,
            Duration::from_millis(200),
        )
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        let mut row = Row::new();
        for (k, v) in pairs {
            row.insert((*k).to_string(), v.clone());
        }
        row
    }

    #[test]
    fn commit_applies_staged_insert() {
        let temp = tempdir().unwrap();
        let tm = manager(&temp.path().join("db"));

        let txn = tm.begin(IsolationLevel::default());
        tm.stage_create_table(txn, "users", None).unwrap();
        let id = tm
            .stage_add(txn, "users", row(&[("name", json!("Alice"))]))
            .unwrap();
        tm.commit(txn).unwrap();

        let file = tm.tables.load("users").unwrap();
        assert_eq!(file.rows.len(), 1);
        assert_eq!(row_id(&file.rows[0]), Some(id.as_str()));
        assert_eq!(file.version, 1);
    }

    #[test]
    fn rollback_discards_buffer_and_releases_locks() {
        let temp = tempdir().unwrap();
        let tm = manager(&temp.path().join("db"));

        // Committed base table
        let setup = tm.begin(IsolationLevel::default());
        tm.stage_create_table(setup, "users", None).unwrap();
        tm.commit(setup).unwrap();

        let txn = tm.begin(IsolationLevel::default());
        tm.stage_add(txn, "users", row(&[("name", json!("Rollback"))]))
            .unwrap();
        tm.rollback(txn).unwrap();

        assert!(tm.tables.load("users").unwrap().rows.is_empty());
        assert_eq!(tm.locks.owner("users"), None);
        assert_eq!(tm.active_count(), 0);
    }

    #[test]
    fn read_your_own_staged_writes() {
        let temp = tempdir().unwrap();
        let tm = manager(&temp.path().join("db"));

        let txn = tm.begin(IsolationLevel::default());
        tm.stage_create_table(txn, "users", None).unwrap();
        let id = tm
            .stage_add(txn, "users", row(&[("name", json!("Alice"))]))
            .unwrap();
        // Update the row staged moments ago, before any commit
        let merged = tm
            .stage_update(txn, "users", id.as_str(), row(&[("age", json!(30))]))
            .unwrap();
        assert_eq!(merged["name"], json!("Alice"));
        assert_eq!(merged["age"], json!(30));
        tm.commit(txn).unwrap();

        let file = tm.tables.load("users").unwrap();
        assert_eq!(file.rows[0]["age"], json!(30));
    }

    #[test]
    fn update_merges_and_preserves_id() {
        let temp = tempdir().unwrap();
        let tm = manager(&temp.path().join("db"));

        let setup = tm.begin(IsolationLevel::default());
        tm.stage_create_table(setup, "users", None).unwrap();
        let id = tm
            .stage_add(setup, "users", row(&[("name", json!("Alice")), ("age", json!(29))]))
            .unwrap();
        tm.commit(setup).unwrap();

        let txn = tm.begin(IsolationLevel::default());
        tm.stage_update(
            txn,
            "users",
            id.as_str(),
            row(&[("age", json!(30)), ("id", json!("hijack"))]),
        )
        .unwrap();
        tm.commit(txn).unwrap();

        let file = tm.tables.load("users").unwrap();
        assert_eq!(file.rows[0]["age"], json!(30));
        assert_eq!(file.rows[0]["name"], json!("Alice"));
        assert_eq!(row_id(&file.rows[0]), Some(id.as_str()));
    }

    #[test]
    fn delete_removes_row() {
        let temp = tempdir().unwrap();
        let tm = manager(&temp.path().join("db"));

        let setup = tm.begin(IsolationLevel::default());
        tm.stage_create_table(setup, "users", None).unwrap();
        let id = tm
            .stage_add(setup, "users", row(&[("name", json!("Gone"))]))
            .unwrap();
        tm.commit(setup).unwrap();

        let txn = tm.begin(IsolationLevel::default());
        let old = tm.stage_delete(txn, "users", id.as_str()).unwrap();
        assert_eq!(old["name"], json!("Gone"));
        tm.commit(txn).unwrap();

        assert!(tm.tables.load("users").unwrap().rows.is_empty());
    }

    #[test]
    fn missing_record_fails_staging() {
        let temp = tempdir().unwrap();
        let tm = manager(&temp.path().join("db"));

        let setup = tm.begin(IsolationLevel::default());
        tm.stage_create_table(setup, "users", None).unwrap();
        tm.commit(setup).unwrap();

        let txn = tm.begin(IsolationLevel::default());
        assert!(matches!(
            tm.stage_update(txn, "users", "nope", Row::new()),
            Err(DbError::RecordNotFound { .. })
        ));
        assert!(matches!(
            tm.stage_delete(txn, "users", "nope"),
            Err(DbError::RecordNotFound { .. })
        ));
        tm.rollback(txn).unwrap();
    }

    #[test]
    fn schema_violation_rejected_at_staging() {
        let temp = tempdir().unwrap();
        let tm = manager(&temp.path().join("db"));

        let setup = tm.begin(IsolationLevel::default());
        tm.stage_create_table(setup, "users", Some(Schema::object(&["email"])))
            .unwrap();
        tm.commit(setup).unwrap();

        let txn = tm.begin(IsolationLevel::default());
        let result = tm.stage_add(txn, "users", row(&[("name", json!("no email"))]));
        assert!(matches!(result, Err(DbError::Validation { .. })));
        tm.rollback(txn).unwrap();
    }

    #[test]
    fn duplicate_table_creation_fails() {
        let temp = tempdir().unwrap();
        let tm = manager(&temp.path().join("db"));

        let setup = tm.begin(IsolationLevel::default());
        tm.stage_create_table(setup, "users", None).unwrap();
        tm.commit(setup).unwrap();

        let txn = tm.begin(IsolationLevel::default());
        assert!(matches!(
            tm.stage_create_table(txn, "users", None),
            Err(DbError::State { .. })
        ));
        tm.rollback(txn).unwrap();
    }

    #[test]
    fn unknown_transaction_rejected() {
        let temp = tempdir().unwrap();
        let tm = manager(&temp.path().join("db"));
        let ghost = TransactionId::generate();

        assert!(matches!(
            tm.commit(ghost),
            Err(DbError::TransactionNotFound { .. })
        ));
        assert!(matches!(
            tm.rollback(ghost),
            Err(DbError::TransactionNotFound { .. })
        ));
        assert!(matches!(
            tm.stage_add(ghost, "users", Row::new()),
            Err(DbError::TransactionNotFound { .. })
        ));
    }

    #[test]
    fn commit_is_terminal() {
        let temp = tempdir().unwrap();
        let tm = manager(&temp.path().join("db"));

        let txn = tm.begin(IsolationLevel::default());
        tm.commit(txn).unwrap();
        // A terminal transaction cannot be resumed or re-finished
        assert!(tm.commit(txn).is_err());
        assert!(tm.rollback(txn).is_err());
    }

    #[test]
    fn locks_released_after_commit() {
        let temp = tempdir().unwrap();
        let tm = manager(&temp.path().join("db"));

        let txn = tm.begin(IsolationLevel::default());
        tm.stage_create_table(txn, "users", None).unwrap();
        assert_eq!(tm.locks.owner("users"), Some(txn));
        tm.commit(txn).unwrap();
        assert_eq!(tm.locks.owner("users"), None);
    }

    #[test]
    fn contended_staging_times_out() {
        let temp = tempdir().unwrap();
        let tm = manager(&temp.path().join("db"));

        let setup = tm.begin(IsolationLevel::default());
        tm.stage_create_table(setup, "users", None).unwrap();
        tm.commit(setup).unwrap();

        let holder = tm.begin(IsolationLevel::default());
        tm.stage_add(holder, "users", row(&[("name", json!("held"))]))
            .unwrap();

        let blocked = tm.begin(IsolationLevel::default());
        let result = tm.stage_add(blocked, "users", row(&[("name", json!("waits"))]));
        assert!(matches!(result, Err(DbError::LockTimeout { .. })));

        tm.rollback(holder).unwrap();
        tm.rollback(blocked).unwrap();
    }
}
