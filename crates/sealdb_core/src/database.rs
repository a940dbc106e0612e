//! Database facade: lifecycle, CRUD entry points, query planning,
//! checkpoint scheduling.

use crate::codec::FileCodec;
use crate::config::Config;
use crate::crypto::{BlobCipher, MasterKey};
use crate::dir::DatabaseDir;
use crate::error::{DbError, DbResult};
use crate::events::{Event, EventBus, EventKind, ListenerId};
use crate::index::{composite_key_from_values, IndexDefinition, IndexKind, IndexManager};
use crate::lock::LockManager;
use crate::query::{conjunction_equalities, join_rows, run_query, JoinSpec, QueryOptions};
use crate::schema::Schema;
use crate::table::{row_id, TableFile, TableStore};
use crate::transaction::TransactionManager;
use crate::types::{unix_millis, IsolationLevel, RecordId, Row, TransactionId};
use crate::wal::{Operation, RecoveryFailure, WalManager};
use parking_lot::{Condvar, Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use zeroize::Zeroize;

/// How long retired WAL segments are kept before checkpoint GC.
const WAL_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Initializing,
    Ready,
    Closing,
    Closed,
}

/// Row count and bookkeeping for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    /// Table name.
    pub name: String,
    /// Number of rows.
    pub rows: usize,
    /// Monotonic version.
    pub version: u64,
    /// Creation timestamp (ms since epoch).
    pub created_at: u64,
    /// Last mutation timestamp (ms since epoch).
    pub last_modified: u64,
}

#[derive(Debug, Default)]
struct CheckpointSignal {
    stop: bool,
    kick: bool,
}

struct CheckpointScheduler {
    signal: Arc<(Mutex<CheckpointSignal>, Condvar)>,
    handle: JoinHandle<()>,
}

/// The main database handle.
///
/// `Database` is the primary entry point. Opening runs WAL recovery
/// before the handle becomes ready; every operation goes through the
/// transaction manager, implicitly when no transaction id is supplied.
///
/// # Example
///
/// ```rust,ignore
/// use sealdb_core::{Config, Database, MasterKey};
///
/// let key = MasterKey::generate();
/// let db = Database::open(Path::new("my_db"), key)?;
/// db.create_table("users", None, None)?;
/// let id = db.add_data("users", row, None)?;
/// db.close();
/// ```
pub struct Database {
    config: Config,
    state: RwLock<Lifecycle>,
    master_key: Mutex<MasterKey>,
    tables: Arc<TableStore>,
    indexes: Arc<IndexManager>,
    events: Arc<EventBus>,
    wal: Option<Arc<WalManager>>,
    txns: TransactionManager,
    recovery_summary: Vec<RecoveryFailure>,
    scheduler: Mutex<Option<CheckpointScheduler>>,
}

impl Database {
    /// Opens a database with the default configuration.
    ///
    /// # Errors
    ///
    /// See [`Database::open_with_config`].
    pub fn open(path: &Path, key: MasterKey) -> DbResult<Self> {
        Self::open_with_config(path, key, Config::default())
    }

    /// Opens a database: locks the directory, loads indexes, replays
    /// the WAL, and starts the checkpoint scheduler.
    ///
    /// Recovery runs before this returns; per-entry replay failures do
    /// not fail the open and are available through
    /// [`Database::wal_recovery_summary`].
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be locked
    /// ([`DbError::DatabaseLocked`]), the salt or an index file is
    /// unreadable, or WAL key derivation fails.
    pub fn open_with_config(path: &Path, key: MasterKey, config: Config) -> DbResult<Self> {
        let state = RwLock::new(Lifecycle::Initializing);

        let dir = Arc::new(DatabaseDir::open(path, config.create_if_missing)?);
        let codec = Arc::new(if config.encrypt {
            FileCodec::new(BlobCipher::new(&key), config.compression)
        } else {
            FileCodec::cleartext(config.compression)
        });

        let tables = Arc::new(TableStore::new(Arc::clone(&dir), Arc::clone(&codec)));
        let indexes = Arc::new(IndexManager::new(Arc::clone(&dir), Arc::clone(&codec)));
        indexes.load_from_disk()?;

        let wal = if config.wal_enabled {
            Some(Arc::new(WalManager::open(
                &dir.wal_dir(),
                config.encrypt.then_some(&key),
                config.wal_padding_size,
                config.sync_writes,
                WAL_RETENTION,
            )?))
        } else {
            None
        };

        let recovery_summary = match &wal {
            Some(wal) => wal.recover(|op| apply_recovered(&tables, &indexes, op))?,
            None => Vec::new(),
        };

        let events = Arc::new(EventBus::new());
        let txns = TransactionManager::new(
            Arc::clone(&tables),
            Arc::clone(&indexes),
            Arc::new(LockManager::new()),
            Arc::clone(&events),
            wal.clone(),
            config.lock_timeout,
        );

        let db = Self {
            config,
            state,
            master_key: Mutex::new(key),
            tables,
            indexes,
            events,
            wal,
            txns,
            recovery_summary,
            scheduler: Mutex::new(None),
        };
        db.start_scheduler();
        *db.state.write() = Lifecycle::Ready;
        tracing::debug!(path = %path.display(), "database ready");
        Ok(db)
    }

    /// Blocks until the engine is ready.
    ///
    /// Initialization completes inside `open`, so this only rejects
    /// handles that are closing or closed.
    ///
    /// # Errors
    ///
    /// Returns a state error when the database is closed.
    pub fn ready(&self) -> DbResult<()> {
        match *self.state.read() {
            Lifecycle::Initializing | Lifecycle::Ready => Ok(()),
            Lifecycle::Closing | Lifecycle::Closed => {
                Err(DbError::state("database is closed"))
            }
        }
    }

    /// Creates a table, optionally with a schema.
    ///
    /// # Errors
    ///
    /// Fails when the table exists or the engine is closed.
    pub fn create_table(
        &self,
        table: &str,
        schema: Option<Schema>,
        txn: Option<TransactionId>,
    ) -> DbResult<()> {
        self.ready()?;
        self.run(txn, |txn_id| {
            self.txns.stage_create_table(txn_id, table, schema.clone())
        })
    }

    /// Deletes a table, its file, and its indexes.
    ///
    /// # Errors
    ///
    /// Fails when the table does not exist or the engine is closed.
    pub fn delete_table(&self, table: &str, txn: Option<TransactionId>) -> DbResult<()> {
        self.ready()?;
        self.run(txn, |txn_id| self.txns.stage_delete_table(txn_id, table))
    }

    /// Inserts a record, assigning an id when absent; returns the id.
    ///
    /// # Errors
    ///
    /// Fails on schema violations, duplicate ids or unique keys, lock
    /// timeouts, or a missing table.
    pub fn add_data(
        &self,
        table: &str,
        row: Row,
        txn: Option<TransactionId>,
    ) -> DbResult<RecordId> {
        self.ready()?;
        self.run(txn, |txn_id| self.txns.stage_add(txn_id, table, row.clone()))
    }

    /// Merges fields into an existing record; returns the merged row.
    ///
    /// # Errors
    ///
    /// Fails when the record is missing, the merge violates the
    /// schema, or a unique key collides.
    pub fn update_data(
        &self,
        table: &str,
        id: &str,
        changes: Row,
        txn: Option<TransactionId>,
    ) -> DbResult<Row> {
        self.ready()?;
        self.run(txn, |txn_id| {
            self.txns.stage_update(txn_id, table, id, changes.clone())
        })
    }

    /// Deletes a record; returns it as it was.
    ///
    /// # Errors
    ///
    /// Fails when the record or table is missing.
    pub fn delete_data(
        &self,
        table: &str,
        id: &str,
        txn: Option<TransactionId>,
    ) -> DbResult<Row> {
        self.ready()?;
        self.run(txn, |txn_id| self.txns.stage_delete(txn_id, table, id))
    }

    /// Replaces a table's full row sequence.
    ///
    /// # Errors
    ///
    /// Fails on schema violations or lock timeouts.
    pub fn write_table(
        &self,
        table: &str,
        rows: Vec<Row>,
        txn: Option<TransactionId>,
    ) -> DbResult<()> {
        self.ready()?;
        self.run(txn, |txn_id| {
            self.txns.stage_write(txn_id, table, rows.clone())
        })
    }

    /// Reads a table's full row sequence.
    ///
    /// Reads take no locks: the whole-file read-then-decode yields
    /// either the pre-commit or post-commit state, never a blend.
    ///
    /// # Errors
    ///
    /// Fails when the table is missing or does not decode.
    pub fn read_data(&self, table: &str) -> DbResult<Vec<Row>> {
        self.ready()?;
        Ok(self.tables.load(table)?.rows)
    }

    /// Reads one record by id.
    ///
    /// # Errors
    ///
    /// Fails when the table is missing or does not decode.
    pub fn find_by_id(&self, table: &str, id: &str) -> DbResult<Option<Row>> {
        self.ready()?;
        Ok(self.tables.load(table)?.find(id).cloned())
    }

    /// Runs a filtered, sorted, paginated query.
    ///
    /// When the filter is a conjunction whose equality predicates
    /// cover every column of some index, the candidate set is resolved
    /// from that index (earliest-created wins) and only the residual
    /// predicates scan rows; otherwise the whole table is scanned.
    ///
    /// # Errors
    ///
    /// Fails on malformed predicates or a missing table.
    pub fn query(&self, table: &str, options: &QueryOptions) -> DbResult<Vec<Row>> {
        self.ready()?;
        let file = self.tables.load(table)?;
        let candidates = self.candidate_rows(table, file.rows, options);
        run_query(candidates, options)
    }

    /// Runs a query, then merges rows from a join table.
    ///
    /// # Errors
    ///
    /// Fails when either table is missing or the query is malformed.
    pub fn query_join(
        &self,
        table: &str,
        options: &QueryOptions,
        join: &JoinSpec,
    ) -> DbResult<Vec<Row>> {
        let rows = self.query(table, options)?;
        let join_table = self.tables.load(&join.table)?;
        Ok(join_rows(rows, &join_table.rows, join))
    }

    /// Creates a secondary index over a table's columns and builds it
    /// from the current rows.
    ///
    /// # Errors
    ///
    /// Fails when the table is missing, the name is taken, or existing
    /// data violates a requested uniqueness constraint.
    pub fn create_index(
        &self,
        name: &str,
        table: &str,
        columns: Vec<String>,
        kind: IndexKind,
        unique: bool,
    ) -> DbResult<()> {
        self.ready()?;
        let file = self.tables.load(table)?;
        let def = IndexDefinition {
            name: name.to_string(),
            table: table.to_string(),
            columns,
            kind,
            unique,
            created_at: unix_millis(),
        };
        self.indexes.create(def.clone(), &file.rows)?;
        self.events.emit(&Event::new(
            EventKind::CreateIndex,
            Some(table.to_string()),
            serde_json::to_value(&def).ok(),
        ));
        Ok(())
    }

    /// Drops an index.
    ///
    /// # Errors
    ///
    /// Fails when no such index exists.
    pub fn drop_index(&self, name: &str) -> DbResult<()> {
        self.ready()?;
        self.indexes.drop_index(name)
    }

    /// Returns all index definitions, in creation order.
    #[must_use]
    pub fn list_indexes(&self) -> Vec<IndexDefinition> {
        self.indexes.definitions()
    }

    /// Lists the tables present on disk.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be read.
    pub fn list_tables(&self) -> DbResult<Vec<String>> {
        self.ready()?;
        self.tables.list()
    }

    /// Returns row count and bookkeeping for a table.
    ///
    /// # Errors
    ///
    /// Fails when the table is missing or does not decode.
    pub fn table_stats(&self, table: &str) -> DbResult<TableStats> {
        self.ready()?;
        let file = self.tables.load(table)?;
        Ok(TableStats {
            name: file.name,
            rows: file.rows.len(),
            version: file.version,
            created_at: file.created_at,
            last_modified: file.last_modified,
        })
    }

    /// Starts an explicit transaction; default isolation is
    /// `READ_COMMITTED` (the engine behaves serializable regardless).
    ///
    /// # Errors
    ///
    /// Fails when the engine is closed.
    pub fn start_transaction(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> DbResult<TransactionId> {
        self.ready()?;
        Ok(self.txns.begin(isolation.unwrap_or_default()))
    }

    /// Commits a transaction.
    ///
    /// # Errors
    ///
    /// Fails when the transaction is unknown or an operation cannot be
    /// applied (the transaction is then rolled back).
    pub fn commit_transaction(&self, txn: TransactionId) -> DbResult<()> {
        self.ready()?;
        let result = self.txns.commit(txn);
        self.after_commit();
        result
    }

    /// Rolls back a transaction, discarding its buffered operations.
    ///
    /// # Errors
    ///
    /// Fails when the transaction is unknown.
    pub fn rollback_transaction(&self, txn: TransactionId) -> DbResult<()> {
        self.ready()?;
        self.txns.rollback(txn)
    }

    /// Returns the WAL replay failures recorded during open.
    #[must_use]
    pub fn wal_recovery_summary(&self) -> &[RecoveryFailure] {
        &self.recovery_summary
    }

    /// Runs a checkpoint now: flush the WAL buffer and garbage-collect
    /// retired segments.
    ///
    /// # Errors
    ///
    /// Fails when the flush or a removal fails.
    pub fn checkpoint(&self) -> DbResult<()> {
        self.ready()?;
        match &self.wal {
            Some(wal) => wal.checkpoint(),
            None => Ok(()),
        }
    }

    /// Registers an event listener; returns a handle for
    /// [`Database::off`].
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.on(kind, listener)
    }

    /// Removes an event listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.events.off(id)
    }

    /// Closes the database: stops the checkpoint scheduler, flushes
    /// the WAL, runs a final checkpoint, and zeroizes the master key.
    ///
    /// Idempotent; cleanup errors are logged and swallowed so resource
    /// release is guaranteed.
    pub fn close(&self) {
        {
            let mut state = self.state.write();
            if matches!(*state, Lifecycle::Closing | Lifecycle::Closed) {
                return;
            }
            *state = Lifecycle::Closing;
        }

        if let Some(scheduler) = self.scheduler.lock().take() {
            {
                let (lock, condvar) = &*scheduler.signal;
                lock.lock().stop = true;
                condvar.notify_all();
            }
            if scheduler.handle.join().is_err() {
                tracing::warn!("checkpoint scheduler panicked during close");
            }
        }

        if let Some(wal) = &self.wal {
            if let Err(e) = wal.flush() {
                tracing::warn!(error = %e, "WAL flush failed during close");
            }
            if let Err(e) = wal.checkpoint() {
                tracing::warn!(error = %e, "final checkpoint failed during close");
            }
        }

        self.master_key.lock().zeroize();
        *self.state.write() = Lifecycle::Closed;
        tracing::debug!("database closed");
    }

    /// Runs `stage` inside the caller's transaction, or inside a fresh
    /// implicit transaction committed (or rolled back) before
    /// returning.
    fn run<T>(
        &self,
        txn: Option<TransactionId>,
        stage: impl Fn(TransactionId) -> DbResult<T>,
    ) -> DbResult<T> {
        match txn {
            Some(txn_id) => stage(txn_id),
            None => {
                let txn_id = self.txns.begin(IsolationLevel::default());
                match stage(txn_id) {
                    Ok(value) => match self.txns.commit(txn_id) {
                        Ok(()) => {
                            self.after_commit();
                            Ok(value)
                        }
                        Err(e) => Err(e),
                    },
                    Err(e) => {
                        let _ = self.txns.rollback(txn_id);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Narrows a query's candidate rows through an index when the
    /// filter's equality predicates cover one.
    fn candidate_rows(&self, table: &str, rows: Vec<Row>, options: &QueryOptions) -> Vec<Row> {
        let Some(filter) = &options.filter else {
            return rows;
        };
        let equalities = conjunction_equalities(filter);
        if equalities.is_empty() {
            return rows;
        }
        let columns: Vec<&str> = equalities.iter().map(|(column, _)| *column).collect();
        let Some(def) = self.indexes.select_for(table, &columns) else {
            return rows;
        };

        let values: Vec<&serde_json::Value> = def
            .columns
            .iter()
            .filter_map(|col| {
                equalities
                    .iter()
                    .find(|(column, _)| column == col)
                    .map(|(_, value)| *value)
            })
            .collect();
        if values.len() != def.columns.len() {
            return rows;
        }

        let key = composite_key_from_values(&values);
        let ids = self.indexes.lookup(&def.name, &key);
        tracing::debug!(index = %def.name, hits = ids.len(), "index-assisted lookup");

        // Preserve table order so later sort/pagination stay stable
        rows.into_iter()
            .filter(|row| {
                row_id(row).is_some_and(|id| ids.iter().any(|hit| hit.as_str() == id))
            })
            .collect()
    }

    /// Post-commit hook: fire an async checkpoint when the buffered
    /// WAL size crosses the configured threshold.
    fn after_commit(&self) {
        let Some(wal) = &self.wal else { return };
        if (wal.buffered_len() as u64).saturating_mul(1000) > self.config.max_wal_size {
            if let Some(scheduler) = self.scheduler.lock().as_ref() {
                let (lock, condvar) = &*scheduler.signal;
                lock.lock().kick = true;
                condvar.notify_all();
            }
        }
    }

    fn start_scheduler(&self) {
        let Some(wal) = self.wal.clone() else { return };
        let interval = self.config.checkpoint_interval;
        if interval.is_zero() {
            return;
        }

        let signal = Arc::new((Mutex::new(CheckpointSignal::default()), Condvar::new()));
        let thread_signal = Arc::clone(&signal);
        let handle = std::thread::Builder::new()
            .name("sealdb-checkpoint".to_string())
            .spawn(move || loop {
                {
                    let (lock, condvar) = &*thread_signal;
                    let mut guard = lock.lock();
                    if !guard.stop && !guard.kick {
                        condvar.wait_for(&mut guard, interval);
                    }
                    if guard.stop {
                        return;
                    }
                    guard.kick = false;
                }
                if let Err(e) = wal.checkpoint() {
                    tracing::warn!(error = %e, "scheduled checkpoint failed");
                }
            })
            .expect("spawn checkpoint thread");

        *self.scheduler.lock() = Some(CheckpointScheduler { signal, handle });
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("state", &*self.state.read())
            .field("wal", &self.wal.is_some())
            .finish_non_exhaustive()
    }
}

/// Applies one replayed WAL intent to the table store and indexes.
///
/// Replay is idempotent: `create_table` of an existing table is a
/// no-op, deletes tolerate missing files, and `write` replaces the
/// full row sequence.
fn apply_recovered(
    tables: &TableStore,
    indexes: &IndexManager,
    op: &Operation,
) -> DbResult<()> {
    match op {
        Operation::CreateTable { table, schema } => {
            if !tables.exists(table)? {
                tables.persist(&TableFile::new(table.clone(), schema.clone()))?;
            }
            Ok(())
        }
        Operation::DeleteTable { table } => {
            tables.remove(table)?;
            indexes.drop_for_table(table)
        }
        Operation::Write { table, rows } => {
            let mut file = match tables.load(table) {
                Ok(file) => file,
                Err(DbError::TableNotFound { .. }) => TableFile::new(table.clone(), None),
                Err(e) => return Err(e),
            };
            file.rows = rows.clone();
            file.touch();
            tables.persist(&file)?;
            indexes.rebuild_table(table, rows)
        }
    }
}
