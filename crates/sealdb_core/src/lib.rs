//! # SealDB Core
//!
//! Embedded, authenticated, single-writer document store.
//!
//! SealDB persists JSON-shaped records in per-table encrypted files,
//! ordered by insertion, with schema validation, secondary indexes,
//! and a crash-recoverable encrypted write-ahead log. It targets small
//! deployments (edge, IoT, serverless) that need ACID-like guarantees
//! and confidentiality at rest.
//!
//! This crate provides:
//! - AES-256-GCM at-rest encryption with a derived WAL key
//! - A WAL with padded, checksummed, encrypted entries and tolerant
//!   per-entry recovery
//! - Whole-file table storage with snapshot reads
//! - Equality/compound secondary indexes with uniqueness constraints
//! - Per-table exclusive locking with FIFO waiters
//! - Buffered transactions with atomic commit and in-memory rollback
//! - A filter/sort/paginate/join query evaluator
//!
//! ## Example
//!
//! ```rust,ignore
//! use sealdb_core::{Database, MasterKey};
//! use std::path::Path;
//!
//! let db = Database::open(Path::new("my_db"), MasterKey::generate())?;
//! db.create_table("users", None, None)?;
//! let id = db.add_data("users", row, None)?;
//! db.close();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod crypto;
mod database;
mod dir;
mod error;
mod events;
mod index;
mod lock;
mod query;
mod schema;
mod table;
mod transaction;
mod types;
mod wal;

pub use codec::FileCodec;
pub use config::Config;
pub use crypto::{derive_wal_key, generate_salt, BlobCipher, MasterKey, WalKey, KEY_SIZE, SALT_SIZE};
pub use database::{Database, TableStats};
pub use error::{DbError, DbResult};
pub use events::{Event, EventBus, EventKind, ListenerId};
pub use index::{
    composite_key, composite_key_from_values, IndexDefinition, IndexKind, IndexManager,
    KEY_SEPARATOR,
};
pub use lock::LockManager;
pub use query::{
    CmpOp, Condition, Filter, GroupOperator, JoinSpec, QueryOptions, Sort, SortDirection,
};
pub use schema::Schema;
pub use table::{row_id, TableFile, TableStore};
pub use transaction::{Transaction, TransactionManager, TransactionState, TxnOperation};
pub use types::{IsolationLevel, RecordId, Row, SequenceNumber, TransactionId, ID_FIELD};
pub use wal::{operation_checksum, Operation, RecoveryFailure, WalEntry, WalManager};
