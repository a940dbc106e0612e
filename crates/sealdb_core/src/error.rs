//! Error types for SealDB core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in SealDB core operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] sealdb_storage::StorageError),

    /// Authenticated decryption failed.
    ///
    /// Raised when a GCM tag does not verify or when a decrypted
    /// payload is not the JSON the format promises. Distinguishable
    /// from [`DbError::Format`] so callers can tell a wrong key from
    /// a mangled file.
    #[error("authentication failed: {context}")]
    AuthFailed {
        /// What was being decrypted.
        context: String,
    },

    /// A file or blob does not match the expected layout.
    #[error("format error: {message}")]
    Format {
        /// Description of the format issue.
        message: String,
    },

    /// A record failed schema validation.
    #[error("validation failed: {message}")]
    Validation {
        /// Description naming the offending field.
        message: String,
    },

    /// A lock wait exceeded its deadline.
    #[error("timed out after {waited_ms} ms waiting for lock on table '{table}'")]
    LockTimeout {
        /// Table whose lock was contended.
        table: String,
        /// Milliseconds waited before giving up.
        waited_ms: u64,
    },

    /// An insert or update would duplicate a unique index key.
    #[error("unique index '{index}' already holds key '{key}'")]
    UniqueViolation {
        /// Name of the violated index.
        index: String,
        /// The composite key that collided.
        key: String,
    },

    /// No record with the given id exists in the table.
    #[error("record '{id}' not found in table '{table}'")]
    RecordNotFound {
        /// Table searched.
        table: String,
        /// Record identifier.
        id: String,
    },

    /// No table with the given name exists.
    #[error("table not found: {name}")]
    TableNotFound {
        /// Name of the missing table.
        name: String,
    },

    /// No index with the given name exists.
    #[error("index not found: {name}")]
    IndexNotFound {
        /// Name of the missing index.
        name: String,
    },

    /// The transaction id does not resolve to a live transaction.
    #[error("transaction not found: {id}")]
    TransactionNotFound {
        /// The unresolved transaction id.
        id: String,
    },

    /// Operation not permitted in the current engine state.
    #[error("invalid state: {message}")]
    State {
        /// Why the operation is not permitted.
        message: String,
    },

    /// A WAL entry failed its checksum.
    #[error("WAL integrity failure: {message}")]
    Integrity {
        /// Description of the mismatch.
        message: String,
    },

    /// Another process holds the database directory lock.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,
}

impl DbError {
    /// Creates an authentication failure error.
    pub fn auth_failed(context: impl Into<String>) -> Self {
        Self::AuthFailed {
            context: context.into(),
        }
    }

    /// Creates a format error.
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Creates a WAL integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Creates a table-not-found error.
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Self::TableNotFound { name: name.into() }
    }

    /// Creates a record-not-found error.
    pub fn record_not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            table: table.into(),
            id: id.into(),
        }
    }
}
