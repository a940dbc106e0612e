//! Transaction descriptor and buffered operations.

use crate::schema::Schema;
use crate::types::{unix_millis, IsolationLevel, RecordId, Row, TransactionId};
use std::collections::HashMap;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting operations.
    Active,
    /// Committed; terminal.
    Committed,
    /// Rolled back; terminal.
    RolledBack,
}

/// One buffered operation.
///
/// `old_row` snapshots are captured when the operation is buffered;
/// the table lock held from that moment keeps them accurate through
/// commit, where they drive index maintenance.
#[derive(Debug, Clone, PartialEq)]
pub enum TxnOperation {
    /// Insert a new row.
    Add {
        /// Target table.
        table: String,
        /// The row, id already assigned.
        row: Row,
    },
    /// Update an existing row.
    Update {
        /// Target table.
        table: String,
        /// Id of the row being updated.
        id: RecordId,
        /// The row after the update.
        new_row: Row,
        /// The row as it was when buffered.
        old_row: Row,
    },
    /// Delete an existing row.
    Delete {
        /// Target table.
        table: String,
        /// Id of the row being deleted.
        id: RecordId,
        /// The row as it was when buffered.
        old_row: Row,
    },
    /// Create a table.
    CreateTable {
        /// Table name.
        table: String,
        /// Declared schema, if any.
        schema: Option<Schema>,
    },
    /// Delete a table.
    DeleteTable {
        /// Table name.
        table: String,
    },
    /// Replace a table's full row sequence.
    Write {
        /// Target table.
        table: String,
        /// The complete new row sequence.
        rows: Vec<Row>,
    },
}

impl TxnOperation {
    /// Returns the table this operation targets.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Add { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::CreateTable { table, .. }
            | Self::DeleteTable { table }
            | Self::Write { table, .. } => table,
        }
    }
}

/// An in-memory transaction descriptor.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    isolation: IsolationLevel,
    state: TransactionState,
    operations: Vec<TxnOperation>,
    /// Names of table locks held, in acquisition order.
    locks: Vec<String>,
    started_at: u64,
    /// Per-table row snapshots. Reserved for a future
    /// `REPEATABLE_READ` implementation; nothing populates it yet.
    #[allow(dead_code)]
    snapshots: HashMap<String, Vec<Row>>,
}

impl Transaction {
    /// Creates an active transaction.
    #[must_use]
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            id: TransactionId::generate(),
            isolation,
            state: TransactionState::Active,
            operations: Vec::new(),
            locks: Vec::new(),
            started_at: unix_millis(),
            snapshots: HashMap::new(),
        }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the declared isolation level.
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true while the transaction accepts operations.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the start timestamp (ms since epoch).
    #[must_use]
    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    /// Appends an operation to the buffer.
    pub fn buffer(&mut self, op: TxnOperation) {
        self.operations.push(op);
    }

    /// Returns the buffered operations in order.
    #[must_use]
    pub fn operations(&self) -> &[TxnOperation] {
        &self.operations
    }

    /// Records a held lock (idempotent).
    pub fn add_lock(&mut self, table: &str) {
        if !self.locks.iter().any(|held| held == table) {
            self.locks.push(table.to_string());
        }
    }

    /// Returns the held lock names in acquisition order.
    #[must_use]
    pub fn locks(&self) -> &[String] {
        &self.locks
    }

    /// Marks the transaction committed.
    pub fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    /// Marks the transaction rolled back.
    pub fn mark_rolled_back(&mut self) {
        self.state = TransactionState::RolledBack;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_transaction_is_active() {
        let txn = Transaction::new(IsolationLevel::default());
        assert!(txn.is_active());
        assert_eq!(txn.isolation(), IsolationLevel::ReadCommitted);
        assert!(txn.operations().is_empty());
    }

    #[test]
    fn buffer_preserves_order() {
        let mut txn = Transaction::new(IsolationLevel::Serializable);
        txn.buffer(TxnOperation::CreateTable {
            table: "users".to_string(),
            schema: None,
        });
        let mut row = Row::new();
        row.insert("id".to_string(), json!("a"));
        txn.buffer(TxnOperation::Add {
            table: "users".to_string(),
            row,
        });

        assert_eq!(txn.operations().len(), 2);
        assert!(matches!(txn.operations()[0], TxnOperation::CreateTable { .. }));
        assert!(matches!(txn.operations()[1], TxnOperation::Add { .. }));
    }

    #[test]
    fn locks_deduplicate() {
        let mut txn = Transaction::new(IsolationLevel::default());
        txn.add_lock("users");
        txn.add_lock("users");
        txn.add_lock("posts");
        assert_eq!(txn.locks(), ["users", "posts"]);
    }

    #[test]
    fn terminal_transitions() {
        let mut txn = Transaction::new(IsolationLevel::default());
        txn.mark_committed();
        assert!(!txn.is_active());
        assert_eq!(txn.state(), TransactionState::Committed);

        let mut txn = Transaction::new(IsolationLevel::default());
        txn.mark_rolled_back();
        assert_eq!(txn.state(), TransactionState::RolledBack);
    }
}
