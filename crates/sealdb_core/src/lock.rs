//! Per-table exclusive locks with FIFO waiter queues.
//!
//! Each table has one exclusive lock. A free lock goes to the
//! requester immediately; otherwise the requester joins a FIFO queue
//! with an individual deadline of `start + lock_timeout`. On release
//! the queue head whose deadline has not passed takes the lock.
//! Re-acquisition by the current owner is a no-op. There are no
//! shared locks and no upgrades.

use crate::error::{DbError, DbResult};
use crate::types::TransactionId;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct TableLock {
    owner: Option<TransactionId>,
    /// Waiter tickets in arrival order.
    waiters: VecDeque<u64>,
}

#[derive(Debug, Default)]
struct LockState {
    tables: HashMap<String, TableLock>,
    next_ticket: u64,
}

/// Serializes writers at table granularity.
#[derive(Debug, Default)]
pub struct LockManager {
    state: Mutex<LockState>,
    released: Condvar,
}

impl LockManager {
    /// Creates a new lock manager with no locks held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the exclusive lock on `table` for `txn`.
    ///
    /// Blocks up to `timeout`; already owning the lock returns
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::LockTimeout`] when the deadline passes while
    /// still queued.
    pub fn acquire(&self, table: &str, txn: TransactionId, timeout: Duration) -> DbResult<()> {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut state = self.state.lock();

        let lock = state.tables.entry(table.to_string()).or_default();
        if lock.owner == Some(txn) {
            return Ok(());
        }
        if lock.owner.is_none() && lock.waiters.is_empty() {
            lock.owner = Some(txn);
            return Ok(());
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state
            .tables
            .get_mut(table)
            .expect("entry created above")
            .waiters
            .push_back(ticket);

        loop {
            {
                let lock = state.tables.get_mut(table).expect("entry exists");
                if lock.owner.is_none() && lock.waiters.front() == Some(&ticket) {
                    lock.waiters.pop_front();
                    lock.owner = Some(txn);
                    return Ok(());
                }
            }

            if self.released.wait_until(&mut state, deadline).timed_out() {
                let lock = state.tables.get_mut(table).expect("entry exists");
                // Final check: the release may have raced the deadline
                if lock.owner.is_none() && lock.waiters.front() == Some(&ticket) {
                    lock.waiters.pop_front();
                    lock.owner = Some(txn);
                    return Ok(());
                }
                lock.waiters.retain(|t| *t != ticket);
                // Unblock whoever is behind the expired ticket
                self.released.notify_all();
                return Err(DbError::LockTimeout {
                    table: table.to_string(),
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }
        }
    }

    /// Releases `table`'s lock if `txn` owns it.
    ///
    /// Releasing a lock one does not own is ignored.
    pub fn release(&self, table: &str, txn: TransactionId) {
        let mut state = self.state.lock();
        if let Some(lock) = state.tables.get_mut(table) {
            if lock.owner == Some(txn) {
                lock.owner = None;
                if lock.waiters.is_empty() {
                    state.tables.remove(table);
                }
                self.released.notify_all();
            }
        }
    }

    /// Releases every listed lock held by `txn`.
    pub fn release_all<'a>(&self, tables: impl IntoIterator<Item = &'a str>, txn: TransactionId) {
        for table in tables {
            self.release(table, txn);
        }
    }

    /// Returns the current owner of a table's lock, if any.
    #[must_use]
    pub fn owner(&self, table: &str) -> Option<TransactionId> {
        self.state.lock().tables.get(table).and_then(|l| l.owner)
    }
}
