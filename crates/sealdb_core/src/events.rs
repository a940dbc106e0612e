//! Engine events.
//!
//! The facade emits a named event for every committed mutation and for
//! transaction boundaries. Dispatch is synchronous and best-effort:
//! listeners run on the committing thread, receive a borrowed payload,
//! and a panicking listener is caught and logged, so it can never affect
//! engine correctness.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Kind of engine event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A record was inserted.
    Add,
    /// A record was updated.
    Update,
    /// A record was deleted.
    Delete,
    /// A table was created.
    CreateTable,
    /// A table was deleted.
    DeleteTable,
    /// An index was created.
    CreateIndex,
    /// A transaction committed.
    CommitTransaction,
    /// A transaction rolled back.
    RollbackTransaction,
}

/// Payload delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Table involved, when the event concerns one.
    pub table: Option<String>,
    /// Event-specific data (the affected row, index definition, or
    /// transaction id).
    pub payload: Option<serde_json::Value>,
}

impl Event {
    /// Creates an event with a table and payload.
    #[must_use]
    pub fn new(kind: EventKind, table: Option<String>, payload: Option<serde_json::Value>) -> Self {
        Self {
            kind,
            table,
            payload,
        }
    }
}

/// Handle returned by [`EventBus::on`]; passes to [`EventBus::off`].
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Registry of event listeners keyed on event kind.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for one event kind.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener; returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        for bucket in listeners.values_mut() {
            let before = bucket.len();
            bucket.retain(|(lid, _)| *lid != id);
            if bucket.len() != before {
                return true;
            }
        }
        false
    }

    /// Dispatches an event to its listeners, synchronously.
    ///
    /// Listener panics are caught and logged.
    pub fn emit(&self, event: &Event) {
        let targets: Vec<Listener> = {
            let listeners = self.listeners.read();
            match listeners.get(&event.kind) {
                Some(bucket) => bucket.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return,
            }
        };

        for listener in targets {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(kind = ?event.kind, "event listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count: usize = self.listeners.read().values().map(Vec::len).sum();
        f.debug_struct("EventBus").field("listeners", &count).finish()
    }
}
