//! Core type definitions for SealDB.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A stored record: an insertion-ordered mapping from field names to
/// JSON values. Every persisted record carries an `id` field.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Name of the identifier field every record carries.
pub const ID_FIELD: &str = "id";

/// Unique identifier for a record.
///
/// Identifiers are opaque strings. When the engine assigns one it is a
/// fresh 128-bit random value rendered as 32 lowercase hex characters;
/// callers may also supply their own.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a fresh random record id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().as_simple().to_string())
    }

    /// Wraps a caller-supplied id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a transaction.
///
/// Transaction ids are 128-bit random values; they are never reused
/// within an engine lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Creates a fresh random transaction id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0.as_simple())
    }
}

/// Sequence number ordering WAL entries.
///
/// Strictly increasing within one engine lifetime; higher numbers are
/// later intents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Declared transaction isolation level.
///
/// The engine behaves as `Serializable` regardless of the declared
/// level: exclusive per-table locks serialize all writers, and readers
/// snapshot whole files. The declared level is stored on the
/// transaction for forward compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    /// Reads may observe uncommitted data.
    ReadUncommitted,
    /// Reads observe only committed data.
    #[default]
    ReadCommitted,
    /// Repeated reads within a transaction agree.
    RepeatableRead,
    /// Transactions behave as if executed serially.
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadUncommitted => "READ_UNCOMMITTED",
            Self::ReadCommitted => "READ_COMMITTED",
            Self::RepeatableRead => "REPEATABLE_READ",
            Self::Serializable => "SERIALIZABLE",
        };
        f.write_str(name)
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_record_id_is_32_lowercase_hex() {
        let id = RecordId::generate();
        let s = id.as_str();
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(RecordId::generate(), RecordId::generate());
        assert_ne!(TransactionId::generate(), TransactionId::generate());
    }

    #[test]
    fn sequence_number_next() {
        let s = SequenceNumber::new(5);
        assert_eq!(s.next().as_u64(), 6);
    }

    #[test]
    fn isolation_default_is_read_committed() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn isolation_display() {
        assert_eq!(IsolationLevel::Serializable.to_string(), "SERIALIZABLE");
    }
}
