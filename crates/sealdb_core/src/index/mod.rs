//! Secondary indexes.
//!
//! An index maps a composite key, the indexed columns' string
//! renderings joined with `::`, to the list of record ids sharing
//! that key. Two variants exist: `btree` (ordered scans defined) and
//! `hash` (equality only); for equality lookups they behave
//! identically. Indexes live in memory and are persisted through the
//! codec to `<db>/indexes/<name>.idx`, beside the table files.
//!
//! # Invariants
//!
//! - every id in a bucket resolves to a row of the owning table whose
//!   indexed columns render exactly the bucket's key
//! - a unique index holds at most one id per key
//! - index maintenance is synchronous with the owning table's commit

mod manager;

pub use manager::IndexManager;

use crate::types::{RecordId, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between column renderings in a composite key.
pub const KEY_SEPARATOR: &str = "::";

/// Index variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Ordered buckets; scans yield keys in ascending order.
    BTree,
    /// Unordered buckets; scan order is unspecified.
    Hash,
}

impl Default for IndexKind {
    fn default() -> Self {
        Self::BTree
    }
}

/// A persisted index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    /// Index name (also the file stem under `indexes/`).
    pub name: String,
    /// Owning table.
    pub table: String,
    /// Indexed columns, in key order.
    pub columns: Vec<String>,
    /// Index variant.
    #[serde(default)]
    pub kind: IndexKind,
    /// Whether keys must be unique.
    #[serde(default)]
    pub unique: bool,
    /// Creation timestamp (ms since epoch); orders tie-breaks.
    #[serde(default)]
    pub created_at: u64,
}

/// Renders one column value for key building.
///
/// Scalars use their literal rendering (`null`, `true`, `42`, raw
/// string); arrays and objects use compact JSON. A missing column
/// renders as `null`.
fn key_part(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Builds the composite key of a row over the given columns.
#[must_use]
pub fn composite_key(row: &Row, columns: &[String]) -> String {
    columns
        .iter()
        .map(|col| key_part(row.get(col)))
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
}

/// Builds a composite key from already-known column values.
///
/// Used by the query engine when planning an index lookup: the values
/// come from equality predicates rather than a row.
#[must_use]
pub fn composite_key_from_values(values: &[&Value]) -> String {
    values
        .iter()
        .map(|v| key_part(Some(v)))
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
}

/// Ids stored under one composite key.
pub type Bucket = Vec<RecordId>;
