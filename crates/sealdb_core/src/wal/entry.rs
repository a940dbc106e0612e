//! WAL entry types, checksums, and the padded plaintext codec.

use crate::error::{DbError, DbResult};
use crate::schema::Schema;
use crate::types::{unix_millis, Row, SequenceNumber};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Literal prefix of every WAL line.
pub const WAL_LINE_PREFIX: &str = "WAL:";

/// Width of the big-endian length prefix at the end of the padded
/// plaintext.
const LENGTH_PREFIX: usize = 4;

/// A logged mutation intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// A table was created.
    CreateTable {
        /// Table name.
        table: String,
        /// Declared schema, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<Schema>,
    },
    /// A table was deleted.
    DeleteTable {
        /// Table name.
        table: String,
    },
    /// A table's full row sequence was replaced.
    Write {
        /// Table name.
        table: String,
        /// The complete new row sequence.
        rows: Vec<Row>,
    },
}

impl Operation {
    /// Returns the table this operation targets.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { table, .. }
            | Self::DeleteTable { table }
            | Self::Write { table, .. } => table,
        }
    }
}

/// Computes the hex SHA-256 checksum over an operation's JSON form.
///
/// # Errors
///
/// Returns an error if the operation cannot be serialized.
pub fn operation_checksum(operation: &Operation) -> DbResult<String> {
    let bytes = serde_json::to_vec(operation)
        .map_err(|e| DbError::format(format!("cannot serialize WAL operation: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// One WAL entry as serialized under the AEAD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Strictly increasing sequence number.
    pub sequence: u64,
    /// Append timestamp (ms since epoch).
    pub timestamp: u64,
    /// The logged intent.
    pub operation: Operation,
    /// Hex SHA-256 of the operation's JSON form.
    pub checksum: String,
}

impl WalEntry {
    /// Builds an entry for an operation, stamping time and checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation cannot be serialized.
    pub fn new(sequence: SequenceNumber, operation: Operation) -> DbResult<Self> {
        let checksum = operation_checksum(&operation)?;
        Ok(Self {
            sequence: sequence.as_u64(),
            timestamp: unix_millis(),
            operation,
            checksum,
        })
    }

    /// Verifies the stored checksum against the operation.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Integrity`] on mismatch.
    pub fn verify_checksum(&self) -> DbResult<()> {
        let expected = operation_checksum(&self.operation)?;
        if expected != self.checksum {
            return Err(DbError::integrity(format!(
                "entry {} checksum mismatch",
                self.sequence
            )));
        }
        Ok(())
    }
}

/// Pads entry JSON to the block size: `[json | random | len_be_u32]`.
///
/// The padded length is the next multiple of `block` that holds the
/// JSON plus the 4-byte length prefix. Padding bytes are random so an
/// observer cannot infer entry sizes from the ciphertext.
#[must_use]
pub fn pad_plaintext(json: &[u8], block: usize) -> Vec<u8> {
    let block = block.max(LENGTH_PREFIX + 1);
    let needed = json.len() + LENGTH_PREFIX;
    let padded_len = needed.div_ceil(block) * block;

    let mut buf = vec![0u8; padded_len];
    buf[..json.len()].copy_from_slice(json);
    rand::thread_rng().fill_bytes(&mut buf[json.len()..padded_len - LENGTH_PREFIX]);
    let prefix = (json.len() as u32).to_be_bytes();
    buf[padded_len - LENGTH_PREFIX..].copy_from_slice(&prefix);
    buf
}

/// Recovers entry JSON from a padded plaintext.
///
/// # Errors
///
/// Returns [`DbError::Format`] when the buffer is too short or the
/// length prefix points outside it.
pub fn unpad_plaintext(padded: &[u8]) -> DbResult<Vec<u8>> {
    if padded.len() < LENGTH_PREFIX {
        return Err(DbError::format("padded WAL plaintext shorter than its length prefix"));
    }
    let prefix: [u8; LENGTH_PREFIX] = padded[padded.len() - LENGTH_PREFIX..]
        .try_into()
        .expect("slice length checked");
    let len = u32::from_be_bytes(prefix) as usize;
    if len > padded.len() - LENGTH_PREFIX {
        return Err(DbError::format(format!(
            "WAL length prefix {len} exceeds padded size {}",
            padded.len()
        )));
    }
    Ok(padded[..len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_op() -> Operation {
        let mut row = Row::new();
        row.insert("id".to_string(), json!("abc"));
        row.insert("value".to_string(), json!(42));
        Operation::Write {
            table: "data".to_string(),
            rows: vec![row],
        }
    }

    #[test]
    fn operation_tags_are_snake_case() {
        let json = serde_json::to_value(&Operation::DeleteTable {
            table: "users".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "delete_table");

        let json = serde_json::to_value(&Operation::CreateTable {
            table: "users".to_string(),
            schema: None,
        })
        .unwrap();
        assert_eq!(json["type"], "create_table");
        assert!(json.get("schema").is_none());
    }

    #[test]
    fn checksum_is_hex_sha256() {
        let sum = operation_checksum(&write_op()).unwrap();
        assert_eq!(sum.len(), 64);
        assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
        // Deterministic
        assert_eq!(sum, operation_checksum(&write_op()).unwrap());
    }

    #[test]
    fn entry_checksum_verifies() {
        let entry = WalEntry::new(SequenceNumber::new(1), write_op()).unwrap();
        entry.verify_checksum().unwrap();
    }

    #[test]
    fn tampered_operation_fails_checksum() {
        let mut entry = WalEntry::new(SequenceNumber::new(1), write_op()).unwrap();
        entry.operation = Operation::DeleteTable {
            table: "data".to_string(),
        };
        assert!(matches!(
            entry.verify_checksum(),
            Err(DbError::Integrity { .. })
        ));
    }

    #[test]
    fn entry_survives_json_roundtrip() {
        let entry = WalEntry::new(SequenceNumber::new(7), write_op()).unwrap();
        let bytes = serde_json::to_vec(&entry).unwrap();
        let back: WalEntry = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, entry);
        back.verify_checksum().unwrap();
    }

    #[test]
    fn small_entry_pads_to_one_block() {
        let padded = pad_plaintext(b"{\"a\":1}", 1024);
        assert_eq!(padded.len(), 1024);
        assert_eq!(unpad_plaintext(&padded).unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn oversized_entry_pads_to_next_multiple() {
        let json = vec![b'x'; 1021]; // 1021 + 4 > 1024
        let padded = pad_plaintext(&json, 1024);
        assert_eq!(padded.len(), 2048);
        assert_eq!(unpad_plaintext(&padded).unwrap(), json);
    }

    #[test]
    fn exact_fit_keeps_one_block() {
        let json = vec![b'y'; 1020]; // 1020 + 4 == 1024
        let padded = pad_plaintext(&json, 1024);
        assert_eq!(padded.len(), 1024);
        assert_eq!(unpad_plaintext(&padded).unwrap(), json);
    }

    #[test]
    fn bad_length_prefix_rejected() {
        let mut padded = pad_plaintext(b"data", 64);
        let len = padded.len();
        padded[len - 4..].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            unpad_plaintext(&padded),
            Err(DbError::Format { .. })
        ));

        assert!(unpad_plaintext(&[1, 2]).is_err());
    }
}
