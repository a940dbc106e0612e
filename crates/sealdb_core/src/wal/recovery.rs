//! WAL replay and the recovery summary.

use crate::error::DbResult;
use crate::wal::entry::Operation;
use crate::wal::writer::WalManager;
use std::fs;

/// Longest slice of a failing line kept in the summary.
const PREVIEW_CHARS: usize = 64;

/// One WAL entry (or file) that failed to replay.
///
/// Replay never aborts on a failing entry; it records the failure here
/// and continues, so a single corrupt line cannot block recovery of
/// everything behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryFailure {
    /// Segment file name.
    pub file: String,
    /// Start of the failing line; `None` when the whole file could not
    /// be read.
    pub entry_preview: Option<String>,
    /// Why the entry did not apply.
    pub error: String,
}

impl WalManager {
    /// Replays every segment, applying each intent through `apply`.
    ///
    /// Entries that fail to decrypt, fail their checksum, or fail to
    /// apply are collected into the returned summary; replay continues
    /// past them. A file-level read failure contributes one summary
    /// record with no entry preview.
    ///
    /// The sequence counter is advanced past every replayed entry so
    /// new appends stay strictly increasing.
    ///
    /// # Errors
    ///
    /// Returns an error only when the WAL directory itself cannot be
    /// enumerated.
    pub fn recover<F>(&self, mut apply: F) -> DbResult<Vec<RecoveryFailure>>
    where
        F: FnMut(&Operation) -> DbResult<()>,
    {
        let mut failures = Vec::new();

        for path in self.segment_paths()? {
            let file = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("<segment>")
                .to_string();

            let contents = match fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(e) => {
                    failures.push(RecoveryFailure {
                        file,
                        entry_preview: None,
                        error: format!("cannot read segment: {e}"),
                    });
                    continue;
                }
            };

            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let outcome = self.decode_line(line).and_then(|entry| {
                    entry.verify_checksum()?;
                    self.observe_sequence(entry.sequence);
                    apply(&entry.operation)
                });
                if let Err(e) = outcome {
                    failures.push(RecoveryFailure {
                        file: file.clone(),
                        entry_preview: Some(line.chars().take(PREVIEW_CHARS).collect()),
                        error: e.to_string(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            tracing::warn!(count = failures.len(), "WAL recovery recorded failures");
        }
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MasterKey;
    use crate::error::DbError;
    use crate::types::Row;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn open(dir: &Path, key: &MasterKey) -> WalManager {
        WalManager::open(dir, Some(key), 1024, true, Duration::from_secs(86_400)).unwrap()
    }

    fn write_op(table: &str, id: &str) -> Operation {
        let mut row = Row::new();
        row.insert("id".to_string(), json!(id));
        Operation::Write {
            table: table.to_string(),
            rows: vec![row],
        }
    }

    #[test]
    fn replays_appended_operations_in_order() {
        let temp = tempdir().unwrap();
        let key = MasterKey::generate();

        {
            let wal = open(temp.path(), &key);
            wal.append(write_op("users", "a")).unwrap();
            wal.append(write_op("users", "b")).unwrap();
            wal.append(Operation::DeleteTable {
                table: "posts".to_string(),
            })
            .unwrap();
        }

        let wal = open(temp.path(), &key);
        let mut seen = Vec::new();
        let failures = wal
            .recover(|op| {
                seen.push(op.clone());
                Ok(())
            })
            .unwrap();

        assert!(failures.is_empty());
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], write_op("users", "a"));
        assert!(matches!(seen[2], Operation::DeleteTable { .. }));
    }

    #[test]
    fn recovery_continues_past_sequence() {
        let temp = tempdir().unwrap();
        let key = MasterKey::generate();

        {
            let wal = open(temp.path(), &key);
            wal.append(write_op("users", "a")).unwrap();
            wal.append(write_op("users", "b")).unwrap();
        }

        let wal = open(temp.path(), &key);
        wal.recover(|_| Ok(())).unwrap();

        // New appends continue past the replayed entries
        let seq = wal.append(write_op("users", "c")).unwrap();
        assert_eq!(seq.as_u64(), 3);
    }

    #[test]
    fn wrong_key_records_every_entry_without_applying() {
        let temp = tempdir().unwrap();
        let k1 = MasterKey::generate();

        {
            let wal = open(temp.path(), &k1);
            wal.append(write_op("users", "a")).unwrap();
            wal.append(write_op("users", "b")).unwrap();
        }

        let wal = open(temp.path(), &MasterKey::generate());
        let mut applied = 0;
        let failures = wal
            .recover(|_| {
                applied += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(applied, 0);
        assert_eq!(failures.len(), 2);
        for failure in &failures {
            assert!(failure.entry_preview.is_some());
            assert!(failure.error.contains("authentication failed"));
        }
    }

    #[test]
    fn garbage_line_is_recorded_and_skipped() {
        let temp = tempdir().unwrap();
        let key = MasterKey::generate();

        {
            let wal = open(temp.path(), &key);
            wal.append(write_op("users", "a")).unwrap();
        }
        // Corrupt the tail of the segment with a half-written line
        let segment = {
            let wal = open(temp.path(), &key);
            wal.segment_paths().unwrap().pop().unwrap()
        };
        let mut contents = fs::read_to_string(&segment).unwrap();
        contents.push_str("WAL:deadbeef\n");
        fs::write(&segment, contents).unwrap();

        let wal = open(temp.path(), &key);
        let mut applied = 0;
        let failures = wal
            .recover(|_| {
                applied += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(applied, 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].entry_preview.as_deref(), Some("WAL:deadbeef"));
    }

    #[test]
    fn apply_errors_do_not_abort_replay() {
        let temp = tempdir().unwrap();
        let key = MasterKey::generate();

        {
            let wal = open(temp.path(), &key);
            wal.append(write_op("users", "a")).unwrap();
            wal.append(write_op("broken", "b")).unwrap();
            wal.append(write_op("users", "c")).unwrap();
        }

        let wal = open(temp.path(), &key);
        let mut applied = Vec::new();
        let failures = wal
            .recover(|op| {
                if op.table() == "broken" {
                    return Err(DbError::state("cannot apply"));
                }
                applied.push(op.table().to_string());
                Ok(())
            })
            .unwrap();

        assert_eq!(applied, vec!["users", "users"]);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].error.contains("cannot apply"));
    }
}
