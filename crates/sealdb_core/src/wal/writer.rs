//! WAL manager: salt, buffering, segment appends, checkpointing.

use crate::crypto::{derive_wal_key, generate_salt, BlobCipher, MasterKey, SALT_SIZE};
use crate::error::{DbError, DbResult};
use crate::types::SequenceNumber;
use crate::wal::entry::{pad_plaintext, unpad_plaintext, Operation, WalEntry, WAL_LINE_PREFIX};
use parking_lot::Mutex;
use sealdb_storage::{FileBackend, StorageBackend};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Name of the salt file inside the WAL directory.
const SALT_FILE: &str = ".salt";

/// Manages the write-ahead log directory.
///
/// Appends go to an in-memory buffer of encoded lines; `flush` writes
/// the batch to the active segment and syncs it. With synchronous
/// writes enabled (the default) every append flushes before the caller
/// observes success.
pub struct WalManager {
    wal_dir: PathBuf,
    /// None when the database runs unencrypted.
    cipher: Option<BlobCipher>,
    padding: usize,
    sync_writes: bool,
    retention: Duration,
    next_seq: AtomicU64,
    buffer: Mutex<Vec<String>>,
    active: Mutex<Option<(PathBuf, FileBackend)>>,
    checkpointing: AtomicBool,
}

impl WalManager {
    /// Opens the WAL under `wal_dir`.
    ///
    /// When a master key is supplied, the 32-byte salt at
    /// `wal/.salt` is loaded (or created on first open) and the WAL
    /// key is derived from it; entries are then encrypted. Without a
    /// key, lines carry cleartext JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or salt cannot be set up or
    /// key derivation fails.
    pub fn open(
        wal_dir: &Path,
        master: Option<&MasterKey>,
        padding: usize,
        sync_writes: bool,
        retention: Duration,
    ) -> DbResult<Self> {
        fs::create_dir_all(wal_dir)?;

        let cipher = match master {
            Some(key) => {
                let salt = load_or_create_salt(&wal_dir.join(SALT_FILE))?;
                let wal_key = derive_wal_key(key, &salt)?;
                Some(BlobCipher::for_wal(&wal_key))
            }
            None => None,
        };

        Ok(Self {
            wal_dir: wal_dir.to_path_buf(),
            cipher,
            padding,
            sync_writes,
            retention,
            next_seq: AtomicU64::new(1),
            buffer: Mutex::new(Vec::new()),
            active: Mutex::new(None),
            checkpointing: AtomicBool::new(false),
        })
    }

    /// Appends a mutation intent and returns its sequence number.
    ///
    /// With synchronous writes the entry is durable when this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the flush fails.
    pub fn append(&self, operation: Operation) -> DbResult<SequenceNumber> {
        let sequence = SequenceNumber::new(self.next_seq.fetch_add(1, Ordering::SeqCst));
        let entry = WalEntry::new(sequence, operation)?;
        let line = self.encode_line(&entry)?;

        self.buffer.lock().push(line);
        if self.sync_writes {
            self.flush()?;
        }
        Ok(sequence)
    }

    /// Number of entries buffered and not yet flushed.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Flushes buffered entries to the active segment and syncs it.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be written.
    pub fn flush(&self) -> DbResult<()> {
        let mut buffer = self.buffer.lock();
        if buffer.is_empty() {
            return Ok(());
        }
        let mut batch = String::new();
        for line in buffer.drain(..) {
            batch.push_str(&line);
            batch.push('\n');
        }

        let mut active = self.active.lock();
        if active.is_none() {
            let path = self
                .wal_dir
                .join(format!("wal-{}.log", crate::types::unix_millis()));
            let backend = FileBackend::open_with_create_dirs(&path)?;
            *active = Some((path, backend));
        }
        let (_, backend) = active.as_mut().expect("segment opened above");
        backend.append(batch.as_bytes())?;
        backend.sync()?;
        Ok(())
    }

    /// Runs a checkpoint: flush the buffer, then garbage-collect
    /// segments whose mtime is older than the retention window.
    ///
    /// Only one checkpoint runs at a time; re-entry returns
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or a removal fails.
    pub fn checkpoint(&self) -> DbResult<()> {
        if self
            .checkpointing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let result = self.checkpoint_inner();
        self.checkpointing.store(false, Ordering::SeqCst);
        result
    }

    fn checkpoint_inner(&self) -> DbResult<()> {
        self.flush()?;

        let Some(cutoff) = SystemTime::now().checked_sub(self.retention) else {
            return Ok(());
        };
        let active_path = self.active.lock().as_ref().map(|(path, _)| path.clone());

        for path in self.segment_paths()? {
            if Some(&path) == active_path.as_ref() {
                continue;
            }
            let mtime = fs::metadata(&path)?.modified()?;
            if mtime < cutoff {
                tracing::debug!(segment = %path.display(), "checkpoint removing retired WAL segment");
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Lists segment files in lexicographic (= timestamp) order.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL directory cannot be read.
    pub fn segment_paths(&self) -> DbResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for dir_entry in fs::read_dir(&self.wal_dir)? {
            let path = dir_entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with("wal-") && name.ends_with(".log") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Encodes one entry as a WAL line (without trailing newline).
    pub(crate) fn encode_line(&self, entry: &WalEntry) -> DbResult<String> {
        let json = serde_json::to_vec(entry)
            .map_err(|e| DbError::format(format!("cannot serialize WAL entry: {e}")))?;
        match &self.cipher {
            Some(cipher) => {
                let padded = pad_plaintext(&json, self.padding);
                Ok(format!("{WAL_LINE_PREFIX}{}", cipher.encrypt_bytes(&padded)?))
            }
            None => {
                let text = String::from_utf8(json)
                    .map_err(|_| DbError::format("WAL entry JSON is not UTF-8"))?;
                Ok(format!("{WAL_LINE_PREFIX}{text}"))
            }
        }
    }

    /// Decodes one WAL line back into an entry.
    pub(crate) fn decode_line(&self, line: &str) -> DbResult<WalEntry> {
        let body = line
            .strip_prefix(WAL_LINE_PREFIX)
            .ok_or_else(|| DbError::format("WAL line is missing its prefix"))?;
        let json = match &self.cipher {
            Some(cipher) => {
                let padded = cipher.decrypt_bytes(body)?;
                unpad_plaintext(&padded)?
            }
            None => body.as_bytes().to_vec(),
        };
        serde_json::from_slice(&json)
            .map_err(|e| DbError::format(format!("WAL entry is not valid JSON: {e}")))
    }

    /// Advances the sequence counter past a replayed entry.
    pub(crate) fn observe_sequence(&self, sequence: u64) {
        self.next_seq.fetch_max(sequence + 1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("wal_dir", &self.wal_dir)
            .field("encrypted", &self.cipher.is_some())
            .field("sync_writes", &self.sync_writes)
            .finish_non_exhaustive()
    }
}

/// Loads the WAL salt, creating it on first open.
fn load_or_create_salt(path: &Path) -> DbResult<[u8; SALT_SIZE]> {
    if path.exists() {
        let bytes = fs::read(path)?;
        let salt: [u8; SALT_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            DbError::format(format!(
                "WAL salt must be {SALT_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        return Ok(salt);
    }

    let salt = generate_salt();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    {
        use std::io::Write;
        let mut file = fs::File::create(path)?;
        file.write_all(&salt)?;
        file.sync_all()?;
    }
    Ok(salt)
}
