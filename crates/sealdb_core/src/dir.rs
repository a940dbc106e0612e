//! Database directory management.
//!
//! This module owns the on-disk layout:
//!
//! ```text
//! <db_path>/
//! ├─ LOCK                # advisory lock for single-process access
//! ├─ <table>.db          # encoded table files
//! ├─ indexes/
//! │  └─ <index>.idx      # encoded index files
//! └─ wal/
//!    ├─ .salt            # 32-byte WAL key-derivation salt
//!    └─ wal-<ms>.log     # newline-delimited WAL segments
//! ```
//!
//! The LOCK file ensures only one process writes the directory at a
//! time. Table and index files are replaced atomically via
//! write-to-temp, rename, and a directory fsync.

use crate::error::{DbError, DbResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const INDEXES_DIR: &str = "indexes";
const WAL_DIR: &str = "wal";
const SALT_FILE: &str = ".salt";
const TABLE_EXT: &str = "db";
const INDEX_EXT: &str = "idx";

/// Manages the database directory structure and file locking.
///
/// Holds an exclusive advisory lock for its lifetime; a second open of
/// the same directory fails with [`DbError::DatabaseLocked`].
#[derive(Debug)]
pub struct DatabaseDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle, held for exclusive access.
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the directory doesn't exist and `create_if_missing` is false
    /// - another process holds the lock (`DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> DbResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(DbError::format(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(DbError::format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(DbError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the root directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of a table's file.
    ///
    /// # Errors
    ///
    /// Returns a validation error for names that cannot map to a file.
    pub fn table_path(&self, table: &str) -> DbResult<PathBuf> {
        validate_name(table)?;
        Ok(self.path.join(format!("{table}.{TABLE_EXT}")))
    }

    /// Returns the path of an index's file.
    ///
    /// # Errors
    ///
    /// Returns a validation error for names that cannot map to a file.
    pub fn index_path(&self, index: &str) -> DbResult<PathBuf> {
        validate_name(index)?;
        Ok(self.indexes_dir().join(format!("{index}.{INDEX_EXT}")))
    }

    /// Returns the indexes directory path.
    #[must_use]
    pub fn indexes_dir(&self) -> PathBuf {
        self.path.join(INDEXES_DIR)
    }

    /// Returns the WAL directory path.
    #[must_use]
    pub fn wal_dir(&self) -> PathBuf {
        self.path.join(WAL_DIR)
    }

    /// Returns the WAL salt file path.
    #[must_use]
    pub fn salt_path(&self) -> PathBuf {
        self.wal_dir().join(SALT_FILE)
    }

    /// Lists the names of all tables with a file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn list_tables(&self) -> DbResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TABLE_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Lists the names of all indexes with a file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the indexes directory cannot be read.
    pub fn list_indexes(&self) -> DbResult<Vec<String>> {
        let dir = self.indexes_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(INDEX_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Writes a file atomically.
    ///
    /// Write-then-rename pattern for crash safety:
    /// 1. write the bytes to `<file>.tmp` and sync it
    /// 2. rename over the destination
    /// 3. fsync the containing directory so the rename is durable
    ///
    /// # Errors
    ///
    /// Returns an error on any I/O failure.
    pub fn write_atomic(&self, path: &Path, data: &[u8]) -> DbResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");

        {
            use std::io::Write;
            let mut file = File::create(&temp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, path)?;
        sync_dir(path.parent().unwrap_or(&self.path))?;
        Ok(())
    }

    /// Removes a file and fsyncs its directory.
    ///
    /// Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn remove_file(&self, path: &Path) -> DbResult<()> {
        if path.exists() {
            fs::remove_file(path)?;
            sync_dir(path.parent().unwrap_or(&self.path))?;
        }
        Ok(())
    }
}

/// Rejects names that would escape the directory or collide with the
/// layout's own files.
fn validate_name(name: &str) -> DbResult<()> {
    if name.is_empty() {
        return Err(DbError::validation("name must not be empty"));
    }
    let ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !ok {
        return Err(DbError::validation(format!(
            "name '{name}' may only contain ASCII letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> DbResult<()> {
    // On Unix, fsync on a directory makes the entry list durable
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> DbResult<()> {
    // NTFS journaling covers metadata durability on Windows
    Ok(())
}
