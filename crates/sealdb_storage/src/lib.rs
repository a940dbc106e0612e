//! # SealDB Storage
//!
//! Byte-store backends for SealDB.
//!
//! This crate holds the lowest-level storage seam of the engine. A
//! backend is an **opaque append-oriented byte store**: it knows nothing
//! about WAL segments, table files, or encryption. All format
//! interpretation lives in `sealdb_core`.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - persistent storage through OS file APIs
//! - [`InMemoryBackend`] - ephemeral storage for tests
//!
//! ## Example
//!
//! ```rust
//! use sealdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
