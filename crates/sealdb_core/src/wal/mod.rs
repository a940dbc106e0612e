//! Write-Ahead Log.
//!
//! Every mutation is recorded as an intent in the WAL before the
//! authoritative table file is rewritten. On open, the log is replayed
//! so a crash between intent and table write converges to the
//! intent-logged state.
//!
//! ## Entry format
//!
//! One entry per line:
//!
//! ```text
//! WAL:iv_hex(32):tag_hex(32):ciphertext_hex(variable)\n
//! ```
//!
//! The plaintext under the AEAD is the UTF-8 JSON of
//! `{sequence, timestamp, operation, checksum}`, padded as
//! `[json | random bytes | length_prefix_be_u32]` up to the configured
//! block size (next multiple for oversized entries). Random padding
//! hides entry sizes; the trailing length prefix makes unpadding
//! unambiguous where PKCS#7-style padding is not.
//!
//! Entries are encrypted under a key derived from the master key via
//! PBKDF2 over the salt at `wal/.salt`, so recovery material never
//! shares keys with table ciphertext.
//!
//! ## Recovery policy
//!
//! Replay enumerates `wal-<ms>.log` segments in lexicographic
//! (equals timestamp) order. A failing entry (undecryptable,
//! checksum mismatch, or an operation the engine cannot apply) is
//! recorded in the recovery summary and **does not** abort replay of
//! subsequent entries. A file that cannot be read at all contributes a
//! single summary record. The summary is surfaced through the
//! database facade for diagnostics.

mod entry;
mod recovery;
mod writer;

pub use entry::{operation_checksum, Operation, WalEntry};
pub use recovery::RecoveryFailure;
pub use writer::WalManager;
