//! File codec: the encrypt/compress boundary for table and index files.
//!
//! Write path: serialize → encrypt → (optionally) gzip. Read path is
//! the inverse, with one deliberate asymmetry: gunzip is *attempted*
//! and a failure downgrades to the raw bytes. Compression runs after
//! encryption so a broken gzip stream can never take authentication
//! down with it; the cost is that ciphertext compresses poorly.
//!
//! With `encrypt` disabled the codec stores cleartext JSON. That mode
//! exists only for compatibility and is not the default.

use crate::crypto::BlobCipher;
use crate::error::{DbError, DbResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Encodes and decodes whole-file payloads.
pub struct FileCodec {
    cipher: Option<BlobCipher>,
    compression: bool,
}

impl FileCodec {
    /// Creates a codec that encrypts with the given cipher.
    #[must_use]
    pub fn new(cipher: BlobCipher, compression: bool) -> Self {
        Self {
            cipher: Some(cipher),
            compression,
        }
    }

    /// Creates a cleartext codec (compatibility fallback).
    #[must_use]
    pub fn cleartext(compression: bool) -> Self {
        Self {
            cipher: None,
            compression,
        }
    }

    /// Returns true when this codec encrypts.
    #[must_use]
    pub fn is_encrypting(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encodes a payload into file bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, encryption, or compression
    /// fails.
    pub fn encode<T: Serialize>(&self, payload: &T) -> DbResult<Vec<u8>> {
        let value = serde_json::to_value(payload)
            .map_err(|e| DbError::format(format!("cannot serialize payload: {e}")))?;

        let body = match &self.cipher {
            Some(cipher) => cipher.encrypt_json(&value)?.into_bytes(),
            None => serde_json::to_vec(&value)
                .map_err(|e| DbError::format(format!("cannot serialize payload: {e}")))?,
        };

        if self.compression {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body)?;
            Ok(encoder.finish()?)
        } else {
            Ok(body)
        }
    }

    /// Decodes file bytes back into a payload.
    ///
    /// `context` names the file being read; it appears in error
    /// messages so a failing table or index is identifiable.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::AuthFailed`] on tag mismatch or a non-JSON
    /// plaintext, and [`DbError::Format`] for layout violations.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8], context: &str) -> DbResult<T> {
        let body = if self.compression {
            match gunzip(bytes) {
                Ok(raw) => raw,
                // Not gzip after all; treat as uncompressed
                Err(_) => bytes.to_vec(),
            }
        } else {
            bytes.to_vec()
        };

        let value = match &self.cipher {
            Some(cipher) => {
                let blob = std::str::from_utf8(&body).map_err(|_| {
                    DbError::format(format!("{context}: encrypted file is not UTF-8"))
                })?;
                cipher.decrypt_json(blob.trim_end())?
            }
            None => serde_json::from_slice(&body)
                .map_err(|e| DbError::format(format!("{context}: invalid JSON: {e}")))?,
        };

        serde_json::from_value(value)
            .map_err(|e| DbError::format(format!("{context}: unexpected payload shape: {e}")))
    }
}

impl std::fmt::Debug for FileCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCodec")
            .field("encrypting", &self.is_encrypting())
            .field("compression", &self.compression)
            .finish()
    }
}

fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
