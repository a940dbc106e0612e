//! Cryptographic primitives for SealDB.
//!
//! All at-rest confidentiality flows through this module: table and
//! index files are sealed as AES-256-GCM blobs, and the WAL uses a key
//! derived from the master key so recovery material never shares
//! ciphertext keys with the main store.
//!
//! ## Blob format
//!
//! ```text
//! iv_hex(32) : tag_hex(32) : ciphertext_hex(variable)
//! ```
//!
//! The IV field is 16 bytes on the wire for compatibility with files
//! written by earlier releases; the first 12 bytes feed the GCM
//! nonce. Every call draws a fresh random IV, which rules out the
//! nonce-reuse class of bugs. The authentication tag is 128 bits.
//!
//! ## Key discipline
//!
//! - Keys are 32 bytes from a CSPRNG and zeroized on drop.
//! - The WAL key is derived via PBKDF2-HMAC-SHA256 (100 000
//!   iterations) over a 32-byte salt stored beside the log.
//! - Derivation refuses a master key that has already been zeroized.

use crate::error::{DbError, DbResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Width of the IV field on the wire (legacy format).
pub const IV_SIZE: usize = 16;
/// Bytes of the IV actually fed to GCM as the nonce.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Size of the WAL key-derivation salt in bytes.
pub const SALT_SIZE: usize = 32;
/// PBKDF2 iteration count. A compatibility anchor: raising it breaks
/// files written by earlier versions.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// The master encryption key for a database.
///
/// Zeroized when dropped. [`MasterKey::zeroize`] may also be called
/// explicitly during shutdown, after which the key refuses derivation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Generates a new random master key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error unless the slice is exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(DbError::format(format!(
                "master key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Returns the key bytes.
    ///
    /// # Security
    ///
    /// Never log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Returns true once the key material has been wiped.
    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Key derived from the master key for WAL entry encryption.
///
/// Deriving a separate key isolates replay and recovery material from
/// the main ciphertext. Same zeroize discipline as [`MasterKey`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WalKey {
    bytes: [u8; KEY_SIZE],
}

impl WalKey {
    /// Returns the key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for WalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// Generates a fresh random WAL salt.
#[must_use]
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derives the WAL key from the master key and a stored salt.
///
/// PBKDF2-HMAC-SHA256 with [`PBKDF2_ITERATIONS`] rounds and a 32-byte
/// output.
///
/// # Errors
///
/// Returns an error if the master key has been zeroized.
pub fn derive_wal_key(master: &MasterKey, salt: &[u8; SALT_SIZE]) -> DbResult<WalKey> {
    if master.is_spent() {
        return Err(DbError::state(
            "cannot derive WAL key: master key has been zeroized",
        ));
    }
    let mut bytes = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(master.as_bytes(), salt, PBKDF2_ITERATIONS, &mut bytes);
    Ok(WalKey { bytes })
}

/// Stateless AES-256-GCM sealer/opener over hex-triple blobs.
///
/// One cipher instance exists per key; table/index files use the
/// master key, WAL entries use the derived key.
pub struct BlobCipher {
    cipher: Aes256Gcm,
}

impl BlobCipher {
    /// Creates a cipher over the master key.
    #[must_use]
    pub fn new(key: &MasterKey) -> Self {
        Self::from_key_bytes(key.as_bytes())
    }

    /// Creates a cipher over the derived WAL key.
    #[must_use]
    pub fn for_wal(key: &WalKey) -> Self {
        Self::from_key_bytes(key.as_bytes())
    }

    fn from_key_bytes(bytes: &[u8; KEY_SIZE]) -> Self {
        let key = GenericArray::from_slice(bytes);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypts raw bytes into an `iv:tag:ciphertext` hex triple.
    ///
    /// # Errors
    ///
    /// Returns an error if the AEAD encryption fails.
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> DbResult<String> {
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv[..NONCE_SIZE]);

        // aes-gcm appends the 16-byte tag to the ciphertext
        let mut sealed = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| DbError::auth_failed("encryption error"))?;
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(sealed)
        ))
    }

    /// Decrypts an `iv:tag:ciphertext` hex triple back into bytes.
    ///
    /// Validates the field layout strictly before touching the cipher:
    /// exactly three colon-separated fields, a 16-byte IV, a 16-byte
    /// tag, and a non-empty ciphertext.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Format`] for layout violations and
    /// [`DbError::AuthFailed`] when the tag does not verify.
    pub fn decrypt_bytes(&self, blob: &str) -> DbResult<Vec<u8>> {
        let mut fields = blob.splitn(4, ':');
        let iv_hex = fields.next().unwrap_or("");
        let tag_hex = fields
            .next()
            .ok_or_else(|| DbError::format("encrypted blob is missing the tag field"))?;
        let ct_hex = fields
            .next()
            .ok_or_else(|| DbError::format("encrypted blob is missing the ciphertext field"))?;
        if fields.next().is_some() {
            return Err(DbError::format(
                "encrypted blob has more than three fields",
            ));
        }

        let iv = hex::decode(iv_hex)
            .map_err(|_| DbError::format("encrypted blob IV is not valid hex"))?;
        if iv.len() != IV_SIZE {
            return Err(DbError::format(format!(
                "encrypted blob IV must be {IV_SIZE} bytes, got {}",
                iv.len()
            )));
        }
        let tag = hex::decode(tag_hex)
            .map_err(|_| DbError::format("encrypted blob tag is not valid hex"))?;
        if tag.len() != TAG_SIZE {
            return Err(DbError::format(format!(
                "encrypted blob tag must be {TAG_SIZE} bytes, got {}",
                tag.len()
            )));
        }
        if ct_hex.is_empty() {
            return Err(DbError::format("encrypted blob ciphertext is empty"));
        }
        let ciphertext = hex::decode(ct_hex)
            .map_err(|_| DbError::format("encrypted blob ciphertext is not valid hex"))?;

        let nonce = Nonce::from_slice(&iv[..NONCE_SIZE]);
        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        self.cipher
            .decrypt(nonce, sealed.as_slice())
            .map_err(|_| DbError::auth_failed("GCM tag verification failed"))
    }

    /// Encrypts a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or encryption fails.
    pub fn encrypt_json(&self, value: &serde_json::Value) -> DbResult<String> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| DbError::format(format!("cannot serialize payload: {e}")))?;
        self.encrypt_bytes(&plaintext)
    }

    /// Decrypts a blob and parses the plaintext as JSON.
    ///
    /// A plaintext that authenticates but is not JSON is treated as an
    /// authentication failure: every legitimate payload in this format
    /// is JSON, so anything else means key or format confusion.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::AuthFailed`] when the tag does not verify or
    /// the plaintext is not valid JSON.
    pub fn decrypt_json(&self, blob: &str) -> DbResult<serde_json::Value> {
        let plaintext = self.decrypt_bytes(blob)?;
        serde_json::from_slice(&plaintext)
            .map_err(|_| DbError::auth_failed("decrypted payload is not valid JSON"))
    }
}

impl std::fmt::Debug for BlobCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobCipher")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}
