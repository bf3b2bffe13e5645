//! Key material for Fernet token encryption.
//!
//! A Fernet key is 32 opaque bytes: the first half keys the HMAC-SHA256
//! signature, the second half keys AES-128-CBC. The interchange form is the
//! urlsafe base64 encoding of those 32 bytes (44 characters, padded).

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

/// Raw key length in bytes.
pub const KEY_SIZE: usize = 32;

/// Length of each key half (signing, encryption).
const HALF_SIZE: usize = KEY_SIZE / 2;

/// Errors raised while parsing key material.
#[derive(Error, Debug)]
pub enum KeyError {
    /// The decoded key is not exactly [`KEY_SIZE`] bytes.
    #[error("key must be {KEY_SIZE} bytes, got {actual}")]
    InvalidLength { actual: usize },

    /// The key is neither raw bytes nor valid urlsafe base64.
    #[error("key is not valid urlsafe base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
}

/// A validated 32-byte Fernet key, split into its signing and encryption
/// halves.
///
/// # Security
///
/// Both halves are wrapped in [`Zeroizing`] so the material is erased when
/// the key is dropped. The `Debug` implementation redacts the key.
pub struct FernetKey {
    signing: Zeroizing<[u8; HALF_SIZE]>,
    encryption: Zeroizing<[u8; HALF_SIZE]>,
}

impl FernetKey {
    /// Generate a fresh random key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        rand::rng().fill_bytes(bytes.as_mut());
        Self::split(&bytes)
    }

    /// Build a key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != KEY_SIZE {
            return Err(KeyError::InvalidLength {
                actual: bytes.len(),
            });
        }
        let mut raw = Zeroizing::new([0u8; KEY_SIZE]);
        raw.copy_from_slice(bytes);
        Ok(Self::split(&raw))
    }

    /// Build a key from its urlsafe base64 interchange form.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let decoded = Zeroizing::new(URL_SAFE.decode(encoded.trim())?);
        Self::from_bytes(&decoded)
    }

    /// Accept key material in either form: 32 raw bytes, or their urlsafe
    /// base64 encoding.
    pub fn parse(material: &[u8]) -> Result<Self, KeyError> {
        if material.len() == KEY_SIZE {
            return Self::from_bytes(material);
        }
        let text = std::str::from_utf8(material).map_err(|_| KeyError::InvalidLength {
            actual: material.len(),
        })?;
        Self::from_base64(text)
    }

    /// The urlsafe base64 interchange form of the key.
    #[must_use]
    pub fn to_base64(&self) -> String {
        let mut raw = Zeroizing::new([0u8; KEY_SIZE]);
        raw[..HALF_SIZE].copy_from_slice(self.signing.as_ref());
        raw[HALF_SIZE..].copy_from_slice(self.encryption.as_ref());
        URL_SAFE.encode(raw.as_ref())
    }

    pub(crate) fn signing_half(&self) -> &[u8; HALF_SIZE] {
        &self.signing
    }

    pub(crate) fn encryption_half(&self) -> &[u8; HALF_SIZE] {
        &self.encryption
    }

    fn split(raw: &[u8; KEY_SIZE]) -> Self {
        let mut signing = Zeroizing::new([0u8; HALF_SIZE]);
        let mut encryption = Zeroizing::new([0u8; HALF_SIZE]);
        signing.copy_from_slice(&raw[..HALF_SIZE]);
        encryption.copy_from_slice(&raw[HALF_SIZE..]);
        Self {
            signing,
            encryption,
        }
    }
}

impl fmt::Debug for FernetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FernetKey")
            .field("signing", &"[REDACTED]")
            .field("encryption", &"[REDACTED]")
            .finish()
    }
}
