//! Raw Fernet token encryption (the binary, non-base64 variant).
//!
//! A token authenticates and encrypts one plaintext buffer:
//!
//! | Offset | Size | Description |
//! |--------|------|-------------|
//! | 0      | 1    | Version, `0x80` |
//! | 1      | 8    | Unix timestamp, big-endian |
//! | 9      | 16   | IV for AES-128-CBC |
//! | 25     | n    | AES-128-CBC ciphertext of the PKCS#7-padded plaintext |
//! | 25+n   | 32   | HMAC-SHA256 over everything before it |
//!
//! Encrypt-then-MAC: decryption verifies the signature in constant time
//! before touching the ciphertext. Timestamps are recorded but not enforced
//! (tokens never expire).

use aes::Aes128;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use ring::hmac;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;

use super::keys::FernetKey;

// ============================================================================
// Constants
// ============================================================================

/// Token format version byte.
pub const VERSION: u8 = 0x80;

/// IV size for AES-128-CBC (16 bytes).
pub const IV_SIZE: usize = 16;

/// HMAC-SHA256 output size (32 bytes).
pub const MAC_SIZE: usize = 32;

/// Timestamp field size (big-endian seconds since the Unix epoch).
pub const TIMESTAMP_SIZE: usize = 8;

/// AES block size; PKCS#7 pads the plaintext up to a multiple of this.
pub const BLOCK_SIZE: usize = 16;

/// Fixed framing around the CBC payload: version + timestamp + IV + MAC.
pub const TOKEN_OVERHEAD: usize = 1 + TIMESTAMP_SIZE + IV_SIZE + MAC_SIZE;

/// Smallest well-formed token: the framing plus one padded cipher block.
pub const MIN_TOKEN_SIZE: usize = TOKEN_OVERHEAD + BLOCK_SIZE;

/// Offset of the CBC ciphertext within a token.
const PAYLOAD_OFFSET: usize = 1 + TIMESTAMP_SIZE + IV_SIZE;

// ============================================================================
// Type Aliases
// ============================================================================

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum TokenError {
    /// The token is shorter than the minimum framing.
    #[error("token too short: expected at least {MIN_TOKEN_SIZE} bytes, got {actual}")]
    Truncated { actual: usize },

    /// The leading version byte is not [`VERSION`].
    #[error("unsupported token version {actual:#04x}")]
    UnsupportedVersion { actual: u8 },

    /// HMAC verification failed - possible tampering or wrong key.
    #[error("token authentication failed: possible tampering or wrong key")]
    Authentication,

    /// The authenticated payload is not a padded block sequence. Since the
    /// signature already verified, this indicates a defective writer rather
    /// than tampering.
    #[error("token payload has invalid block padding")]
    Padding,
}

// ============================================================================
// Cipher
// ============================================================================

/// Deterministic ciphertext expansion for a plaintext of `plain_len` bytes.
///
/// Every token grows by the fixed framing plus PKCS#7 padding up to the next
/// block boundary; a plaintext already on a boundary gains one full block.
#[must_use]
pub const fn expansion(plain_len: usize) -> usize {
    TOKEN_OVERHEAD + BLOCK_SIZE - plain_len % BLOCK_SIZE
}

/// Stateless Fernet cipher bound to one key.
pub struct Fernet {
    key: FernetKey,
}

impl Fernet {
    #[must_use]
    pub fn new(key: FernetKey) -> Self {
        Self { key }
    }

    /// Encrypt `plaintext` into a fresh token with a random IV and the
    /// current timestamp. The output length is
    /// `plaintext.len() + expansion(plaintext.len())`.
    #[must_use]
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; IV_SIZE];
        rand::rng().fill_bytes(&mut iv);
        self.encrypt_with(unix_timestamp(), &iv, plaintext)
    }

    fn encrypt_with(&self, timestamp: u64, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes128CbcEnc::new(self.key.encryption_half().into(), iv.into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut token = Vec::with_capacity(TOKEN_OVERHEAD + ciphertext.len());
        token.push(VERSION);
        token.extend_from_slice(&timestamp.to_be_bytes());
        token.extend_from_slice(iv);
        token.extend_from_slice(&ciphertext);

        let mac_key = hmac::Key::new(hmac::HMAC_SHA256, self.key.signing_half());
        let mac = hmac::sign(&mac_key, &token);
        token.extend_from_slice(mac.as_ref());
        token
    }

    /// Verify and decrypt a token.
    pub fn decrypt(&self, token: &[u8]) -> Result<Vec<u8>, TokenError> {
        if token.len() < MIN_TOKEN_SIZE {
            return Err(TokenError::Truncated {
                actual: token.len(),
            });
        }
        if token[0] != VERSION {
            return Err(TokenError::UnsupportedVersion { actual: token[0] });
        }

        let (signed, expected_mac) = token.split_at(token.len() - MAC_SIZE);

        let mac_key = hmac::Key::new(hmac::HMAC_SHA256, self.key.signing_half());
        let computed_mac = hmac::sign(&mac_key, signed);
        if !bool::from(computed_mac.as_ref().ct_eq(expected_mac)) {
            warn!("token HMAC verification failed");
            return Err(TokenError::Authentication);
        }

        let iv: [u8; IV_SIZE] = signed[1 + TIMESTAMP_SIZE..PAYLOAD_OFFSET]
            .try_into()
            .unwrap();
        let ciphertext = &signed[PAYLOAD_OFFSET..];
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(TokenError::Padding);
        }

        let cipher = Aes128CbcDec::new(self.key.encryption_half().into(), (&iv).into());
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| TokenError::Padding)
    }
}

fn unix_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
