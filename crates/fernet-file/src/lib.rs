//! Seekable, chunked, authenticated-encryption file streams.
//!
//! A [`FernetFile`] looks like an ordinary read/write/seek stream of
//! cleartext bytes; the backing store only ever holds a small metadata
//! header and a sequence of independently encrypted, authenticated
//! fixed-size chunks. Random-access reads and writes decrypt and
//! re-encrypt just the chunks they touch, so memory use is bounded by one
//! chunk rather than the whole payload.

pub mod crypto;
pub mod error;
pub mod fs;

pub use crypto::fernet::{Fernet, TokenError};
pub use crypto::keys::{FernetKey, KeyError};
pub use fs::file::{DEFAULT_CHUNK_SIZE, FernetFile, FileError};
pub use fs::store::{Backing, MemoryStore};

/// Generate a fresh random key for a new encrypted file.
#[must_use]
pub fn generate_key() -> FernetKey {
    FernetKey::generate()
}
