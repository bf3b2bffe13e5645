//! Chunk codec: the translation between fixed-size plaintext chunks and
//! the Fernet tokens stored on disk.
//!
//! Chunk `i` occupies the byte range
//! `[HEADER_SIZE + i * C, HEADER_SIZE + (i + 1) * C)` of the backing
//! store, where `C` is the plaintext chunk size plus the deterministic
//! token expansion. Chunks are encrypted independently, so reads and
//! writes at arbitrary offsets touch only the chunks they overlap.

use std::io::SeekFrom;

use tracing::{trace, warn};

use crate::crypto::fernet::{self, Fernet};
use crate::crypto::keys::FernetKey;

use super::file::FileError;
use super::header::{HEADER_SIZE, TailMeta};
use super::store::{Backing, read_at_most};

/// Encrypts and decrypts whole chunks at their on-disk positions.
///
/// The codec is stateless: tail metadata is owned by the stream engine and
/// passed in where the tail chunk's padding has to be stripped.
pub struct ChunkCodec {
    fernet: Fernet,
    plain_size: usize,
    cipher_size: usize,
}

impl ChunkCodec {
    #[must_use]
    pub fn new(key: FernetKey, plain_size: usize) -> Self {
        let cipher_size = plain_size + fernet::expansion(plain_size);
        Self {
            fernet: Fernet::new(key),
            plain_size,
            cipher_size,
        }
    }

    /// Plaintext bytes per chunk.
    #[must_use]
    pub fn plain_size(&self) -> usize {
        self.plain_size
    }

    /// On-disk bytes per chunk.
    #[must_use]
    pub fn cipher_size(&self) -> usize {
        self.cipher_size
    }

    /// Byte offset of chunk `index` in the backing store.
    #[must_use]
    pub fn chunk_offset(&self, index: u64) -> u64 {
        HEADER_SIZE as u64 + index * self.cipher_size as u64
    }

    /// Read and decrypt one chunk.
    ///
    /// `Ok(None)` means the chunk has never been materialised (the store
    /// ends before it). A partial ciphertext block is corruption; a full
    /// block that fails authentication is tampering or a wrong key. When
    /// `index` is the tail chunk, its zero padding is stripped.
    pub fn read_chunk<B: Backing>(
        &self,
        backing: &mut B,
        index: u64,
        tail: Option<TailMeta>,
    ) -> Result<Option<Vec<u8>>, FileError> {
        backing.seek(SeekFrom::Start(self.chunk_offset(index)))?;

        let mut ciphertext = vec![0u8; self.cipher_size];
        let n = read_at_most(backing, &mut ciphertext)?;
        if n == 0 {
            trace!(chunk = index, "chunk not materialised");
            return Ok(None);
        }
        if n < self.cipher_size {
            warn!(
                chunk = index,
                expected = self.cipher_size,
                actual = n,
                "truncated ciphertext chunk"
            );
            return Err(FileError::TruncatedChunk {
                index,
                expected: self.cipher_size,
                actual: n,
            });
        }

        let mut plaintext = self.fernet.decrypt(&ciphertext).map_err(|err| {
            warn!(chunk = index, %err, "chunk failed authentication");
            FileError::ChunkAuthentication { index }
        })?;

        if let Some(tail) = tail
            && index == tail.last_chunk
            && tail.padding > 0
        {
            plaintext.truncate(self.plain_size.saturating_sub(tail.padding as usize));
        }

        trace!(chunk = index, len = plaintext.len(), "chunk decrypted");
        Ok(Some(plaintext))
    }

    /// Pad, encrypt and write one chunk; returns the zero padding applied.
    ///
    /// The header update that may follow a tail-extending write is the
    /// engine's job, not the codec's.
    pub fn write_chunk<B: Backing>(
        &self,
        backing: &mut B,
        index: u64,
        plain: &[u8],
    ) -> Result<u64, FileError> {
        debug_assert!(plain.len() <= self.plain_size);
        let padding = self.plain_size - plain.len();

        let mut padded = vec![0u8; self.plain_size];
        padded[..plain.len()].copy_from_slice(plain);
        let token = self.fernet.encrypt(&padded);

        backing.seek(SeekFrom::Start(self.chunk_offset(index)))?;
        backing.write_all(&token)?;

        trace!(chunk = index, padding, "chunk written");
        Ok(padding as u64)
    }
}

#[cfg(test)]
mod tests {
    use crate::fs::store::MemoryStore;

    use super::*;

    fn codec(plain_size: usize) -> ChunkCodec {
        ChunkCodec::new(FernetKey::generate(), plain_size)
    }

    #[test]
    fn geometry_follows_token_expansion() {
        let codec = codec(256);
        assert_eq!(codec.cipher_size(), 256 + fernet::expansion(256));
        assert_eq!(codec.chunk_offset(0), HEADER_SIZE as u64);
        assert_eq!(
            codec.chunk_offset(3),
            HEADER_SIZE as u64 + 3 * codec.cipher_size() as u64
        );
    }

    #[test]
    fn chunk_roundtrip() {
        let codec = codec(64);
        let mut store = MemoryStore::new();

        codec.write_chunk(&mut store, 0, b"first chunk").unwrap();
        let tail = TailMeta {
            last_chunk: 0,
            padding: (64 - b"first chunk".len()) as u64,
        };

        let plain = codec.read_chunk(&mut store, 0, Some(tail)).unwrap();
        assert_eq!(plain.as_deref(), Some(b"first chunk".as_slice()));
    }

    #[test]
    fn interior_chunks_keep_their_padding_bytes() {
        // Once the tail moves past a chunk, its padding zeros become
        // payload.
        let codec = codec(8);
        let mut store = MemoryStore::new();

        codec.write_chunk(&mut store, 0, b"abc").unwrap();
        let tail = TailMeta {
            last_chunk: 4,
            padding: 2,
        };

        let plain = codec.read_chunk(&mut store, 0, Some(tail)).unwrap().unwrap();
        assert_eq!(plain, b"abc\0\0\0\0\0");
    }

    #[test]
    fn missing_chunk_reads_as_none() {
        let codec = codec(32);
        let mut store = MemoryStore::new();
        assert_eq!(codec.read_chunk(&mut store, 5, None).unwrap(), None);
    }

    #[test]
    fn partial_ciphertext_is_corrupt() {
        let codec = codec(32);
        let mut store = MemoryStore::new();
        codec.write_chunk(&mut store, 0, b"data").unwrap();

        let mut image = store.into_inner();
        image.truncate(image.len() - 10);
        let mut store = MemoryStore::from_vec(image);

        let result = codec.read_chunk(&mut store, 0, None);
        match result {
            Err(FileError::TruncatedChunk { index, actual, .. }) => {
                assert_eq!(index, 0);
                assert_eq!(actual, codec.cipher_size() - 10);
            }
            other => panic!("expected TruncatedChunk, got: {other:?}"),
        }
    }

    #[test]
    fn flipped_ciphertext_bit_fails_authentication() {
        let codec = codec(32);
        let mut store = MemoryStore::new();
        codec.write_chunk(&mut store, 0, b"data").unwrap();

        let mut image = store.into_inner();
        let target = HEADER_SIZE + 30;
        image[target] ^= 0x01;
        let mut store = MemoryStore::from_vec(image);

        assert!(matches!(
            codec.read_chunk(&mut store, 0, None),
            Err(FileError::ChunkAuthentication { index: 0 })
        ));
    }
}
