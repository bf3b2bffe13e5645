//! The tail metadata header at the front of every encrypted store.
//!
//! Two little-endian unsigned integers of [`META_FIELD_SIZE`] bytes each:
//! the index of the highest chunk ever written, and how many zero bytes of
//! padding that chunk's plaintext carries. Everything the engine knows
//! about the logical file size derives from this pair. A store written
//! with one field width must be read with the same width.

use std::io::SeekFrom;

use tracing::trace;

use super::file::FileError;
use super::store::{Backing, read_at_most};

/// Width of each metadata field in bytes. Bounds both the chunk size and
/// the number of chunks at `2^(8 * META_FIELD_SIZE) - 1`.
pub const META_FIELD_SIZE: usize = 8;

/// Total header size.
pub const HEADER_SIZE: usize = 2 * META_FIELD_SIZE;

/// Tail-chunk metadata: which chunk is the last, and how much of it is
/// zero padding rather than payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TailMeta {
    /// Index of the highest chunk that has ever been written.
    pub last_chunk: u64,
    /// Zero bytes appended to the tail chunk's plaintext to fill it out to
    /// the chunk size. Meaningless for interior chunks, which are always
    /// fully used.
    pub padding: u64,
}

impl TailMeta {
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..META_FIELD_SIZE].copy_from_slice(&self.last_chunk.to_le_bytes());
        bytes[META_FIELD_SIZE..].copy_from_slice(&self.padding.to_le_bytes());
        bytes
    }

    #[must_use]
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let last_chunk = u64::from_le_bytes(bytes[..META_FIELD_SIZE].try_into().unwrap());
        let padding = u64::from_le_bytes(bytes[META_FIELD_SIZE..].try_into().unwrap());
        Self { last_chunk, padding }
    }
}

/// Read the header from the front of the store.
///
/// `Ok(None)` means the store is empty and has no header yet; a non-empty
/// store shorter than [`HEADER_SIZE`] is corrupt.
pub(crate) fn read_tail<B: Backing>(backing: &mut B) -> Result<Option<TailMeta>, FileError> {
    backing.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; HEADER_SIZE];
    match read_at_most(backing, &mut buf)? {
        0 => Ok(None),
        HEADER_SIZE => {
            let meta = TailMeta::decode(&buf);
            trace!(
                last_chunk = meta.last_chunk,
                padding = meta.padding,
                "read tail metadata"
            );
            Ok(Some(meta))
        }
        actual => Err(FileError::TruncatedHeader {
            expected: HEADER_SIZE,
            actual,
        }),
    }
}

/// Write the header at the front of the store.
pub(crate) fn write_tail<B: Backing>(backing: &mut B, meta: TailMeta) -> Result<(), FileError> {
    backing.seek(SeekFrom::Start(0))?;
    backing.write_all(&meta.encode())?;
    Ok(())
}
