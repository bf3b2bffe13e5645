//! The seekable stream engine.
//!
//! [`FernetFile`] presents a read/write/seek stream of cleartext bytes over
//! a [`Backing`] store that only ever holds independently encrypted,
//! authenticated chunks. Operations at arbitrary offsets decrypt and
//! re-encrypt only the chunks they touch, so peak memory stays bounded by
//! one chunk regardless of payload size.
//!
//! The engine keeps a single cached chunk. Moving to another chunk writes
//! the cached one back first if it was modified; flushing the chunk that
//! is (or becomes) the tail also rewrites the metadata header. The cursor
//! is stored split as `(chunk_index, intra_offset)` and normalised in one
//! place.

use std::fs::File;
use std::io::{self, SeekFrom};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use crate::crypto::keys::{FernetKey, KeyError};

use super::chunk::ChunkCodec;
use super::header::{self, TailMeta};
use super::store::Backing;

/// Default plaintext chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum FileError {
    /// The chunk size must be a positive number of bytes.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    /// The key material was rejected.
    #[error("key rejected: {0}")]
    Key(#[from] KeyError),

    /// A chunk's ciphertext failed authentication - possible tampering or
    /// wrong key. Other chunks remain readable.
    #[error("chunk {index} failed authentication: possible tampering or wrong key")]
    ChunkAuthentication { index: u64 },

    /// A chunk's ciphertext is shorter than the chunk geometry requires.
    #[error("chunk {index} is truncated: expected {expected} bytes, got {actual}")]
    TruncatedChunk {
        index: u64,
        expected: usize,
        actual: usize,
    },

    /// The store is non-empty but shorter than the metadata header.
    #[error("metadata header is truncated: expected {expected} bytes, got {actual}")]
    TruncatedHeader { expected: usize, actual: usize },

    /// The backing store does not support the requested operation.
    #[error("stream does not support {operation}")]
    Unsupported { operation: &'static str },

    /// A seek resolved to a negative position.
    #[error("seek before start of file")]
    SeekBeforeStart,

    /// The stream has been closed.
    #[error("I/O operation on closed stream")]
    Closed,

    /// Backing-store failure, propagated verbatim.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<FileError> for io::Error {
    fn from(err: FileError) -> io::Error {
        match err {
            FileError::Io(inner) => inner,
            FileError::Unsupported { .. } => io::Error::new(io::ErrorKind::Unsupported, err),
            FileError::SeekBeforeStart | FileError::InvalidChunkSize | FileError::Key(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            FileError::ChunkAuthentication { .. }
            | FileError::TruncatedChunk { .. }
            | FileError::TruncatedHeader { .. } => io::Error::new(io::ErrorKind::InvalidData, err),
            FileError::Closed => io::Error::other(err),
        }
    }
}

// ============================================================================
// Chunk cache
// ============================================================================

/// The single resident chunk. `data` holds the chunk's live plaintext,
/// shorter than the chunk size only for the tail (or a never-written)
/// chunk.
struct ChunkSlot {
    index: u64,
    data: Vec<u8>,
    dirty: bool,
}

// ============================================================================
// Stream engine
// ============================================================================

/// A seekable stream of cleartext bytes over an encrypted backing store.
///
/// ```no_run
/// use fernet_file::{FernetFile, FernetKey, DEFAULT_CHUNK_SIZE};
///
/// let key = FernetKey::generate();
/// let mut stream = FernetFile::create(key, "data.fernet", DEFAULT_CHUNK_SIZE)?;
/// stream.write(b"hello")?;
/// stream.seek(std::io::SeekFrom::Start(0))?;
/// let mut buf = Vec::new();
/// stream.read_to_end(&mut buf)?;
/// assert_eq!(buf, b"hello");
/// # Ok::<(), fernet_file::FileError>(())
/// ```
pub struct FernetFile<B: Backing> {
    codec: ChunkCodec,
    /// `None` once the stream is closed.
    backing: Option<B>,
    slot: Option<ChunkSlot>,
    /// `None` until a chunk has been written; the logical size is zero
    /// until then.
    tail: Option<TailMeta>,
    chunk_index: u64,
    intra_offset: usize,
    readable: bool,
    writeable: bool,
    closed: bool,
}

impl FernetFile<File> {
    /// Create an encrypted file at `path`, truncating anything already
    /// there.
    pub fn create<P: AsRef<Path>>(
        key: FernetKey,
        path: P,
        chunk_size: usize,
    ) -> Result<Self, FileError> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::new(key, file, chunk_size)
    }

    /// Open an existing encrypted file for reading and writing.
    ///
    /// The chunk size must match the one the file was written with.
    pub fn open<P: AsRef<Path>>(
        key: FernetKey,
        path: P,
        chunk_size: usize,
    ) -> Result<Self, FileError> {
        let file = File::options().read(true).write(true).open(path)?;
        Self::new(key, file, chunk_size)
    }
}

impl<B: Backing> FernetFile<B> {
    /// Wrap `backing` in an encrypted stream with the given plaintext
    /// chunk size.
    ///
    /// Reads the metadata header if one is present, then probes
    /// writeability by writing the header area back. A backing that
    /// refuses reads or writes yields a write-only or read-only stream;
    /// the unsupported direction fails with [`FileError::Unsupported`].
    #[instrument(level = "debug", skip(key, backing))]
    pub fn new(key: FernetKey, backing: B, chunk_size: usize) -> Result<Self, FileError> {
        if chunk_size == 0 {
            return Err(FileError::InvalidChunkSize);
        }
        let codec = ChunkCodec::new(key, chunk_size);
        let mut backing = backing;

        let (tail, readable) = match header::read_tail(&mut backing) {
            Ok(tail) => (tail, true),
            Err(FileError::Io(err)) => {
                debug!(%err, "backing is not readable");
                (None, false)
            }
            Err(err) => return Err(err),
        };

        // Probe writeability by re-writing the metadata just read (zeros
        // for a fresh store).
        let writeable = match header::write_tail(&mut backing, tail.unwrap_or_default()) {
            Ok(()) => true,
            Err(FileError::Io(err)) => {
                debug!(%err, "backing is not writeable");
                false
            }
            Err(err) => return Err(err),
        };

        debug!(
            chunk_size,
            cipher_chunk_size = codec.cipher_size(),
            readable,
            writeable,
            "opened encrypted stream"
        );

        Ok(Self {
            codec,
            backing: Some(backing),
            slot: None,
            tail,
            chunk_index: 0,
            intra_offset: 0,
            readable,
            writeable,
            closed: false,
        })
    }

    /// Wrap `backing` with the default chunk size.
    pub fn with_default_chunk_size(key: FernetKey, backing: B) -> Result<Self, FileError> {
        Self::new(key, backing, DEFAULT_CHUNK_SIZE)
    }

    /// Wrap `backing` taking key material directly: either 32 raw bytes or
    /// their urlsafe base64 encoding. Malformed material fails with
    /// [`FileError::Key`].
    pub fn with_key_material(
        material: &[u8],
        backing: B,
        chunk_size: usize,
    ) -> Result<Self, FileError> {
        let key = FernetKey::parse(material)?;
        Self::new(key, backing, chunk_size)
    }

    /// The current logical cursor position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.chunk_index * self.codec.plain_size() as u64 + self.intra_offset as u64
    }

    /// The logical size recorded in the metadata header: zero until a
    /// chunk has been written. Bytes sitting unflushed in the cached chunk
    /// are not counted; [`flush`](Self::flush) first for an exact figure.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self.tail {
            Some(tail) => {
                (tail.last_chunk + 1) * self.codec.plain_size() as u64 - tail.padding
            }
            None => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Move the cursor.
    ///
    /// End-relative seeks resolve against the logical size including any
    /// unflushed tail. A seek that resolves to a negative position fails
    /// with [`FileError::SeekBeforeStart`] and leaves the cursor where it
    /// was. On an in-memory backing every origin is treated as
    /// [`SeekFrom::Start`].
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, FileError> {
        self.ensure_open()?;

        let memory = self.backing.as_ref().is_some_and(|b| b.is_memory());
        let target: i128 = if memory {
            match pos {
                SeekFrom::Start(offset) => i128::from(offset),
                SeekFrom::Current(offset) | SeekFrom::End(offset) => i128::from(offset),
            }
        } else {
            match pos {
                SeekFrom::Start(offset) => i128::from(offset),
                SeekFrom::Current(offset) => {
                    i128::from(self.position()) + i128::from(offset)
                }
                SeekFrom::End(offset) => {
                    i128::from(self.logical_size()) + i128::from(offset)
                }
            }
        };

        if target < 0 {
            return Err(FileError::SeekBeforeStart);
        }
        let Ok(target) = u64::try_from(target) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek position overflows the address space",
            )
            .into());
        };

        trace!(target, "seek");
        self.set_position(target);
        Ok(target)
    }

    /// Read up to `buf.len()` bytes at the cursor, returning how many were
    /// filled. Reading at or past end-of-file returns fewer bytes
    /// (possibly zero) and parks the cursor exactly at end-of-file.
    #[instrument(level = "trace", skip(self, buf), fields(len = buf.len(), pos = self.position()))]
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, FileError> {
        self.ensure_open()?;
        if !self.readable {
            return Err(FileError::Unsupported { operation: "read" });
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let plain_size = self.codec.plain_size();
        let mut pos = self.position();

        // Leading segment out of the current chunk.
        let take = (plain_size - self.intra_offset).min(buf.len());
        let intra = self.intra_offset;
        let slot = self.current_chunk()?;
        let avail = slot.data.len().saturating_sub(intra);
        let n = take.min(avail);
        buf[..n].copy_from_slice(&slot.data[intra..intra + n]);
        let mut filled = n;
        // The cursor advances by the requested span even when the chunk
        // came up short; the end-of-file snap below reins it in.
        pos += take as u64;
        let mut remaining = buf.len() - take;

        // Whole and trailing chunks; `pos` is chunk-aligned from here on.
        while remaining > 0 {
            let index = pos / plain_size as u64;
            let span = remaining.min(plain_size);
            let slot = self.chunk(index)?;
            let n = span.min(slot.data.len());
            buf[filled..filled + n].copy_from_slice(&slot.data[..n]);
            filled += n;
            pos += span as u64;
            remaining -= span;
        }

        self.set_position(pos);
        self.snap_to_eof();
        Ok(filled)
    }

    /// Read everything from the cursor to end-of-file.
    ///
    /// Flushes the cached chunk first so the logical size consulted is
    /// exact, then reads `size - position` bytes.
    pub fn read_to_end(&mut self, buf: &mut Vec<u8>) -> Result<usize, FileError> {
        self.ensure_open()?;
        if !self.readable {
            return Err(FileError::Unsupported { operation: "read" });
        }
        self.flush_slot()?;

        let pos = self.position();
        let size = self.len();
        let remaining = usize::try_from(size.saturating_sub(pos)).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "stream too large for memory")
        })?;
        if remaining == 0 {
            self.snap_to_eof();
            return Ok(0);
        }

        let start = buf.len();
        buf.resize(start + remaining, 0);
        let n = self.read(&mut buf[start..])?;
        buf.truncate(start + n);
        Ok(n)
    }

    /// Write all of `buf` at the cursor, advancing it. Returns
    /// `buf.len()`.
    ///
    /// Chunks overwritten in full replace the cache without decrypting the
    /// old contents; a trailing partial chunk is read first so the bytes
    /// past the written span survive.
    #[instrument(level = "trace", skip(self, buf), fields(len = buf.len(), pos = self.position()))]
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, FileError> {
        self.ensure_open()?;
        if !self.writeable {
            return Err(FileError::Unsupported { operation: "write" });
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let plain_size = self.codec.plain_size();
        let mut pos = self.position();
        let mut consumed = 0;

        // Leading segment: splice into the middle of the current chunk.
        if self.intra_offset > 0 {
            let take = (plain_size - self.intra_offset).min(buf.len());
            let intra = self.intra_offset;
            let slot = self.current_chunk()?;
            splice_into(&mut slot.data, intra, &buf[..take]);
            slot.dirty = true;
            consumed = take;
            pos += take as u64;
        }

        // Whole chunks supersede their previous contents entirely, so the
        // cache is replaced without a read.
        while buf.len() - consumed >= plain_size {
            let index = pos / plain_size as u64;
            self.overwrite_chunk(index, buf[consumed..consumed + plain_size].to_vec())?;
            consumed += plain_size;
            pos += plain_size as u64;
        }

        // Trailing partial chunk: load it so bytes past the splice are
        // preserved when overwriting mid-file.
        if consumed < buf.len() {
            let index = pos / plain_size as u64;
            let rest = buf.len() - consumed;
            let slot = self.chunk(index)?;
            splice_into(&mut slot.data, 0, &buf[consumed..]);
            slot.dirty = true;
            pos += rest as u64;
        }

        self.set_position(pos);
        Ok(buf.len())
    }

    /// Write the cached chunk back if it was modified, updating the
    /// metadata header when the flushed chunk extends or rewrites the
    /// tail.
    pub fn flush(&mut self) -> Result<(), FileError> {
        self.ensure_open()?;
        self.flush_slot()
    }

    /// Flush and close the stream. Idempotent; flush failures during close
    /// are swallowed. Every later operation except `close` fails with
    /// [`FileError::Closed`].
    #[instrument(level = "debug", skip(self))]
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.flush_slot() {
            warn!(%err, "discarding dirty chunk on close");
        }
        self.closed = true;
        self.slot = None;
        drop(self.backing.take());
    }

    /// Flush and return the backing store, consuming the stream.
    pub fn into_backing(mut self) -> Result<B, FileError> {
        self.ensure_open()?;
        self.flush_slot()?;
        self.closed = true;
        self.slot = None;
        self.backing.take().ok_or(FileError::Closed)
    }

    // ------------------------------------------------------------------
    // Cache management
    // ------------------------------------------------------------------

    /// Make the cache slot current for `index`, flushing any evicted dirty
    /// chunk first. A chunk the store does not hold yet starts empty.
    fn chunk(&mut self, index: u64) -> Result<&mut ChunkSlot, FileError> {
        if !self.slot.as_ref().is_some_and(|slot| slot.index == index) {
            self.flush_slot()?;
            self.slot = None;
            let data = if self.readable {
                let backing = self.backing.as_mut().ok_or(FileError::Closed)?;
                self.codec
                    .read_chunk(backing, index, self.tail)?
                    .unwrap_or_default()
            } else {
                // A write-only store cannot be consulted; treat the chunk
                // as never materialised, as the write path expects.
                Vec::new()
            };
            self.slot = Some(ChunkSlot {
                index,
                data,
                dirty: false,
            });
        }
        Ok(self.slot.as_mut().expect("cache slot populated above"))
    }

    /// The chunk under the cursor.
    fn current_chunk(&mut self) -> Result<&mut ChunkSlot, FileError> {
        self.chunk(self.chunk_index)
    }

    /// Install `data` as the whole contents of chunk `index` without
    /// reading what the store held before; the evicted slot still flushes.
    fn overwrite_chunk(&mut self, index: u64, data: Vec<u8>) -> Result<(), FileError> {
        if !self.slot.as_ref().is_some_and(|slot| slot.index == index) {
            self.flush_slot()?;
        }
        self.slot = Some(ChunkSlot {
            index,
            data,
            dirty: true,
        });
        Ok(())
    }

    fn flush_slot(&mut self) -> Result<(), FileError> {
        if let Some(slot) = &mut self.slot
            && slot.dirty
        {
            let backing = self.backing.as_mut().ok_or(FileError::Closed)?;
            let padding = self.codec.write_chunk(backing, slot.index, &slot.data)?;
            slot.dirty = false;

            let extends = self.tail.is_none_or(|tail| slot.index >= tail.last_chunk);
            if extends {
                let meta = TailMeta {
                    last_chunk: slot.index,
                    padding,
                };
                header::write_tail(backing, meta)?;
                self.tail = Some(meta);
                trace!(
                    last_chunk = meta.last_chunk,
                    padding = meta.padding,
                    "tail metadata updated"
                );
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cursor management
    // ------------------------------------------------------------------

    /// Normalise a raw logical position into the split cursor form. This
    /// is the only place cursor arithmetic happens.
    fn set_position(&mut self, pos: u64) {
        let plain_size = self.codec.plain_size() as u64;
        self.chunk_index = pos / plain_size;
        self.intra_offset = (pos % plain_size) as usize;
    }

    /// Park the cursor exactly at end-of-file if it ended up at or past
    /// it.
    fn snap_to_eof(&mut self) {
        let size = self.logical_size();
        if self.position() >= size {
            self.set_position(size);
        }
    }

    /// The logical size including bytes sitting unflushed in the cached
    /// chunk, i.e. what [`len`](Self::len) will report after the next
    /// flush.
    fn logical_size(&self) -> u64 {
        let plain_size = self.codec.plain_size() as u64;
        let pending = self
            .slot
            .as_ref()
            .filter(|slot| slot.dirty)
            .map_or(0, |slot| slot.index * plain_size + slot.data.len() as u64);
        self.len().max(pending)
    }

    fn ensure_open(&self) -> Result<(), FileError> {
        if self.closed {
            Err(FileError::Closed)
        } else {
            Ok(())
        }
    }
}

impl<B: Backing> Drop for FernetFile<B> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Overlay `src` onto `data` starting at `at`, zero-filling and growing as
/// needed. Bytes past the overlay are left alone.
fn splice_into(data: &mut Vec<u8>, at: usize, src: &[u8]) {
    let end = at + src.len();
    if data.len() < end {
        data.resize(end, 0);
    }
    data[at..end].copy_from_slice(src);
}

// ============================================================================
// std::io integration
// ============================================================================

impl<B: Backing> io::Read for FernetFile<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        FernetFile::read(self, buf).map_err(Into::into)
    }
}

impl<B: Backing> io::Write for FernetFile<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FernetFile::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        FernetFile::flush(self).map_err(Into::into)
    }
}

impl<B: Backing> io::Seek for FernetFile<B> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        FernetFile::seek(self, pos).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use crate::fs::store::MemoryStore;

    use super::*;

    fn stream(chunk_size: usize) -> FernetFile<MemoryStore> {
        FernetFile::new(FernetKey::generate(), MemoryStore::new(), chunk_size).unwrap()
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let result = FernetFile::new(FernetKey::generate(), MemoryStore::new(), 0);
        assert!(matches!(result, Err(FileError::InvalidChunkSize)));
    }

    #[test]
    fn fresh_stream_is_empty() {
        let stream = stream(64);
        assert_eq!(stream.len(), 0);
        assert!(stream.is_empty());
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn cursor_splits_and_recombines() {
        let mut stream = stream(16);
        stream.write(&[7u8; 40]).unwrap();
        assert_eq!(stream.position(), 40);

        stream.seek(SeekFrom::Start(17)).unwrap();
        assert_eq!(stream.position(), 17);
        assert_eq!(stream.chunk_index, 1);
        assert_eq!(stream.intra_offset, 1);
    }

    #[test]
    fn seek_before_start_fails_and_preserves_cursor() {
        let mut stream = stream(16);
        stream.write(b"0123456789").unwrap();
        stream.seek(SeekFrom::Start(4)).unwrap();

        // A memory backing resolves every origin from the start, so a
        // negative offset is always out of range.
        let result = stream.seek(SeekFrom::Current(-10));
        assert!(matches!(result, Err(FileError::SeekBeforeStart)));
        assert_eq!(stream.position(), 4);
    }

    #[test]
    fn closed_stream_rejects_every_operation() {
        let mut stream = stream(16);
        stream.write(b"abc").unwrap();
        stream.close();
        stream.close(); // idempotent

        assert!(matches!(stream.read(&mut [0u8; 4]), Err(FileError::Closed)));
        assert!(matches!(stream.write(b"x"), Err(FileError::Closed)));
        assert!(matches!(
            stream.seek(SeekFrom::Start(0)),
            Err(FileError::Closed)
        ));
        assert!(matches!(stream.flush(), Err(FileError::Closed)));
    }

    #[test]
    fn key_material_is_accepted_in_either_form() {
        let key = FernetKey::generate();
        let encoded = key.to_base64();

        let mut stream = FernetFile::new(key, MemoryStore::new(), 32).unwrap();
        stream.write(b"payload").unwrap();
        let image = stream.into_backing().unwrap().into_inner();

        let mut stream =
            FernetFile::with_key_material(encoded.as_bytes(), MemoryStore::from_vec(image), 32)
                .unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");
    }

    #[test]
    fn malformed_key_material_is_rejected() {
        let result = FernetFile::with_key_material(b"not a key", MemoryStore::new(), 32);
        assert!(matches!(result, Err(FileError::Key(_))));
    }

    #[test]
    fn logical_size_counts_the_unflushed_tail() {
        let mut stream = stream(16);
        stream.write(b"hello").unwrap();
        // Nothing flushed yet: the header knows nothing...
        assert_eq!(stream.len(), 0);
        // ...but the effective size includes the dirty chunk.
        assert_eq!(stream.logical_size(), 5);

        stream.flush().unwrap();
        assert_eq!(stream.len(), 5);
    }

    #[test]
    fn io_traits_compose() {
        use std::io::{Read as _, Seek as _, Write as _};

        let mut stream = stream(8);
        stream.write_all(b"composes with std::io").unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();

        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "composes with std::io");
    }
}
