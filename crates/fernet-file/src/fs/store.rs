//! Backing stores: the random-access byte containers an encrypted stream
//! sits on top of.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, Write};

/// A random-access binary container holding the encrypted image of a
/// stream: the metadata header followed by fixed-size ciphertext chunks.
///
/// Capability is discovered, not declared: the stream probes readability
/// and writeability against the live store at construction, so read-only
/// and write-only handles work without any extra plumbing.
pub trait Backing: Read + Write + Seek {
    /// In-memory stores resolve every logical seek from the start of the
    /// buffer, whatever the requested origin.
    fn is_memory(&self) -> bool {
        false
    }
}

impl Backing for File {}

impl Backing for &File {}

/// A growable in-memory backing, the moral equivalent of `io::Cursor` with
/// the in-memory seek semantics the stream engine expects.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Cursor<Vec<u8>>,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing encrypted image, e.g. one produced by a previous
    /// stream over a `MemoryStore`.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            inner: Cursor::new(data),
        }
    }

    /// Consume the store and return the raw encrypted image.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

impl Read for MemoryStore {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for MemoryStore {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for MemoryStore {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl Backing for MemoryStore {
    fn is_memory(&self) -> bool {
        true
    }
}

/// Read until `buf` is full or the store reports end-of-stream, retrying
/// interrupted reads. Returns the number of bytes read.
pub(crate) fn read_at_most<B: Backing>(backing: &mut B, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match backing.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
