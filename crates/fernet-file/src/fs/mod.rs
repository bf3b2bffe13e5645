//! Encrypted stream plumbing: backing stores, the on-disk layout, the
//! chunk codec and the seekable stream engine.

pub mod chunk;
pub mod file;
pub mod header;
pub mod store;

// Re-export commonly used types
pub use chunk::ChunkCodec;
pub use file::{DEFAULT_CHUNK_SIZE, FernetFile, FileError};
pub use header::{HEADER_SIZE, META_FIELD_SIZE, TailMeta};
pub use store::{Backing, MemoryStore};
