//! Error types for the fernet-file crate
//!
//! This module re-exports all error types so callers have a single place
//! to import them from.

// Re-export error types from their home modules
pub use crate::crypto::fernet::TokenError;
pub use crate::crypto::keys::KeyError;
pub use crate::fs::file::FileError;
