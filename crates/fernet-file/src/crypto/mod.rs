//! Cryptographic primitives: Fernet keys and raw Fernet tokens.

pub mod fernet;
pub mod keys;

// Re-export commonly used types
pub use fernet::{Fernet, TokenError, expansion};
pub use keys::{FernetKey, KeyError};
