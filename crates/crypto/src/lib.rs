//! Symmetric stream encryption for fileswap temporary files.
//!
//! Provides a chunked AES-256-GCM format suitable for data too large to hold
//! in memory: plaintext is sealed in 64 KiB frames as it is written, and
//! unsealed frame-by-frame while copying to a destination. Each frame is
//! bound to its stream and position through the AEAD associated data, so
//! reordering, truncation and cross-stream splicing are all rejected at
//! decrypt time.

pub mod key;
pub mod stream;

pub use key::SecretKey;
pub use stream::{unseal_copy, CryptoError, SealWriter, CHUNK_SIZE};
