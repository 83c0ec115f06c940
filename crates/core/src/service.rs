//! The long-lived swap service instance.

use std::fs;
use std::sync::Arc;

use fileswap_crypto::{CryptoError, SealWriter, SecretKey};
use fileswap_token::TokenAuthority;
use tracing::debug;

use crate::error::SwapError;
use crate::redeem::Redemption;
use crate::writer::FileWriter;

pub(crate) struct SwapInner {
    pub(crate) key: SecretKey,
    pub(crate) authority: TokenAuthority,
}

/// File-based encrypted data serving service.
///
/// Arbitrary data streams are stored in temp files in encrypted form and
/// downloaded later with a signed token, so large payloads never have to be
/// buffered in memory. One secret per instance, generated at construction
/// and immutable afterwards; all operations share it read-only, so the
/// service is cheap to clone and safe to use from many threads.
#[derive(Clone)]
pub struct Fileswap {
    inner: Arc<SwapInner>,
}

impl Fileswap {
    /// Create a service instance with a fresh random secret.
    pub fn new() -> Self {
        let key = SecretKey::generate();
        let authority = TokenAuthority::new(*key.as_bytes());
        Self {
            inner: Arc::new(SwapInner { key, authority }),
        }
    }

    /// Create a service instance over caller-provided key material.
    pub fn with_secret(secret: [u8; 32]) -> Self {
        Self {
            inner: Arc::new(SwapInner {
                key: SecretKey::from_bytes(secret),
                authority: TokenAuthority::new(secret),
            }),
        }
    }

    /// Open a new encrypted temp file for writing.
    ///
    /// `hint` seeds the unique temp file name and is never shown to end
    /// users. Safe to call concurrently; every call allocates an
    /// independent file. If the encrypting stream cannot be initialized,
    /// the already-created file is closed and removed before the error
    /// returns.
    pub fn new_writer(&self, hint: &str) -> Result<FileWriter, SwapError> {
        let temp = tempfile::Builder::new()
            .prefix(hint)
            .tempfile()
            .map_err(SwapError::Storage)?;
        let (file, path) = temp.keep().map_err(|err| SwapError::Storage(err.error))?;

        match SealWriter::new(file, &self.inner.key) {
            Ok(sealer) => {
                debug!(path = %path.display(), "opened encrypted temp file");
                Ok(FileWriter::new(self.inner.clone(), path, sealer))
            }
            Err(err) => {
                // No orphaned files on setup failure. The descriptor was
                // consumed by the failed SealWriter and is already closed.
                let _ = fs::remove_file(&path);
                Err(match err {
                    CryptoError::Io(io_err) => SwapError::Storage(io_err),
                    other => SwapError::Internal(format!(
                        "failed to initialize encrypting stream: {other}"
                    )),
                })
            }
        }
    }

    /// Verify a download token and claim its backing file.
    ///
    /// Opening and unlinking happen in one step, so a token can only ever
    /// be redeemed once: replays and concurrent attempts on the same token
    /// fail with an invalid-request error.
    pub fn redeem(&self, token: &str) -> Result<Redemption, SwapError> {
        let claims = self.inner.authority.redeem(token).map_err(|err| {
            debug!("download token rejected: {err}");
            SwapError::InvalidRequest("invalid or expired download token")
        })?;

        Redemption::claim(self.inner.clone(), claims)
    }
}

impl Default for Fileswap {
    fn default() -> Self {
        Self::new()
    }
}
