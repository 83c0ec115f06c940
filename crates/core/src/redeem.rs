//! The consumer-side handle for a claimed download.

use std::fs::{self, File};
use std::io::{self, Write};
use std::sync::Arc;

use fileswap_crypto::unseal_copy;
use fileswap_token::DownloadClaims;
use tracing::debug;

use crate::error::SwapError;
use crate::service::SwapInner;

/// An exclusively claimed, still-open encrypted temp file.
///
/// Constructing a `Redemption` opens the file and unlinks its directory
/// entry in the same step. The filesystem namespace is the single-
/// redemption mechanism: whoever unlinks first owns the only surviving
/// handle, and every later or concurrent attempt observes "already
/// consumed". Once claimed, nothing is left on disk regardless of what
/// happens during streaming — the descriptor itself disappears when the
/// `Redemption` is dropped.
pub struct Redemption {
    swap: Arc<SwapInner>,
    claims: DownloadClaims,
    file: File,
}

impl Redemption {
    pub(crate) fn claim(swap: Arc<SwapInner>, claims: DownloadClaims) -> Result<Self, SwapError> {
        let file = match File::open(&claims.temp_file_path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SwapError::InvalidRequest(
                    "download already consumed or expired",
                ));
            }
            Err(err) => {
                return Err(SwapError::Internal(format!(
                    "failed to open temp file: {err}"
                )));
            }
        };

        // Unlink immediately. Losing this race to a concurrent redemption
        // means the other side owns the transfer; the descriptor opened
        // above is dropped (closed) on the way out.
        match fs::remove_file(&claims.temp_file_path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SwapError::InvalidRequest(
                    "download already consumed or expired",
                ));
            }
            Err(err) => return Err(SwapError::Storage(err)),
        }

        debug!(
            path = %claims.temp_file_path.display(),
            name = %claims.download_file_name,
            "claimed temp file for download"
        );

        Ok(Self { swap, claims, file })
    }

    /// The display filename from the token claims.
    pub fn file_name(&self) -> &str {
        &self.claims.download_file_name
    }

    /// Decrypt the claimed file into `dest`, returning plaintext bytes
    /// written.
    ///
    /// Consumes the redemption; the descriptor closes on return no matter
    /// the outcome. A mid-stream decryption failure surfaces as an
    /// internal error and may leave a torn copy in `dest` — the backing
    /// file is already gone, so the caller cannot retry anyway.
    pub fn copy_to<W: Write>(mut self, dest: &mut W) -> Result<u64, SwapError> {
        unseal_copy(dest, &mut self.file, &self.swap.key)
            .map_err(|err| SwapError::Internal(format!("failed to decrypt temp file: {err}")))
    }
}
