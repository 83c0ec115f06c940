//! The producer-side handle for one encrypted temp file.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fileswap_crypto::SealWriter;
use fileswap_token::DownloadClaims;
use tracing::warn;

use crate::error::SwapError;
use crate::service::SwapInner;

enum WriterState {
    /// Accepting writes through the encrypting stream.
    Open(SealWriter<File>),
    /// Stream finalized and descriptor closed; the file awaits redemption.
    Sealed,
    /// File removed; nothing left to clean up.
    Abandoned,
}

/// A single-producer byte sink backed by an encrypted temp file.
///
/// Writes are encrypted under the service secret before they reach disk.
/// The handle is a small state machine: writes are only accepted while
/// open, [`FileWriter::seal`] finalizes the stream, and only a sealed
/// writer can issue download tokens — an unsealed stream is missing its
/// final cipher frame and could never be decrypted. Writing after sealing
/// is an error, not silent corruption.
///
/// A writer dropped while still open removes its file: the stream was
/// never finalized, so nothing could ever redeem it.
pub struct FileWriter {
    swap: Arc<SwapInner>,
    path: PathBuf,
    state: WriterState,
}

impl FileWriter {
    pub(crate) fn new(swap: Arc<SwapInner>, path: PathBuf, sealer: SealWriter<File>) -> Self {
        Self {
            swap,
            path,
            state: WriterState::Open(sealer),
        }
    }

    /// Absolute path of the backing temp file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finalize the encrypting stream and close the descriptor.
    ///
    /// Must be called after all writes and before [`FileWriter::download_token`]:
    /// the final cipher frame written here is what makes the file
    /// decryptable. Sealing twice is an error.
    pub fn seal(&mut self) -> Result<(), SwapError> {
        match std::mem::replace(&mut self.state, WriterState::Sealed) {
            WriterState::Open(sealer) => match sealer.finish() {
                Ok(file) => {
                    drop(file);
                    Ok(())
                }
                Err(err) => {
                    // A stream that failed to finalize can never be
                    // decrypted; do not leave it behind.
                    self.state = WriterState::Abandoned;
                    if let Err(remove_err) = fs::remove_file(&self.path) {
                        if remove_err.kind() != io::ErrorKind::NotFound {
                            warn!(
                                path = %self.path.display(),
                                "failed to remove unfinishable temp file: {remove_err}"
                            );
                        }
                    }
                    Err(SwapError::Internal(format!(
                        "failed to finalize encrypted stream: {err}"
                    )))
                }
            },
            WriterState::Sealed => Err(SwapError::AlreadySealed),
            WriterState::Abandoned => {
                self.state = WriterState::Abandoned;
                Err(SwapError::AlreadySealed)
            }
        }
    }

    /// Sign a download token for this file.
    ///
    /// Only valid on a sealed writer. `display_name` is suggested verbatim
    /// to the downloader in the Content-Disposition header; callers must
    /// sanitize it if it can contain untrusted characters, and must never
    /// put secrets in it — claims are signed but not encrypted. May be
    /// called repeatedly; every issued token references the same file, and
    /// the first redemption invalidates the rest.
    pub fn download_token(
        &self,
        display_name: &str,
        ttl: Duration,
    ) -> Result<String, SwapError> {
        match &self.state {
            WriterState::Sealed => {}
            WriterState::Open(_) | WriterState::Abandoned => return Err(SwapError::NotSealed),
        }

        let claims = DownloadClaims::expiring_in(
            self.path.clone(),
            display_name.to_string(),
            ttl,
        );
        self.swap.authority.issue(&claims).map_err(SwapError::Signing)
    }

    /// Delete the file without ever issuing a token. Best-effort.
    pub fn abandon(mut self) {
        // Assigning the state first drops any open SealWriter, closing the
        // descriptor before the unlink.
        self.state = WriterState::Abandoned;
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(
                    path = %self.path.display(),
                    "failed to remove abandoned temp file: {err}"
                );
            }
        }
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.state {
            WriterState::Open(sealer) => sealer.write(buf),
            WriterState::Sealed | WriterState::Abandoned => Err(io::Error::new(
                io::ErrorKind::Other,
                SwapError::AlreadySealed,
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            WriterState::Open(sealer) => sealer.flush(),
            WriterState::Sealed | WriterState::Abandoned => Ok(()),
        }
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if matches!(self.state, WriterState::Open(_)) {
            // Never-sealed stream: nothing can decrypt it, remove the file.
            self.state = WriterState::Abandoned;
            if let Err(err) = fs::remove_file(&self.path) {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(
                        path = %self.path.display(),
                        "failed to remove unsealed temp file on drop: {err}"
                    );
                }
            }
        }
    }
}
