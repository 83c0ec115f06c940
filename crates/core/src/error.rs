//! Error taxonomy for the swap core.

use std::io;

use fileswap_token::TokenError;
use thiserror::Error;

/// Errors from the write path, token issuance and redemption.
///
/// [`SwapError::InvalidRequest`] is the only user-correctable variant; the
/// HTTP boundary maps it to a bad-request status and everything else to an
/// internal error, without re-inspecting internals. Messages in
/// `InvalidRequest` are safe to show to remote callers and never contain
/// filesystem paths.
#[derive(Debug, Error)]
pub enum SwapError {
    /// Temp file creation or removal failed.
    #[error("temporary storage failure: {0}")]
    Storage(#[source] io::Error),

    /// The token authority could not sign the claims.
    #[error("failed to issue download token: {0}")]
    Signing(#[source] TokenError),

    /// Bad, expired or already-consumed token.
    #[error("invalid download request: {0}")]
    InvalidRequest(&'static str),

    /// Token issuance attempted while the writer is still open.
    #[error("writer must be sealed before a download token can be issued")]
    NotSealed,

    /// Write or seal attempted on a writer that was already sealed.
    #[error("writer is already sealed")]
    AlreadySealed,

    /// Decryption failure or unexpected I/O fault; not user-correctable.
    #[error("internal swap failure: {0}")]
    Internal(String),
}

impl SwapError {
    /// Whether this error should surface to the remote caller as a bad
    /// request rather than a server fault.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, SwapError::InvalidRequest(_))
    }
}
