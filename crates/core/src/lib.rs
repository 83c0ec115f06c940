//! Encrypted temporary-file swap: stream data in, hand out a signed
//! download token, serve-and-delete on redemption.
//!
//! A [`Fileswap`] instance owns one secret for its whole lifetime, keying
//! both the stream cipher and the token authority. Tokens carry no instance
//! identifier, so a token issued by one instance must only ever be redeemed
//! against that same instance; mixing instances is a caller discipline
//! requirement the data model cannot check.
//!
//! Lifecycle of one transfer:
//!
//! 1. [`Fileswap::new_writer`] creates a uniquely named encrypted temp file
//!    and returns a [`FileWriter`] byte sink.
//! 2. The producer writes, then calls [`FileWriter::seal`] — this flushes
//!    the cipher's final frame; tokens issued for an unsealed writer would
//!    reference an undecryptable stream, so issuance is refused until then.
//! 3. [`FileWriter::download_token`] signs claims (temp path, display name,
//!    expiry) into an opaque token, as many times as needed.
//! 4. [`Fileswap::redeem`] verifies a token, opens the file and unlinks it
//!    in the same step, so exactly one redemption per file ever streams
//!    content; replays and races observe "already consumed".
//!
//! Files whose tokens expire without ever being redeemed are not reaped
//! here; deployments are expected to sweep the temp directory for entries
//! older than their maximum ttl.

pub mod error;
pub mod redeem;
pub mod service;
pub mod writer;

pub use error::SwapError;
pub use redeem::Redemption;
pub use service::Fileswap;
pub use writer::FileWriter;
