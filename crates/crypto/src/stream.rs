//! Chunked AES-256-GCM stream sealing and unsealing.
//!
//! Wire format, all integers big-endian:
//!
//! ```text
//! stream id (16 bytes, random)
//! frame*:
//!   ciphertext length (u32) | flags (u8) | nonce (12 bytes) | ciphertext+tag
//! ```
//!
//! Every frame except the last carries exactly [`CHUNK_SIZE`] bytes of
//! plaintext and flags 0. The final frame may be empty and carries flags 1.
//! The associated data of each frame is `stream id || frame sequence ||
//! flags`, which makes reordered, spliced or flag-flipped frames fail
//! authentication. A stream that ends before its final frame is reported as
//! truncated.

use std::io::{self, Read, Write};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::key::SecretKey;

/// Plaintext bytes per full frame.
pub const CHUNK_SIZE: usize = 64 * 1024;

const STREAM_ID_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

const FLAG_MORE: u8 = 0;
const FLAG_FINAL: u8 = 1;

/// Errors from sealing or unsealing an encrypted stream.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("I/O error in encrypted stream: {0}")]
    Io(#[from] io::Error),

    #[error("failed to seal stream chunk")]
    Seal,

    #[error("encrypted chunk rejected: authentication failed")]
    Open,

    #[error("encrypted stream is truncated")]
    Truncated,

    #[error("unexpected data after final chunk")]
    TrailingData,

    #[error("malformed encrypted stream header")]
    Header,

    #[error("encrypted chunk length out of bounds")]
    FrameTooLarge,
}

fn frame_aad(stream_id: &[u8; STREAM_ID_SIZE], seq: u64, flags: u8) -> [u8; STREAM_ID_SIZE + 9] {
    let mut aad = [0u8; STREAM_ID_SIZE + 9];
    aad[..STREAM_ID_SIZE].copy_from_slice(stream_id);
    aad[STREAM_ID_SIZE..STREAM_ID_SIZE + 8].copy_from_slice(&seq.to_be_bytes());
    aad[STREAM_ID_SIZE + 8] = flags;
    aad
}

/// A writer that seals plaintext into the chunked format as it is written.
///
/// Plaintext is buffered until a full chunk accumulates, then sealed and
/// flushed to the inner writer. [`SealWriter::finish`] must be called once
/// all data has been written: it seals the trailing (possibly empty) final
/// frame, without which the stream is unreadable. A `SealWriter` dropped
/// without `finish` leaves a truncated stream behind.
pub struct SealWriter<W: Write> {
    inner: W,
    cipher: Aes256Gcm,
    stream_id: [u8; STREAM_ID_SIZE],
    seq: u64,
    buf: Vec<u8>,
}

impl<W: Write> SealWriter<W> {
    /// Start a new sealed stream, writing the stream header immediately.
    pub fn new(mut inner: W, key: &SecretKey) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        let mut stream_id = [0u8; STREAM_ID_SIZE];
        OsRng.fill_bytes(&mut stream_id);
        inner.write_all(&stream_id)?;

        Ok(Self {
            inner,
            cipher,
            stream_id,
            seq: 0,
            buf: Vec::with_capacity(CHUNK_SIZE),
        })
    }

    fn seal_frame(&mut self, plaintext: &[u8], flags: u8) -> Result<(), CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let aad = frame_aad(&self.stream_id, self.seq, flags);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Seal)?;

        self.inner.write_all(&(ciphertext.len() as u32).to_be_bytes())?;
        self.inner.write_all(&[flags])?;
        self.inner.write_all(&nonce)?;
        self.inner.write_all(&ciphertext)?;
        self.seq += 1;
        Ok(())
    }

    /// Seal the final frame, flush, and hand back the inner writer.
    pub fn finish(mut self) -> Result<W, CryptoError> {
        let trailing = std::mem::take(&mut self.buf);
        self.seal_frame(&trailing, FLAG_FINAL)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for SealWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= CHUNK_SIZE {
            let chunk: Vec<u8> = self.buf.drain(..CHUNK_SIZE).collect();
            self.seal_frame(&chunk, FLAG_MORE)
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Buffered plaintext below one chunk stays buffered until finish();
        // flushing a partial frame would break the fixed-chunk invariant.
        self.inner.flush()
    }
}

enum HeadRead {
    Eof,
    Full,
}

/// Read exactly `buf.len()` bytes, reporting a clean EOF at the first byte.
fn read_exact_or_eof<R: Read>(src: &mut R, buf: &mut [u8]) -> Result<HeadRead, CryptoError> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(HeadRead::Eof),
            Ok(0) => return Err(CryptoError::Truncated),
            Ok(n) => filled += n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(CryptoError::Io(err)),
        }
    }
    Ok(HeadRead::Full)
}

fn read_frame_body<R: Read>(src: &mut R, buf: &mut [u8]) -> Result<(), CryptoError> {
    match read_exact_or_eof(src, buf)? {
        HeadRead::Eof => Err(CryptoError::Truncated),
        HeadRead::Full => Ok(()),
    }
}

/// Unseal an entire stream from `src` into `dest`, returning the number of
/// plaintext bytes written.
///
/// Fails on tampering ([`CryptoError::Open`]), a stream cut short before its
/// final frame ([`CryptoError::Truncated`]) and bytes following the final
/// frame ([`CryptoError::TrailingData`]). Plaintext already copied before a
/// failure is detected stays in `dest`; callers stream into destinations
/// where a torn copy is acceptable.
pub fn unseal_copy<R: Read, W: Write>(
    dest: &mut W,
    src: &mut R,
    key: &SecretKey,
) -> Result<u64, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut stream_id = [0u8; STREAM_ID_SIZE];
    match read_exact_or_eof(src, &mut stream_id)? {
        HeadRead::Eof => return Err(CryptoError::Header),
        HeadRead::Full => {}
    }

    let mut seq: u64 = 0;
    let mut total: u64 = 0;

    loop {
        let mut len_bytes = [0u8; 4];
        match read_exact_or_eof(src, &mut len_bytes)? {
            // EOF between frames still means truncation: a well-formed
            // stream always ends with its final frame.
            HeadRead::Eof => return Err(CryptoError::Truncated),
            HeadRead::Full => {}
        }
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len < TAG_SIZE || len > CHUNK_SIZE + TAG_SIZE {
            return Err(CryptoError::FrameTooLarge);
        }

        let mut flags = [0u8; 1];
        read_frame_body(src, &mut flags)?;
        let flags = flags[0];
        if flags != FLAG_MORE && flags != FLAG_FINAL {
            return Err(CryptoError::Header);
        }

        let mut nonce = [0u8; NONCE_SIZE];
        read_frame_body(src, &mut nonce)?;

        let mut ciphertext = vec![0u8; len];
        read_frame_body(src, &mut ciphertext)?;

        // The flags byte feeds the AAD, so a flipped flag fails here too.
        let aad = frame_aad(&stream_id, seq, flags);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Open)?;

        dest.write_all(&plaintext)?;
        total += plaintext.len() as u64;
        seq += 1;

        if flags == FLAG_FINAL {
            let mut probe = [0u8; 1];
            if let HeadRead::Full = read_exact_or_eof(src, &mut probe)? {
                return Err(CryptoError::TrailingData);
            }
            return Ok(total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seal_to_vec(payload: &[u8], key: &SecretKey) -> Vec<u8> {
        let mut writer = SealWriter::new(Vec::new(), key).unwrap();
        writer.write_all(payload).unwrap();
        writer.finish().unwrap()
    }

    fn unseal_to_vec(sealed: &[u8], key: &SecretKey) -> Result<Vec<u8>, CryptoError> {
        let mut out = Vec::new();
        unseal_copy(&mut out, &mut &sealed[..], key)?;
        Ok(out)
    }

    /// Deterministic pseudo-random payload, no RNG dependency in tests.
    fn pseudo_random(len: usize) -> Vec<u8> {
        let mut state = 0x243f_6a88_85a3_08d3u64;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    #[test]
    fn test_roundtrip_small() {
        let key = SecretKey::generate();
        let payload = b"hello fileswap";
        let sealed = seal_to_vec(payload, &key);
        assert_eq!(unseal_to_vec(&sealed, &key).unwrap(), payload);
    }

    #[test]
    fn test_roundtrip_empty() {
        let key = SecretKey::generate();
        let sealed = seal_to_vec(b"", &key);
        assert_eq!(unseal_to_vec(&sealed, &key).unwrap(), b"");
    }

    #[test]
    fn test_roundtrip_exact_chunk_boundaries() {
        let key = SecretKey::generate();
        for len in [CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 2 * CHUNK_SIZE] {
            let payload = pseudo_random(len);
            let sealed = seal_to_vec(&payload, &key);
            assert_eq!(unseal_to_vec(&sealed, &key).unwrap(), payload, "len={len}");
        }
    }

    #[test]
    fn test_roundtrip_multi_chunk_split_writes() {
        let key = SecretKey::generate();
        let payload = pseudo_random(3 * CHUNK_SIZE + 4321);

        let mut writer = SealWriter::new(Vec::new(), &key).unwrap();
        for piece in payload.chunks(9973) {
            writer.write_all(piece).unwrap();
        }
        let sealed = writer.finish().unwrap();

        assert_eq!(unseal_to_vec(&sealed, &key).unwrap(), payload);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let key = SecretKey::generate();
        let sealed = seal_to_vec(b"secret payload", &key);
        let other = SecretKey::generate();
        assert!(matches!(
            unseal_to_vec(&sealed, &other),
            Err(CryptoError::Open)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let key = SecretKey::generate();
        let mut sealed = seal_to_vec(b"payload under test", &key);
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            unseal_to_vec(&sealed, &key),
            Err(CryptoError::Open)
        ));
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let key = SecretKey::generate();
        let sealed = seal_to_vec(&pseudo_random(CHUNK_SIZE + 100), &key);
        // Cut in the middle of the final frame.
        let cut = &sealed[..sealed.len() - 10];
        assert!(matches!(
            unseal_to_vec(cut, &key),
            Err(CryptoError::Truncated)
        ));
    }

    #[test]
    fn test_missing_final_frame_rejected() {
        let key = SecretKey::generate();
        // Dropping the writer without finish() leaves no final frame.
        let mut writer = SealWriter::new(Vec::new(), &key).unwrap();
        writer.write_all(&pseudo_random(CHUNK_SIZE)).unwrap();
        let sealed = writer.inner;
        assert!(matches!(
            unseal_to_vec(&sealed, &key),
            Err(CryptoError::Truncated)
        ));
    }

    #[test]
    fn test_trailing_data_rejected() {
        let key = SecretKey::generate();
        let mut sealed = seal_to_vec(b"payload", &key);
        sealed.push(0);
        assert!(matches!(
            unseal_to_vec(&sealed, &key),
            Err(CryptoError::TrailingData)
        ));
    }

    #[test]
    fn test_swapped_frames_rejected() {
        let key = SecretKey::generate();
        let payload = pseudo_random(2 * CHUNK_SIZE);
        let sealed = seal_to_vec(&payload, &key);

        // Frames 0 and 1 are full chunks of identical sealed size; swap them.
        let frame_len = 4 + 1 + NONCE_SIZE + CHUNK_SIZE + TAG_SIZE;
        let mut swapped = sealed[..STREAM_ID_SIZE].to_vec();
        swapped.extend_from_slice(&sealed[STREAM_ID_SIZE + frame_len..STREAM_ID_SIZE + 2 * frame_len]);
        swapped.extend_from_slice(&sealed[STREAM_ID_SIZE..STREAM_ID_SIZE + frame_len]);
        swapped.extend_from_slice(&sealed[STREAM_ID_SIZE + 2 * frame_len..]);

        assert!(matches!(
            unseal_to_vec(&swapped, &key),
            Err(CryptoError::Open)
        ));
    }

    #[test]
    fn test_flipped_final_flag_rejected() {
        let key = SecretKey::generate();
        let sealed = seal_to_vec(b"short", &key);
        let mut flipped = sealed.clone();
        // Single frame: flags byte sits right after the header and length.
        flipped[STREAM_ID_SIZE + 4] = FLAG_MORE;
        assert!(matches!(
            unseal_to_vec(&flipped, &key),
            Err(CryptoError::Open)
        ));
    }

    #[test]
    fn test_empty_input_is_header_error() {
        let key = SecretKey::generate();
        assert!(matches!(
            unseal_to_vec(b"", &key),
            Err(CryptoError::Header)
        ));
    }
}
