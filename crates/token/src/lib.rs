//! Signed download tokens for fileswap.
//!
//! A token embeds [`DownloadClaims`] — the server-internal temp file path,
//! the display filename suggested to the downloader, and an absolute expiry
//! timestamp — and is signed with HMAC-SHA256 under the service secret.
//! Token layout: `base64url-nopad(json claims || 32-byte tag)`.
//!
//! Claims are integrity-protected but NOT encrypted: anyone holding a token
//! can decode its payload. Never put secrets in the display filename; file
//! contents are protected separately by the stream cipher.
//!
//! Tokens carry no instance identifier. A token issued by one
//! [`TokenAuthority`] must only ever be redeemed against the authority
//! holding the same secret; mixing instances is a caller discipline
//! requirement that cannot be detected from the token itself.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const TAG_SIZE: usize = 32;

/// Errors from issuing or redeeming a download token.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed download token")]
    Malformed,

    #[error("download token signature mismatch")]
    Signature,

    #[error("download token expired")]
    Expired,

    #[error("failed to encode download claims: {0}")]
    Signing(#[from] serde_json::Error),
}

/// The payload embedded in a signed download token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadClaims {
    /// Absolute path of the encrypted temp file. Server-internal; never
    /// interpreted by the remote user.
    pub temp_file_path: PathBuf,

    /// Filename suggested to the downloader via Content-Disposition.
    pub download_file_name: String,

    /// Absolute expiry, seconds since the Unix epoch.
    pub expires_at: u64,
}

impl DownloadClaims {
    /// Build claims expiring `ttl` from now.
    pub fn expiring_in(temp_file_path: PathBuf, download_file_name: String, ttl: Duration) -> Self {
        Self {
            temp_file_path,
            download_file_name,
            expires_at: unix_now().saturating_add(ttl.as_secs()),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Signs download claims into opaque tokens and verifies them back.
///
/// Holds one secret for its entire lifetime. Redemption rejects tokens whose
/// tag does not verify (constant-time) and tokens past their expiry.
pub struct TokenAuthority {
    secret: [u8; 32],
}

impl TokenAuthority {
    pub fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    /// Generate an authority with a fresh random secret from the OS RNG.
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self { secret }
    }

    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key size")
    }

    /// Sign claims into an opaque token string. No filesystem side effects.
    pub fn issue(&self, claims: &DownloadClaims) -> Result<String, TokenError> {
        let payload = serde_json::to_vec(claims)?;

        let mut mac = self.mac();
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();

        let mut token_bytes = payload;
        token_bytes.extend_from_slice(&tag);
        Ok(URL_SAFE_NO_PAD.encode(token_bytes))
    }

    /// Verify a token and decode its claims.
    ///
    /// Fails with [`TokenError::Malformed`] on undecodable input,
    /// [`TokenError::Signature`] on a bad tag and [`TokenError::Expired`]
    /// once `expires_at` has passed.
    pub fn redeem(&self, token: &str) -> Result<DownloadClaims, TokenError> {
        let decoded = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| TokenError::Malformed)?;
        if decoded.len() <= TAG_SIZE {
            return Err(TokenError::Malformed);
        }
        let (payload, tag) = decoded.split_at(decoded.len() - TAG_SIZE);

        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(tag).map_err(|_| TokenError::Signature)?;

        let claims: DownloadClaims =
            serde_json::from_slice(payload).map_err(|_| TokenError::Malformed)?;

        if unix_now() >= claims.expires_at {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenAuthority(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_claims(ttl: Duration) -> DownloadClaims {
        DownloadClaims::expiring_in(
            PathBuf::from("/tmp/fileswap-test-1234"),
            "export.csv".to_string(),
            ttl,
        )
    }

    #[test]
    fn test_issue_redeem_roundtrip() {
        let authority = TokenAuthority::generate();
        let claims = sample_claims(Duration::from_secs(300));

        let token = authority.issue(&claims).unwrap();
        let redeemed = authority.redeem(&token).unwrap();
        assert_eq!(redeemed, claims);
    }

    #[test]
    fn test_expired_token_rejected() {
        let authority = TokenAuthority::generate();
        let claims = sample_claims(Duration::from_secs(0));

        let token = authority.issue(&claims).unwrap();
        assert!(matches!(
            authority.redeem(&token),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_every_single_byte_mutation_rejected() {
        let authority = TokenAuthority::generate();
        let token = authority
            .issue(&sample_claims(Duration::from_secs(300)))
            .unwrap();

        let bytes = token.as_bytes();
        for pos in 0..bytes.len() {
            let mut mutated = bytes.to_vec();
            mutated[pos] = if mutated[pos] == b'A' { b'B' } else { b'A' };
            if mutated == bytes {
                continue;
            }
            let mutated = String::from_utf8(mutated).unwrap();
            assert!(
                authority.redeem(&mutated).is_err(),
                "mutation at byte {pos} was accepted"
            );
        }
    }

    #[test]
    fn test_token_from_other_authority_rejected() {
        let issuer = TokenAuthority::generate();
        let other = TokenAuthority::generate();

        let token = issuer
            .issue(&sample_claims(Duration::from_secs(300)))
            .unwrap();
        assert!(matches!(
            other.redeem(&token),
            Err(TokenError::Signature)
        ));
    }

    #[test]
    fn test_garbage_tokens_rejected() {
        let authority = TokenAuthority::generate();
        for garbage in ["", "not-base64!!!", "AAAA", &"A".repeat(40)] {
            assert!(authority.redeem(garbage).is_err(), "accepted {garbage:?}");
        }
    }

    #[test]
    fn test_claims_are_readable_without_secret() {
        // Integrity-protected, not confidential: the payload is plain JSON.
        let authority = TokenAuthority::generate();
        let token = authority
            .issue(&sample_claims(Duration::from_secs(300)))
            .unwrap();

        let decoded = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let payload = &decoded[..decoded.len() - TAG_SIZE];
        let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(value["download_file_name"], "export.csv");
    }
}
