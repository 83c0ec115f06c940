//! Process-lifetime secret key material.

use rand::rngs::OsRng;
use rand::RngCore;

/// A 256-bit symmetric key held for the lifetime of one service instance.
///
/// The same key material drives both the stream cipher and download token
/// signing, so streams sealed under one key can only ever be opened by the
/// instance that created them. Keys are never serialized.
#[derive(Clone)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Generate a fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Build a key from raw bytes. Intended for tests and for callers that
    /// manage key material themselves.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("SecretKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_random() {
        let a = SecretKey::generate();
        let b = SecretKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = SecretKey::from_bytes([0x42u8; 32]);
        let printed = format!("{key:?}");
        assert!(!printed.contains("42"));
    }
}
