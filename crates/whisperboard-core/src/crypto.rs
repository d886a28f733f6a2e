//! Symmetric encryption using ChaCha20-Poly1305 AEAD
//!
//! Used for board payloads (announcements and messages) and for wrapping the
//! long-term identity secret at rest.

use crate::error::ChatError;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size for ChaCha20-Poly1305 (16 bytes)
pub const TAG_SIZE: usize = 16;

/// AEAD cipher bound to one 32-byte key.
///
/// # Wire Format
///
/// [`AeadCipher::encrypt`] output: `[nonce (12 bytes)] + [ciphertext + auth_tag (16 bytes)]`
///
/// # Example
///
/// ```
/// use whisperboard_core::crypto::AeadCipher;
///
/// let key = AeadCipher::generate_key();
/// let cipher = AeadCipher::new(&key);
///
/// let sealed = cipher.encrypt(b"hello board").unwrap();
/// assert_eq!(cipher.decrypt(&sealed).unwrap(), b"hello board");
/// ```
pub struct AeadCipher {
    cipher: ChaCha20Poly1305,
}

impl AeadCipher {
    /// Create a cipher for the given 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Generate a new random 32-byte key.
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        key
    }

    /// Generate a random 12-byte nonce.
    pub fn generate_nonce() -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);
        nonce
    }

    /// Encrypt with a fresh random nonce, prepending the nonce to the output.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ChatError> {
        let nonce_bytes = Self::generate_nonce();
        let ciphertext = self.encrypt_with_nonce(plaintext, &nonce_bytes)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt data produced by [`AeadCipher::encrypt`].
    ///
    /// Fails with [`ChatError::DecryptionFailed`] on truncated input, wrong key
    /// or tampered data.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, ChatError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(ChatError::DecryptionFailed(
                "data too short to contain nonce and tag".to_string(),
            ));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&data[..NONCE_SIZE]);
        self.decrypt_with_nonce(&data[NONCE_SIZE..], &nonce)
    }

    /// Encrypt using a caller-provided nonce. The nonce is NOT prepended.
    pub fn encrypt_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, ChatError> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| ChatError::Crypto(format!("Encryption failed: {}", e)))
    }

    /// Decrypt using a caller-provided nonce.
    pub fn decrypt_with_nonce(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, ChatError> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| ChatError::DecryptionFailed(format!("{}", e)))
    }
}

/// Derive a 32-byte key with HKDF-SHA256.
pub fn hkdf_expand(salt: Option<&[u8]>, input_key: &[u8], info: &[u8]) -> Result<[u8; 32], ChatError> {
    let hkdf = Hkdf::<Sha256>::new(salt, input_key);
    let mut output = [0u8; 32];
    hkdf.expand(info, &mut output)
        .map_err(|e| ChatError::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_key() {
        let key1 = AeadCipher::generate_key();
        let key2 = AeadCipher::generate_key();
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = AeadCipher::generate_key();
        let cipher = AeadCipher::new(&key);

        let ciphertext = cipher.encrypt(b"Hello, World!").unwrap();
        assert!(ciphertext.len() >= 13 + NONCE_SIZE + TAG_SIZE);
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_same_plaintext_different_ciphertext() {
        let cipher = AeadCipher::new(&AeadCipher::generate_key());
        let c1 = cipher.encrypt(b"same").unwrap();
        let c2 = cipher.encrypt(b"same").unwrap();
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher1 = AeadCipher::new(&AeadCipher::generate_key());
        let cipher2 = AeadCipher::new(&AeadCipher::generate_key());

        let ciphertext = cipher1.encrypt(b"Secret").unwrap();
        assert!(matches!(
            cipher2.decrypt(&ciphertext),
            Err(ChatError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_tampered_data_fails() {
        let cipher = AeadCipher::new(&AeadCipher::generate_key());
        let mut ciphertext = cipher.encrypt(b"Original message").unwrap();
        ciphertext[NONCE_SIZE] ^= 0xFF;
        assert!(cipher.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_truncated_data_fails() {
        let cipher = AeadCipher::new(&AeadCipher::generate_key());
        let ciphertext = cipher.encrypt(b"Original message").unwrap();
        let result = cipher.decrypt(&ciphertext[..5]);
        match result {
            Err(ChatError::DecryptionFailed(msg)) => assert!(msg.contains("too short")),
            other => panic!("Expected DecryptionFailed, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_explicit_nonce_roundtrip() {
        let cipher = AeadCipher::new(&AeadCipher::generate_key());
        let nonce = AeadCipher::generate_nonce();
        let ciphertext = cipher.encrypt_with_nonce(b"iv kept apart", &nonce).unwrap();
        assert_eq!(
            cipher.decrypt_with_nonce(&ciphertext, &nonce).unwrap(),
            b"iv kept apart"
        );
    }

    #[test]
    fn test_hkdf_domain_separation() {
        let a = hkdf_expand(None, b"shared", b"one").unwrap();
        let b = hkdf_expand(None, b"shared", b"two").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, hkdf_expand(None, b"shared", b"one").unwrap());
    }
}
