//! Password key derivation (PBKDF2-HMAC-SHA256)

use hmac::Hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::ChatError;

/// Salt length for password wrapping
pub const SALT_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfAlgorithm {
    Pbkdf2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfHash {
    Sha256,
}

/// Parameters stored alongside a password-wrapped secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: KdfAlgorithm,
    pub hash: KdfHash,
    pub salt: [u8; SALT_LEN],
    pub iterations: u32,
}

impl KdfParams {
    /// Fresh parameters with a random salt.
    pub fn generate(iterations: u32) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        Self {
            algorithm: KdfAlgorithm::Pbkdf2,
            hash: KdfHash::Sha256,
            salt,
            iterations,
        }
    }

    /// Derive the 32-byte wrapping key for `password`.
    pub(crate) fn derive(&self, password: &str) -> Result<Zeroizing<[u8; 32]>, ChatError> {
        if self.iterations == 0 {
            return Err(ChatError::Crypto("PBKDF2 iteration count is zero".to_string()));
        }
        let mut key = Zeroizing::new([0u8; 32]);
        match (self.algorithm, self.hash) {
            (KdfAlgorithm::Pbkdf2, KdfHash::Sha256) => {
                pbkdf2::pbkdf2::<Hmac<Sha256>>(
                    password.as_bytes(),
                    &self.salt,
                    self.iterations,
                    &mut key[..],
                )
                .map_err(|e| ChatError::Crypto(format!("PBKDF2 failed: {}", e)))?;
            }
        }
        Ok(key)
    }
}
