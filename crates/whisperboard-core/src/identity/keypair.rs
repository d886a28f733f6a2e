//! Identity keypair derived from a single 32-byte long-term secret
//!
//! The secret is used directly as the Ed25519 signing seed and expanded with
//! BLAKE3 into the X25519 static secret used for announcements and session
//! roots. Keeping one secret means one value to wrap at rest and one value to
//! render as a recovery phrase.

use crate::error::ChatError;
use crate::identity::UserId;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};
use zeroize::Zeroize;

/// Length of the long-term identity secret.
pub const SECRET_LEN: usize = 32;

/// Length of a serialized [`PublicIdentity`]: Ed25519 (32) + X25519 (32).
pub const PUBLIC_IDENTITY_LEN: usize = 64;

const X25519_DERIVE_CONTEXT: &str = "whisperboard x25519 v1";

/// Long-term identity keypair.
///
/// Holds the raw secret only for as long as the keypair lives; the secret is
/// zeroized on drop.
pub struct IdentityKeypair {
    secret: [u8; SECRET_LEN],
    ed25519: SigningKey,
    x25519: X25519StaticSecret,
}

impl IdentityKeypair {
    /// Generate a new random identity
    pub fn generate() -> Result<Self, ChatError> {
        let mut secret = [0u8; SECRET_LEN];
        getrandom::getrandom(&mut secret)
            .map_err(|e| ChatError::Crypto(format!("Failed to get random bytes: {}", e)))?;
        let keypair = Self::from_secret(&secret);
        secret.zeroize();
        Ok(keypair)
    }

    /// Rebuild the keypair from the long-term secret.
    pub fn from_secret(secret: &[u8; SECRET_LEN]) -> Self {
        let ed25519 = SigningKey::from_bytes(secret);
        let x25519 = X25519StaticSecret::from(blake3::derive_key(X25519_DERIVE_CONTEXT, secret));
        Self {
            secret: *secret,
            ed25519,
            x25519,
        }
    }

    /// Rebuild the keypair from a byte slice that must be exactly 32 bytes.
    pub fn from_secret_slice(secret: &[u8]) -> Result<Self, ChatError> {
        let arr: [u8; SECRET_LEN] = secret
            .try_into()
            .map_err(|_| ChatError::Identity("Identity secret must be 32 bytes".to_string()))?;
        Ok(Self::from_secret(&arr))
    }

    /// The raw long-term secret. Only custody and recovery code read this.
    pub(crate) fn secret_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.secret
    }

    /// Public half of the identity
    pub fn public_identity(&self) -> PublicIdentity {
        PublicIdentity {
            ed25519: self.ed25519.verifying_key(),
            x25519: X25519PublicKey::from(&self.x25519),
        }
    }

    /// Identifier derived from the public identity
    pub fn user_id(&self) -> UserId {
        UserId::from_public_identity(&self.public_identity())
    }

    /// Sign a message with the Ed25519 key
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.ed25519.sign(message)
    }

    /// X25519 Diffie-Hellman between our static secret and a peer public key.
    pub fn diffie_hellman(&self, peer: &X25519PublicKey) -> [u8; 32] {
        *self.x25519.diffie_hellman(peer).as_bytes()
    }

    /// X25519 secret derived from the long-term secret and a context.
    ///
    /// Used for announcement ephemerals so they can be re-derived from the
    /// stored nonce instead of persisting ephemeral secret material.
    pub(crate) fn derive_ephemeral(&self, context: &[u8]) -> X25519StaticSecret {
        X25519StaticSecret::from(*blake3::keyed_hash(&self.secret, context).as_bytes())
    }
}

impl Drop for IdentityKeypair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeypair")
            .field("user_id", &self.user_id().as_str())
            .finish_non_exhaustive()
    }
}

/// Public identity of a party: signing key plus key-agreement key.
#[derive(Clone, Copy)]
pub struct PublicIdentity {
    ed25519: VerifyingKey,
    x25519: X25519PublicKey,
}

impl PublicIdentity {
    /// Verify an Ed25519 signature made by this identity
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.ed25519.verify(message, signature).is_ok()
    }

    /// Get the Ed25519 verifying key
    pub fn ed25519(&self) -> &VerifyingKey {
        &self.ed25519
    }

    /// Get the X25519 key-agreement key
    pub fn x25519(&self) -> &X25519PublicKey {
        &self.x25519
    }

    /// Identifier derived from this public identity
    pub fn user_id(&self) -> UserId {
        UserId::from_public_identity(self)
    }

    /// Serialize to bytes
    ///
    /// Format: [ed25519: 32 bytes][x25519: 32 bytes]
    pub fn to_bytes(&self) -> [u8; PUBLIC_IDENTITY_LEN] {
        let mut bytes = [0u8; PUBLIC_IDENTITY_LEN];
        bytes[..32].copy_from_slice(self.ed25519.as_bytes());
        bytes[32..].copy_from_slice(self.x25519.as_bytes());
        bytes
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChatError> {
        if bytes.len() != PUBLIC_IDENTITY_LEN {
            return Err(ChatError::Identity(format!(
                "Public identity must be {} bytes, got {}",
                PUBLIC_IDENTITY_LEN,
                bytes.len()
            )));
        }

        let ed25519_bytes: [u8; 32] = bytes[..32]
            .try_into()
            .map_err(|_| ChatError::Identity("Invalid Ed25519 public key length".to_string()))?;
        let ed25519 = VerifyingKey::from_bytes(&ed25519_bytes)
            .map_err(|_| ChatError::Identity("Invalid Ed25519 public key".to_string()))?;

        let x25519_bytes: [u8; 32] = bytes[32..]
            .try_into()
            .map_err(|_| ChatError::Identity("Invalid X25519 public key length".to_string()))?;

        Ok(Self {
            ed25519,
            x25519: X25519PublicKey::from(x25519_bytes),
        })
    }

    /// Encode as base58 for sharing out-of-band
    pub fn to_base58(&self) -> String {
        bs58::encode(self.to_bytes()).into_string()
    }

    /// Decode from base58
    pub fn from_base58(s: &str) -> Result<Self, ChatError> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .map_err(|_| ChatError::Identity("Invalid base58 public identity".to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for PublicIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicIdentity")
            .field("ed25519", &hex::encode(self.ed25519.as_bytes()))
            .field("x25519", &hex::encode(self.x25519.as_bytes()))
            .finish()
    }
}

impl PartialEq for PublicIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicIdentity {}

impl std::hash::Hash for PublicIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl Serialize for PublicIdentity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for PublicIdentity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}
