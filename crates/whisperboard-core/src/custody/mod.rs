//! Key custody: wrapping the long-term identity secret at rest
//!
//! The identity secret is never stored in the clear. It is sealed with
//! ChaCha20-Poly1305 under a key derived either from a password (PBKDF2) or
//! from a platform credential ceremony. Unwrapped secrets live in a
//! [`ScopedSecret`], which is zeroized as soon as it goes out of scope.
//!
//! ```rust
//! use whisperboard_core::config::CoreConfig;
//! use whisperboard_core::custody::{unwrap_secret, wrap_secret, Credential};
//! use whisperboard_core::identity::IdentityKeypair;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = CoreConfig::for_tests();
//! let secret = [42u8; 32];
//! let credential = Credential::password("hunter2");
//!
//! let wrapped = wrap_secret(&secret, &credential, &config).await.unwrap();
//! let scoped = unwrap_secret(&wrapped, &credential).await.unwrap();
//! assert_eq!(scoped.keypair().user_id(), IdentityKeypair::from_secret(&secret).user_id());
//! # });
//! ```

mod password;
mod platform;
mod vault;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::config::CoreConfig;
use crate::crypto::{AeadCipher, NONCE_SIZE};
use crate::error::ChatError;
use crate::identity::{IdentityKeypair, PublicIdentity, UserId, SECRET_LEN};

pub use password::{KdfAlgorithm, KdfHash, KdfParams, SALT_LEN};
pub use platform::{CeremonyError, CeremonyOutcome, PlatformAuthenticator, SoftwareAuthenticator};
pub use vault::KeyCustody;

/// How an identity secret is wrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WrappingMethod {
    Password,
    PlatformCredential,
}

impl fmt::Display for WrappingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WrappingMethod::Password => write!(f, "password"),
            WrappingMethod::PlatformCredential => write!(f, "platform credential"),
        }
    }
}

/// Credential presented to wrap or unwrap a secret.
#[derive(Clone)]
pub enum Credential {
    Password(String),
    Platform(Arc<dyn PlatformAuthenticator>),
}

impl Credential {
    pub fn password(password: impl Into<String>) -> Self {
        Credential::Password(password.into())
    }

    pub fn platform(authenticator: Arc<dyn PlatformAuthenticator>) -> Self {
        Credential::Platform(authenticator)
    }

    pub fn method(&self) -> WrappingMethod {
        match self {
            Credential::Password(_) => WrappingMethod::Password,
            Credential::Platform(_) => WrappingMethod::PlatformCredential,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => write!(f, "Credential::Password(<redacted>)"),
            Credential::Platform(_) => write!(f, "Credential::Platform(..)"),
        }
    }
}

/// Method-specific parameters needed to re-derive the wrapping key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WrappingParams {
    Password(KdfParams),
    PlatformCredential { credential_id: Vec<u8> },
}

/// A sealed identity secret plus everything needed to unseal it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    pub params: WrappingParams,
    pub iv: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

impl WrappedKey {
    pub fn method(&self) -> WrappingMethod {
        match self.params {
            WrappingParams::Password(_) => WrappingMethod::Password,
            WrappingParams::PlatformCredential { .. } => WrappingMethod::PlatformCredential,
        }
    }
}

/// Persisted identity: public material in the clear, secret wrapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub user_id: UserId,
    pub public_identity: PublicIdentity,
    pub wrapped: WrappedKey,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An unwrapped identity secret, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ScopedSecret {
    bytes: [u8; SECRET_LEN],
}

impl ScopedSecret {
    pub(crate) fn new(bytes: [u8; SECRET_LEN]) -> Self {
        Self { bytes }
    }

    pub(crate) fn from_keypair(keypair: &IdentityKeypair) -> Self {
        Self::new(*keypair.secret_bytes())
    }

    pub(crate) fn expose(&self) -> &[u8; SECRET_LEN] {
        &self.bytes
    }

    /// Rebuild the identity keypair from this secret.
    pub fn keypair(&self) -> IdentityKeypair {
        IdentityKeypair::from_secret(&self.bytes)
    }
}

impl fmt::Debug for ScopedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopedSecret(<redacted>)")
    }
}

/// Run the credential side of wrapping: returns new params and the key.
async fn enroll(
    secret: &[u8; SECRET_LEN],
    credential: &Credential,
    config: &CoreConfig,
) -> Result<(WrappingParams, Zeroizing<[u8; 32]>), ChatError> {
    match credential {
        Credential::Password(password) => {
            let kdf = KdfParams::generate(config.pbkdf2_iterations);
            let key = kdf.derive(password)?;
            Ok((WrappingParams::Password(kdf), key))
        }
        Credential::Platform(authenticator) => {
            let user = IdentityKeypair::from_secret(secret).user_id();
            let credential_id = authenticator.create_credential(&user).await?;
            let key = Zeroizing::new(authenticator.authenticate(&credential_id).await?);
            Ok((WrappingParams::PlatformCredential { credential_id }, key))
        }
    }
}

fn seal(
    secret: &[u8; SECRET_LEN],
    params: WrappingParams,
    key: &[u8; 32],
) -> Result<WrappedKey, ChatError> {
    let iv = AeadCipher::generate_nonce();
    let ciphertext = AeadCipher::new(key).encrypt_with_nonce(secret, &iv)?;
    Ok(WrappedKey {
        params,
        iv,
        ciphertext,
    })
}

fn open(wrapped: &WrappedKey, key: &[u8; 32]) -> Result<ScopedSecret, ChatError> {
    let plaintext = Zeroizing::new(
        AeadCipher::new(key)
            .decrypt_with_nonce(&wrapped.ciphertext, &wrapped.iv)
            .map_err(|_| ChatError::AuthenticationFailed)?,
    );
    let bytes: [u8; SECRET_LEN] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| ChatError::Crypto("Unwrapped secret has the wrong length".to_string()))?;
    Ok(ScopedSecret::new(bytes))
}

/// Wrap `secret` under `credential`.
///
/// Password wrapping draws a fresh salt and IV; platform wrapping registers a
/// new credential and runs one ceremony to obtain its key.
pub async fn wrap_secret(
    secret: &[u8; SECRET_LEN],
    credential: &Credential,
    config: &CoreConfig,
) -> Result<WrappedKey, ChatError> {
    let (params, key) = enroll(secret, credential, config).await?;
    seal(secret, params, &key)
}

/// Unwrap a secret.
///
/// A wrong password, a rejected or cancelled ceremony, or a credential of the
/// wrong kind all yield [`ChatError::AuthenticationFailed`].
pub async fn unwrap_secret(
    wrapped: &WrappedKey,
    credential: &Credential,
) -> Result<ScopedSecret, ChatError> {
    let key = match (&wrapped.params, credential) {
        (WrappingParams::Password(kdf), Credential::Password(password)) => kdf.derive(password)?,
        (WrappingParams::PlatformCredential { credential_id }, Credential::Platform(auth)) => {
            Zeroizing::new(auth.authenticate(credential_id).await?)
        }
        _ => {
            tracing::debug!(
                wrapped = %wrapped.method(),
                presented = %credential.method(),
                "Credential kind does not match wrapping method"
            );
            return Err(ChatError::AuthenticationFailed);
        }
    };
    open(wrapped, &key)
}
