//! Recovery renderings of the identity secret
//!
//! The 32-byte secret is shown either as a 24-word BIP-39 phrase or as a
//! base58 string. Both parse back to the same secret.

use zeroize::Zeroizing;

use crate::custody::ScopedSecret;
use crate::error::ChatError;
use crate::identity::SECRET_LEN;

/// Render the secret as a 24-word English mnemonic.
pub fn render_mnemonic(secret: &ScopedSecret) -> Result<Zeroizing<String>, ChatError> {
    let mnemonic = bip39::Mnemonic::from_entropy(secret.expose())
        .map_err(|e| ChatError::Crypto(format!("Failed to build mnemonic: {}", e)))?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Parse a mnemonic phrase back into the secret.
pub fn secret_from_mnemonic(phrase: &str) -> Result<ScopedSecret, ChatError> {
    let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mnemonic = bip39::Mnemonic::parse_normalized(&normalized)
        .map_err(|e| ChatError::Identity(format!("Invalid recovery phrase: {}", e)))?;
    let (entropy, len) = mnemonic.to_entropy_array();
    if len != SECRET_LEN {
        return Err(ChatError::Identity(format!(
            "Recovery phrase encodes {} bytes, expected {}",
            len, SECRET_LEN
        )));
    }
    let mut bytes = [0u8; SECRET_LEN];
    bytes.copy_from_slice(&entropy[..SECRET_LEN]);
    Ok(ScopedSecret::new(bytes))
}

/// Render the secret as base58.
pub fn render_private_key(secret: &ScopedSecret) -> Zeroizing<String> {
    Zeroizing::new(bs58::encode(secret.expose()).into_string())
}

/// Parse a base58 private key back into the secret.
pub fn secret_from_private_key(encoded: &str) -> Result<ScopedSecret, ChatError> {
    let decoded = Zeroizing::new(
        bs58::decode(encoded.trim())
            .into_vec()
            .map_err(|_| ChatError::Identity("Invalid base58 private key".to_string()))?,
    );
    let bytes: [u8; SECRET_LEN] = decoded
        .as_slice()
        .try_into()
        .map_err(|_| ChatError::Identity("Private key must be 32 bytes".to_string()))?;
    Ok(ScopedSecret::new(bytes))
}
