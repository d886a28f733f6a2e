//! Identity module for Whisperboard
//!
//! A user's long-term identity is one 32-byte secret from which both an
//! Ed25519 signing key and an X25519 key-agreement key are derived.
//!
//! ## Example
//!
//! ```rust
//! use whisperboard_core::identity::IdentityKeypair;
//!
//! let keypair = IdentityKeypair::generate().unwrap();
//! let public = keypair.public_identity();
//!
//! let signature = keypair.sign(b"announce");
//! assert!(public.verify(b"announce", &signature));
//! println!("Identity: {}", public.user_id());
//! ```
//!
//! The raw secret never leaves this module except through key custody
//! (wrapping at rest) and recovery rendering.

mod keypair;
mod user_id;

pub use keypair::{IdentityKeypair, PublicIdentity, PUBLIC_IDENTITY_LEN, SECRET_LEN};
pub use user_id::UserId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_identity_workflow() {
        let keypair = IdentityKeypair::generate().unwrap();
        let public = keypair.public_identity();
        let id = UserId::from_public_identity(&public);

        assert_eq!(id, keypair.user_id());

        let bytes = public.to_bytes();
        let recovered = PublicIdentity::from_bytes(&bytes).unwrap();
        assert_eq!(recovered.user_id(), id);

        let rebuilt = IdentityKeypair::from_secret(keypair.secret_bytes());
        assert_eq!(rebuilt.user_id(), id);
    }
}
