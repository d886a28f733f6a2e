//! Session cryptography
//!
//! Everything that touches key material for announcements and messages sits
//! behind [`SessionCrypto`]; the handshake and exchange code only moves
//! opaque roots and byte strings around.
//!
//! # Announcement wire format
//!
//! ```text
//! [ephemeral X25519 public (32)] [nonce (12)] [AEAD(body) + tag (16)]
//! ```
//!
//! The body key is HKDF over `DH(ephemeral, recipient static)`, so only the
//! addressee can open it. The body carries the sender's public identity, the
//! recipient, a timestamp and an Ed25519 signature over the ephemeral key and
//! those fields.
//!
//! # Session roots
//!
//! Each announcement roots exactly one direction (sender to recipient):
//!
//! ```text
//! root = HKDF(DH(eph, recipient) || DH(sender, recipient), info = sender || recipient || eph)
//! seeker(i)      = BLAKE3-keyed(root, "seeker" || i)
//! message_key(i) = HKDF(root, "message" || i)
//! ```
//!
//! The initiator's ephemeral secret is derived from its identity secret and
//! the announcement nonce, so the outgoing root can be recomputed at will.

use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use x25519_dalek::PublicKey as X25519PublicKey;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{hkdf_expand, AeadCipher, NONCE_SIZE, TAG_SIZE};
use crate::error::ChatError;
use crate::identity::{IdentityKeypair, PublicIdentity, PUBLIC_IDENTITY_LEN};
use crate::types::{IncomingAnnouncement, Seeker};

const DISCOVERY_CONTEXT: &str = "whisperboard announce seeker v1";
const EPHEMERAL_INFO: &[u8] = b"whisperboard announcement ephemeral v1";
const BODY_KEY_INFO: &[u8] = b"whisperboard announcement body v1";
const SIGNATURE_DOMAIN: &[u8] = b"whisperboard announcement v1";
const ROOT_INFO: &[u8] = b"whisperboard session root v1";
const MESSAGE_KEY_INFO: &[u8] = b"whisperboard message key v1";

/// Length of the nonce that makes each announcement (and its ephemeral) unique
pub const ANNOUNCEMENT_NONCE_LEN: usize = 16;

/// Secret root of one session direction.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DirectionRoot([u8; 32]);

impl DirectionRoot {
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// An announcement that decrypted and verified under our identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedAnnouncement {
    pub sender: PublicIdentity,
    pub ephemeral_public: [u8; 32],
    pub created_at: i64,
    /// BLAKE3 of the raw payload
    pub id: [u8; 32],
}

impl ValidatedAnnouncement {
    pub fn to_incoming(&self) -> IncomingAnnouncement {
        IncomingAnnouncement {
            id: self.id,
            ephemeral_public: self.ephemeral_public,
            created_at: self.created_at,
        }
    }
}

/// Key agreement, seeker derivation and payload sealing for sessions.
pub trait SessionCrypto: Send + Sync {
    /// Seeker under which announcements addressed to `recipient` are published.
    fn discovery_seeker(&self, recipient: &PublicIdentity) -> Seeker;

    /// Build an announcement from `identity` to `recipient`.
    fn seal_announcement(
        &self,
        identity: &IdentityKeypair,
        recipient: &PublicIdentity,
        nonce: &[u8; ANNOUNCEMENT_NONCE_LEN],
        created_at: i64,
    ) -> Result<Vec<u8>, ChatError>;

    /// Decrypt and verify an announcement addressed to `identity`.
    ///
    /// Fails with [`ChatError::HandshakeValidationFailed`].
    fn open_announcement(
        &self,
        identity: &IdentityKeypair,
        payload: &[u8],
    ) -> Result<ValidatedAnnouncement, ChatError>;

    /// Root of the direction `identity -> recipient`, from our own announcement.
    fn outgoing_root(
        &self,
        identity: &IdentityKeypair,
        recipient: &PublicIdentity,
        nonce: &[u8; ANNOUNCEMENT_NONCE_LEN],
    ) -> Result<DirectionRoot, ChatError>;

    /// Root of the direction `sender -> identity`, from the sender's announcement.
    fn incoming_root(
        &self,
        identity: &IdentityKeypair,
        sender: &PublicIdentity,
        ephemeral_public: &[u8; 32],
    ) -> Result<DirectionRoot, ChatError>;

    /// Seeker for message `index` of a direction.
    fn seeker(&self, root: &DirectionRoot, index: u64) -> Seeker;

    fn seal_message(
        &self,
        root: &DirectionRoot,
        index: u64,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, ChatError>;

    /// Fails with [`ChatError::DecryptionFailed`].
    fn open_message(
        &self,
        root: &DirectionRoot,
        index: u64,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, ChatError>;
}

#[derive(Serialize, Deserialize)]
struct AnnouncementBody {
    sender: PublicIdentity,
    recipient: PublicIdentity,
    created_at: i64,
    signature: Vec<u8>,
}

/// X25519 + Ed25519 + HKDF-SHA256 + ChaCha20-Poly1305 + BLAKE3.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSessionCrypto;

impl DefaultSessionCrypto {
    pub fn new() -> Self {
        Self
    }

    fn ephemeral_context(
        nonce: &[u8; ANNOUNCEMENT_NONCE_LEN],
        recipient: &PublicIdentity,
    ) -> Vec<u8> {
        let mut context = Vec::with_capacity(EPHEMERAL_INFO.len() + nonce.len() + PUBLIC_IDENTITY_LEN);
        context.extend_from_slice(EPHEMERAL_INFO);
        context.extend_from_slice(nonce);
        context.extend_from_slice(&recipient.to_bytes());
        context
    }

    fn transcript(
        ephemeral_public: &[u8; 32],
        sender: &PublicIdentity,
        recipient: &PublicIdentity,
        created_at: i64,
    ) -> Vec<u8> {
        let mut transcript = Vec::with_capacity(SIGNATURE_DOMAIN.len() + 32 + 2 * PUBLIC_IDENTITY_LEN + 8);
        transcript.extend_from_slice(SIGNATURE_DOMAIN);
        transcript.extend_from_slice(ephemeral_public);
        transcript.extend_from_slice(&recipient.to_bytes());
        transcript.extend_from_slice(&sender.to_bytes());
        transcript.extend_from_slice(&created_at.to_be_bytes());
        transcript
    }

    fn body_key(
        shared: &[u8; 32],
        ephemeral_public: &[u8; 32],
        recipient: &PublicIdentity,
    ) -> Result<Zeroizing<[u8; 32]>, ChatError> {
        let mut info = Vec::with_capacity(BODY_KEY_INFO.len() + 32 + PUBLIC_IDENTITY_LEN);
        info.extend_from_slice(BODY_KEY_INFO);
        info.extend_from_slice(ephemeral_public);
        info.extend_from_slice(&recipient.to_bytes());
        Ok(Zeroizing::new(hkdf_expand(None, shared, &info)?))
    }

    fn root(
        eph_shared: &[u8; 32],
        static_shared: &[u8; 32],
        sender: &PublicIdentity,
        recipient: &PublicIdentity,
        ephemeral_public: &[u8; 32],
    ) -> Result<DirectionRoot, ChatError> {
        if eph_shared == &[0u8; 32] || static_shared == &[0u8; 32] {
            return Err(ChatError::Crypto("Non-contributory key agreement".to_string()));
        }
        let mut ikm = Zeroizing::new(Vec::with_capacity(64));
        ikm.extend_from_slice(eph_shared);
        ikm.extend_from_slice(static_shared);

        let mut info = Vec::with_capacity(ROOT_INFO.len() + 2 * PUBLIC_IDENTITY_LEN + 32);
        info.extend_from_slice(ROOT_INFO);
        info.extend_from_slice(&sender.to_bytes());
        info.extend_from_slice(&recipient.to_bytes());
        info.extend_from_slice(ephemeral_public);

        Ok(DirectionRoot(hkdf_expand(None, &ikm, &info)?))
    }

    fn message_key(root: &DirectionRoot, index: u64) -> Result<Zeroizing<[u8; 32]>, ChatError> {
        let mut info = Vec::with_capacity(MESSAGE_KEY_INFO.len() + 8);
        info.extend_from_slice(MESSAGE_KEY_INFO);
        info.extend_from_slice(&index.to_be_bytes());
        Ok(Zeroizing::new(hkdf_expand(None, root.as_bytes(), &info)?))
    }
}

fn invalid(reason: &str) -> ChatError {
    ChatError::HandshakeValidationFailed(reason.to_string())
}

impl SessionCrypto for DefaultSessionCrypto {
    fn discovery_seeker(&self, recipient: &PublicIdentity) -> Seeker {
        Seeker(blake3::derive_key(DISCOVERY_CONTEXT, &recipient.to_bytes()))
    }

    fn seal_announcement(
        &self,
        identity: &IdentityKeypair,
        recipient: &PublicIdentity,
        nonce: &[u8; ANNOUNCEMENT_NONCE_LEN],
        created_at: i64,
    ) -> Result<Vec<u8>, ChatError> {
        let ephemeral = identity.derive_ephemeral(&Self::ephemeral_context(nonce, recipient));
        let ephemeral_public = *X25519PublicKey::from(&ephemeral).as_bytes();
        let shared = Zeroizing::new(*ephemeral.diffie_hellman(recipient.x25519()).as_bytes());

        let sender = identity.public_identity();
        let signature = identity.sign(&Self::transcript(&ephemeral_public, &sender, recipient, created_at));
        let body = AnnouncementBody {
            sender,
            recipient: *recipient,
            created_at,
            signature: signature.to_bytes().to_vec(),
        };
        let encoded = postcard::to_allocvec(&body)?;

        let key = Self::body_key(&shared, &ephemeral_public, recipient)?;
        let sealed = AeadCipher::new(&key).encrypt(&encoded)?;

        let mut payload = Vec::with_capacity(32 + sealed.len());
        payload.extend_from_slice(&ephemeral_public);
        payload.extend_from_slice(&sealed);
        Ok(payload)
    }

    fn open_announcement(
        &self,
        identity: &IdentityKeypair,
        payload: &[u8],
    ) -> Result<ValidatedAnnouncement, ChatError> {
        if payload.len() < 32 + NONCE_SIZE + TAG_SIZE {
            return Err(invalid("announcement too short"));
        }
        let mut ephemeral_public = [0u8; 32];
        ephemeral_public.copy_from_slice(&payload[..32]);

        let me = identity.public_identity();
        let shared = Zeroizing::new(identity.diffie_hellman(&X25519PublicKey::from(ephemeral_public)));
        if *shared == [0u8; 32] {
            return Err(invalid("degenerate ephemeral key"));
        }
        let key = Self::body_key(&shared, &ephemeral_public, &me)?;
        let encoded = AeadCipher::new(&key)
            .decrypt(&payload[32..])
            .map_err(|_| invalid("announcement not addressed to this identity"))?;
        let body: AnnouncementBody =
            postcard::from_bytes(&encoded).map_err(|_| invalid("malformed announcement body"))?;

        if body.recipient != me {
            return Err(invalid("recipient mismatch"));
        }
        if body.sender == me {
            return Err(invalid("announcement from own identity"));
        }
        let signature =
            Signature::from_slice(&body.signature).map_err(|_| invalid("malformed signature"))?;
        let transcript = Self::transcript(&ephemeral_public, &body.sender, &me, body.created_at);
        if !body.sender.verify(&transcript, &signature) {
            return Err(invalid("bad signature"));
        }

        Ok(ValidatedAnnouncement {
            sender: body.sender,
            ephemeral_public,
            created_at: body.created_at,
            id: *blake3::hash(payload).as_bytes(),
        })
    }

    fn outgoing_root(
        &self,
        identity: &IdentityKeypair,
        recipient: &PublicIdentity,
        nonce: &[u8; ANNOUNCEMENT_NONCE_LEN],
    ) -> Result<DirectionRoot, ChatError> {
        let ephemeral = identity.derive_ephemeral(&Self::ephemeral_context(nonce, recipient));
        let ephemeral_public = *X25519PublicKey::from(&ephemeral).as_bytes();
        let eph_shared = Zeroizing::new(*ephemeral.diffie_hellman(recipient.x25519()).as_bytes());
        let static_shared = Zeroizing::new(identity.diffie_hellman(recipient.x25519()));
        Self::root(
            &eph_shared,
            &static_shared,
            &identity.public_identity(),
            recipient,
            &ephemeral_public,
        )
    }

    fn incoming_root(
        &self,
        identity: &IdentityKeypair,
        sender: &PublicIdentity,
        ephemeral_public: &[u8; 32],
    ) -> Result<DirectionRoot, ChatError> {
        let eph_shared = Zeroizing::new(identity.diffie_hellman(&X25519PublicKey::from(*ephemeral_public)));
        let static_shared = Zeroizing::new(identity.diffie_hellman(sender.x25519()));
        Self::root(
            &eph_shared,
            &static_shared,
            sender,
            &identity.public_identity(),
            ephemeral_public,
        )
    }

    fn seeker(&self, root: &DirectionRoot, index: u64) -> Seeker {
        let mut input = [0u8; 14];
        input[..6].copy_from_slice(b"seeker");
        input[6..].copy_from_slice(&index.to_be_bytes());
        Seeker(*blake3::keyed_hash(root.as_bytes(), &input).as_bytes())
    }

    fn seal_message(
        &self,
        root: &DirectionRoot,
        index: u64,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, ChatError> {
        let key = Self::message_key(root, index)?;
        AeadCipher::new(&key).encrypt(plaintext)
    }

    fn open_message(
        &self,
        root: &DirectionRoot,
        index: u64,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, ChatError> {
        let key = Self::message_key(root, index)?;
        AeadCipher::new(&key).decrypt(ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (IdentityKeypair, IdentityKeypair) {
        (
            IdentityKeypair::generate().unwrap(),
            IdentityKeypair::generate().unwrap(),
        )
    }

    #[test]
    fn test_announcement_roundtrip() {
        let crypto = DefaultSessionCrypto::new();
        let (alice, bob) = pair();
        let nonce = [4u8; ANNOUNCEMENT_NONCE_LEN];

        let payload = crypto
            .seal_announcement(&alice, &bob.public_identity(), &nonce, 1234)
            .unwrap();
        let validated = crypto.open_announcement(&bob, &payload).unwrap();

        assert_eq!(validated.sender, alice.public_identity());
        assert_eq!(validated.created_at, 1234);
    }

    #[test]
    fn test_announcement_for_someone_else_rejected() {
        let crypto = DefaultSessionCrypto::new();
        let (alice, bob) = pair();
        let carol = IdentityKeypair::generate().unwrap();

        let payload = crypto
            .seal_announcement(&alice, &bob.public_identity(), &[0u8; 16], 1)
            .unwrap();
        let err = crypto.open_announcement(&carol, &payload).unwrap_err();
        assert!(matches!(err, ChatError::HandshakeValidationFailed(_)));
    }

    #[test]
    fn test_tampered_announcement_rejected() {
        let crypto = DefaultSessionCrypto::new();
        let (alice, bob) = pair();
        let mut payload = crypto
            .seal_announcement(&alice, &bob.public_identity(), &[0u8; 16], 1)
            .unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0xFF;

        assert!(crypto.open_announcement(&bob, &payload).is_err());
        assert!(crypto.open_announcement(&bob, &payload[..20]).is_err());
    }

    #[test]
    fn test_direction_roots_agree() {
        let crypto = DefaultSessionCrypto::new();
        let (alice, bob) = pair();
        let nonce = [8u8; ANNOUNCEMENT_NONCE_LEN];

        let payload = crypto
            .seal_announcement(&alice, &bob.public_identity(), &nonce, 1)
            .unwrap();
        let validated = crypto.open_announcement(&bob, &payload).unwrap();

        let sender_root = crypto
            .outgoing_root(&alice, &bob.public_identity(), &nonce)
            .unwrap();
        let receiver_root = crypto
            .incoming_root(&bob, &alice.public_identity(), &validated.ephemeral_public)
            .unwrap();
        assert_eq!(sender_root.as_bytes(), receiver_root.as_bytes());

        assert_eq!(crypto.seeker(&sender_root, 0), crypto.seeker(&receiver_root, 0));
        assert_ne!(crypto.seeker(&sender_root, 0), crypto.seeker(&sender_root, 1));

        let sealed = crypto.seal_message(&sender_root, 3, b"hi bob").unwrap();
        assert_eq!(crypto.open_message(&receiver_root, 3, &sealed).unwrap(), b"hi bob");
        assert!(matches!(
            crypto.open_message(&receiver_root, 4, &sealed),
            Err(ChatError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_different_nonces_give_different_roots() {
        let crypto = DefaultSessionCrypto::new();
        let (alice, bob) = pair();
        let a = crypto.outgoing_root(&alice, &bob.public_identity(), &[1u8; 16]).unwrap();
        let b = crypto.outgoing_root(&alice, &bob.public_identity(), &[2u8; 16]).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_discovery_seeker_is_per_recipient() {
        let crypto = DefaultSessionCrypto::new();
        let (alice, bob) = pair();
        assert_ne!(
            crypto.discovery_seeker(&alice.public_identity()),
            crypto.discovery_seeker(&bob.public_identity())
        );
    }
}
