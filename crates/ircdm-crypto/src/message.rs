//! Direct-message encryption against a peer's bundle.
//!
//! message key = HKDF-SHA256(X25519(local encPriv, peer encPub)); the raw
//! ECDH output is never used as a cipher key. Each message gets a fresh
//! random 12-byte nonce and the sender's own `encPub` is carried in the
//! clear so the receiver can check it against the key it trusts.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use getrandom::getrandom;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::codec::{b64_array, b64_vec};
use crate::identity::Identity;
use crate::utils::constant_time_compare_array;

/// Version tag of [`EncryptedMessage`].
pub const MESSAGE_VERSION: u8 = 1;

const KDF_SALT: &[u8] = b"ircdm_dm_kdf_v1";
const KDF_INFO: &[u8] = b"ircdm_message_key_v1";
const AAD_LABEL: &[u8] = b"ircdm_msg_v1";

/// Error type for message sealing and opening.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("sender key does not match the trusted key for this peer")]
    KeyMismatch,
    #[error("unsupported message version {0}")]
    UnsupportedVersion(u8),
    #[error("peer encryption key is a low-order point")]
    WeakKey,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("RNG failed")]
    RngError,
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// 32-byte symmetric key shared with one peer. Zeroized on drop.
pub struct MessageKey(Zeroizing<[u8; 32]>);

impl MessageKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Derive the symmetric key shared between our encryption key and a peer's.
pub fn derive_shared_key(
    local_enc_secret: &StaticSecret,
    peer_enc_pub: &[u8; 32],
) -> Result<MessageKey, CipherError> {
    let shared = local_enc_secret.diffie_hellman(&X25519PublicKey::from(*peer_enc_pub));
    if !shared.was_contributory() {
        return Err(CipherError::WeakKey);
    }

    let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), shared.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(KDF_INFO, &mut *key)
        .map_err(|_| CipherError::KeyDerivation)?;
    Ok(MessageKey(key))
}

/// Encrypted DM body as carried in-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMessage {
    pub v: u8,
    #[serde(with = "b64_array")]
    pub from_pub: [u8; 32],
    #[serde(with = "b64_array")]
    pub nonce: [u8; 12],
    #[serde(with = "b64_vec")]
    pub ciphertext: Vec<u8>,
}

impl EncryptedMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(raw: &str) -> Result<Self, CipherError> {
        serde_json::from_str(raw.trim()).map_err(|e| CipherError::Malformed(e.to_string()))
    }
}

/// AAD binds the version and both encryption keys, sender first.
fn message_aad(from_pub: &[u8; 32], to_pub: &[u8; 32]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(AAD_LABEL.len() + 1 + 64);
    aad.extend_from_slice(AAD_LABEL);
    aad.push(MESSAGE_VERSION);
    aad.extend_from_slice(from_pub);
    aad.extend_from_slice(to_pub);
    aad
}

/// Encrypt `plaintext` from `identity` to the holder of `peer_enc_pub`.
pub fn seal(
    identity: &Identity,
    peer_enc_pub: &[u8; 32],
    plaintext: &[u8],
) -> Result<EncryptedMessage, CipherError> {
    let key = derive_shared_key(identity.enc_secret(), peer_enc_pub)?;

    let mut nonce = [0u8; 12];
    getrandom(&mut nonce).map_err(|_| CipherError::RngError)?;

    let from_pub = identity.enc_pub();
    let aad = message_aad(&from_pub, peer_enc_pub);
    let ciphertext = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &aad })
        .map_err(|_| CipherError::EncryptionFailed)?;

    Ok(EncryptedMessage {
        v: MESSAGE_VERSION,
        from_pub,
        nonce,
        ciphertext,
    })
}

/// Decrypt a message that must come from `expected_from` (the peer's trusted
/// `encPub`).
///
/// The sender key is checked before any decryption is attempted, and an
/// authentication failure yields no plaintext at all.
pub fn open(
    identity: &Identity,
    message: &EncryptedMessage,
    expected_from: &[u8; 32],
) -> Result<Vec<u8>, CipherError> {
    if message.v != MESSAGE_VERSION {
        return Err(CipherError::UnsupportedVersion(message.v));
    }
    if !constant_time_compare_array(&message.from_pub, expected_from) {
        return Err(CipherError::KeyMismatch);
    }

    let key = derive_shared_key(identity.enc_secret(), expected_from)?;
    let aad = message_aad(expected_from, &identity.enc_pub());
    ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
        .decrypt(
            Nonce::from_slice(&message.nonce),
            Payload { msg: &message.ciphertext, aad: &aad },
        )
        .map_err(|_| CipherError::DecryptionFailed)
}
