//! Local identity: an Ed25519 signing key and an X25519 encryption key.
//!
//! The signing key authenticates "this is really me"; the encryption key is
//! the one peers agree message keys with. Both secret halves zeroize on drop.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use getrandom::getrandom;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Error type for identity operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("secure random source unavailable: {0}")]
    Rng(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
}

/// One installation's long-lived key material.
pub struct Identity {
    /// Ed25519 signing private key
    sign_key: SigningKey,
    /// X25519 encryption private key
    enc_key: StaticSecret,
}

impl Identity {
    /// Generate a fresh identity from the OS random source.
    ///
    /// Fails rather than falling back to a weaker source when the OS RNG is
    /// unavailable.
    pub fn generate() -> Result<Self, IdentityError> {
        let mut sign_seed = Zeroizing::new([0u8; 32]);
        let mut enc_secret = Zeroizing::new([0u8; 32]);
        getrandom(&mut *sign_seed).map_err(|e| IdentityError::Rng(e.to_string()))?;
        getrandom(&mut *enc_secret).map_err(|e| IdentityError::Rng(e.to_string()))?;
        Ok(Self::from_bytes(&sign_seed, &enc_secret))
    }

    /// Rebuild an identity from persisted secret bytes.
    ///
    /// # Arguments
    /// * `sign_seed` - 32-byte Ed25519 private key seed
    /// * `enc_secret` - 32-byte X25519 private key
    pub fn from_bytes(sign_seed: &[u8; 32], enc_secret: &[u8; 32]) -> Self {
        Self {
            sign_key: SigningKey::from_bytes(sign_seed),
            enc_key: StaticSecret::from(*enc_secret),
        }
    }

    /// Ed25519 identity public key (`idPub`).
    pub fn id_pub(&self) -> [u8; 32] {
        self.sign_key.verifying_key().to_bytes()
    }

    /// X25519 encryption public key (`encPub`).
    pub fn enc_pub(&self) -> [u8; 32] {
        X25519PublicKey::from(&self.enc_key).to_bytes()
    }

    /// Ed25519 seed, for persistence only.
    pub fn sign_seed(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.sign_key.to_bytes())
    }

    /// X25519 secret, for persistence only.
    pub fn enc_secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.enc_key.to_bytes())
    }

    /// Sign a message; returns a 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signature: Signature = self.sign_key.sign(message);
        signature.to_bytes()
    }

    /// X25519 secret used for message key agreement.
    pub fn enc_secret(&self) -> &StaticSecret {
        &self.enc_key
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("id_pub", &hex::encode(self.id_pub()))
            .field("enc_pub", &hex::encode(self.enc_pub()))
            .finish_non_exhaustive()
    }
}

/// Verify an Ed25519 signature with strict (non-malleable) checking.
pub fn verify_signature(
    pub_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pub_key).map_err(|_| IdentityError::InvalidPublicKey)?;
    let sig = Signature::from_bytes(signature);
    verifying_key
        .verify_strict(message, &sig)
        .map_err(|_| IdentityError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let identity = Identity::generate().unwrap();
        let message = b"PRIVMSG bob :hello";

        let signature = identity.sign(message);
        assert!(verify_signature(&identity.id_pub(), message, &signature).is_ok());
    }

    #[test]
    fn test_signature_wrong_message_fails() {
        let identity = Identity::generate().unwrap();
        let signature = identity.sign(b"original");

        assert!(matches!(
            verify_signature(&identity.id_pub(), b"tampered", &signature),
            Err(IdentityError::InvalidSignature)
        ));
    }

    #[test]
    fn test_signature_wrong_key_fails() {
        let alice = Identity::generate().unwrap();
        let mallory = Identity::generate().unwrap();
        let signature = alice.sign(b"msg");

        assert!(verify_signature(&mallory.id_pub(), b"msg", &signature).is_err());
    }

    #[test]
    fn test_from_bytes_restores_same_keys() {
        let original = Identity::generate().unwrap();
        let restored = Identity::from_bytes(&original.sign_seed(), &original.enc_secret_bytes());

        assert_eq!(restored.id_pub(), original.id_pub());
        assert_eq!(restored.enc_pub(), original.enc_pub());
    }

    #[test]
    fn test_generated_identities_differ() {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        assert_ne!(a.id_pub(), b.id_pub());
        assert_ne!(a.enc_pub(), b.enc_pub());
    }

    #[test]
    fn test_debug_omits_secrets() {
        let identity = Identity::generate().unwrap();
        let rendered = format!("{identity:?}");
        assert!(rendered.contains(&hex::encode(identity.id_pub())));
        assert!(!rendered.contains(&hex::encode(*identity.sign_seed())));
    }
}
