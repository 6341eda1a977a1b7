//! Key bundles: an encryption public key bound to an identity public key.
//!
//! `sig` is an Ed25519 signature by the identity key over the raw 32 bytes of
//! `encPub`. A peer's bundle is the only externally supplied,
//! security-relevant object, so [`verify_bundle`] is the gate every inbound
//! path goes through.

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::codec::b64_array;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::identity::{verify_signature, Identity, IdentityError};

/// The only bundle version this crate produces or accepts.
pub const BUNDLE_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BundleError {
    #[error("unsupported bundle version {0}")]
    UnsupportedVersion(u8),
    #[error("bundle signature does not verify")]
    BadSignature,
    #[error("bundle identity key is not a valid Ed25519 point")]
    InvalidKey,
    #[error("bundle encryption key is a low-order point")]
    WeakEncryptionKey,
    #[error("malformed bundle: {0}")]
    Malformed(String),
}

/// Signed statement binding `enc_pub` to `id_pub`. Wire form is camelCase
/// JSON with base64 key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub version: u8,
    #[serde(with = "b64_array")]
    pub id_pub: [u8; 32],
    #[serde(with = "b64_array")]
    pub enc_pub: [u8; 32],
    #[serde(with = "b64_array")]
    pub sig: [u8; 64],
}

impl Bundle {
    /// Fingerprint over `id_pub || enc_pub`.
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(&self.id_pub, &self.enc_pub)
    }

    pub fn to_json(&self) -> String {
        // a struct of integers and strings cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a bundle from its JSON body. Does not verify it.
    pub fn from_json(raw: &str) -> Result<Self, BundleError> {
        serde_json::from_str(raw.trim()).map_err(|e| BundleError::Malformed(e.to_string()))
    }
}

/// Build the local bundle: sign our encryption key with our identity key.
pub fn sign_bundle(identity: &Identity) -> Bundle {
    let enc_pub = identity.enc_pub();
    Bundle {
        version: BUNDLE_VERSION,
        id_pub: identity.id_pub(),
        enc_pub,
        sig: identity.sign(&enc_pub),
    }
}

/// Reject unknown versions, bundles whose signature does not cover
/// `enc_pub` under `id_pub`, and low-order encryption keys.
pub fn verify_bundle(bundle: &Bundle) -> Result<(), BundleError> {
    if bundle.version != BUNDLE_VERSION {
        return Err(BundleError::UnsupportedVersion(bundle.version));
    }
    verify_signature(&bundle.id_pub, &bundle.enc_pub, &bundle.sig).map_err(|e| match e {
        IdentityError::InvalidPublicKey => BundleError::InvalidKey,
        _ => BundleError::BadSignature,
    })?;
    if !is_contributory(&bundle.enc_pub) {
        return Err(BundleError::WeakEncryptionKey);
    }
    Ok(())
}

/// A clamped scalar is a multiple of the cofactor, so the product is the
/// identity exactly when `point` has small order.
fn is_contributory(point: &[u8; 32]) -> bool {
    StaticSecret::from([0x5a; 32])
        .diffie_hellman(&X25519PublicKey::from(*point))
        .was_contributory()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_bundle_verifies() {
        let identity = Identity::generate().unwrap();
        let bundle = sign_bundle(&identity);

        assert_eq!(bundle.version, BUNDLE_VERSION);
        assert_eq!(bundle.id_pub, identity.id_pub());
        assert_eq!(bundle.enc_pub, identity.enc_pub());
        assert!(verify_bundle(&bundle).is_ok());
    }

    #[test]
    fn test_swapped_enc_key_rejected() {
        let alice = Identity::generate().unwrap();
        let mallory = Identity::generate().unwrap();

        let mut bundle = sign_bundle(&alice);
        bundle.enc_pub = mallory.enc_pub();

        assert_eq!(verify_bundle(&bundle), Err(BundleError::BadSignature));
    }

    #[test]
    fn test_swapped_identity_key_rejected() {
        let alice = Identity::generate().unwrap();
        let mallory = Identity::generate().unwrap();

        let mut bundle = sign_bundle(&mallory);
        bundle.id_pub = alice.id_pub();

        assert!(verify_bundle(&bundle).is_err());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let identity = Identity::generate().unwrap();
        let mut bundle = sign_bundle(&identity);
        bundle.version = 2;

        assert_eq!(verify_bundle(&bundle), Err(BundleError::UnsupportedVersion(2)));
    }

    #[test]
    fn test_json_shape() {
        let identity = Identity::generate().unwrap();
        let bundle = sign_bundle(&identity);
        let value: serde_json::Value = serde_json::from_str(&bundle.to_json()).unwrap();

        assert_eq!(value["version"], 1);
        assert!(value["idPub"].is_string());
        assert!(value["encPub"].is_string());
        assert!(value["sig"].is_string());
    }

    #[test]
    fn test_low_order_enc_key_rejected() {
        let identity = Identity::generate().unwrap();
        let mut order_four = [0u8; 32];
        order_four[0] = 1;

        for weak in [[0u8; 32], order_four] {
            let bundle = Bundle {
                version: BUNDLE_VERSION,
                id_pub: identity.id_pub(),
                enc_pub: weak,
                sig: identity.sign(&weak),
            };
            assert_eq!(verify_bundle(&bundle), Err(BundleError::WeakEncryptionKey));
        }
    }
}
