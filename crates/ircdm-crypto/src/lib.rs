#![forbid(unsafe_code)]

//! Crypto primitives and wire codecs for end-to-end encrypted IRC DMs.
//!
//! - `identity`: Ed25519 identity key and X25519 encryption key
//! - `bundle`: signed binding of an encryption key to an identity key
//! - `fingerprint`: human-comparable digest of a bundle
//! - `message`: per-peer key derivation and ChaCha20-Poly1305 sealing
//! - `payload`: out-of-band (QR / NFC / file) payload contract

pub mod hash;
pub mod codec;
pub mod identity;
pub mod bundle;
pub mod fingerprint;
pub mod message;
pub mod payload;
pub mod utils;

#[cfg(test)]
mod proptests;

pub use bundle::{sign_bundle, verify_bundle, Bundle, BundleError, BUNDLE_VERSION};
pub use fingerprint::{fingerprint, format_for_display, Fingerprint, FingerprintParseError};
pub use identity::{verify_signature, Identity, IdentityError};
pub use message::{derive_shared_key, open, seal, CipherError, EncryptedMessage, MessageKey};
pub use payload::{BundlePayload, ExternalPayload, FingerprintPayload, PayloadError, PAYLOAD_VERSION};
