//! Error types for ircdm core.
//!
//! Inbound, attacker-controlled data never surfaces as an error from the
//! exchange handlers (it is logged and dropped). Everything a caller
//! initiates (accept, reject, encrypt, decrypt, migrate) returns
//! [`CoreError`].

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use ircdm_crypto::{BundleError, CipherError, Fingerprint, IdentityError, PayloadError};

use crate::keys::PeerId;
pub use crate::secrets::StoreError;

/// Unified error type for ircdm core operations.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    /// Secure storage failed
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Identity keys could not be generated
    #[error("identity generation failed: {0}")]
    CryptoInit(String),

    /// A bundle failed version or signature checks
    #[error("bundle verification failed: {0}")]
    Verification(#[from] BundleError),

    /// A different key is already trusted for this peer and no human approved
    /// replacing it
    #[error("key for {peer} changed from {existing} to {new}; explicit approval required")]
    KeyChanged {
        peer: PeerId,
        existing: Fingerprint,
        new: Fingerprint,
    },

    #[error("no pending key offer for {0}")]
    NoPendingOffer(PeerId),

    #[error("encryption failed: {0}")]
    Encrypt(CipherError),

    #[error("decryption failed: {0}")]
    Decrypt(#[from] CipherError),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// No trusted bundle for this peer
    #[error("no key stored for {0}")]
    UnknownPeer(PeerId),

    #[error("timed out after {waited:?} waiting for a key from {peer}")]
    Timeout { peer: PeerId, waited: Duration },
}

/// Stable, machine-readable error category for UI and exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Storage,
    CryptoInit,
    Verification,
    KeyChanged,
    NoPendingOffer,
    Encrypt,
    Decrypt,
    InvalidPayload,
    UnknownPeer,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Storage => "storage_error",
            ErrorKind::CryptoInit => "crypto_init_error",
            ErrorKind::Verification => "verification_error",
            ErrorKind::KeyChanged => "key_changed",
            ErrorKind::NoPendingOffer => "no_pending_offer",
            ErrorKind::Encrypt => "encrypt_error",
            ErrorKind::Decrypt => "decrypt_error",
            ErrorKind::InvalidPayload => "invalid_payload",
            ErrorKind::UnknownPeer => "unknown_peer",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Storage(_) => ErrorKind::Storage,
            CoreError::CryptoInit(_) => ErrorKind::CryptoInit,
            CoreError::Verification(_) => ErrorKind::Verification,
            CoreError::KeyChanged { .. } => ErrorKind::KeyChanged,
            CoreError::NoPendingOffer(_) => ErrorKind::NoPendingOffer,
            CoreError::Encrypt(_) => ErrorKind::Encrypt,
            CoreError::Decrypt(_) => ErrorKind::Decrypt,
            CoreError::InvalidPayload(_) => ErrorKind::InvalidPayload,
            CoreError::UnknownPeer(_) => ErrorKind::UnknownPeer,
            CoreError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Whether retrying (possibly after user action) can succeed.
    ///
    /// Identity generation failure is fatal: there is no fallback to weaker
    /// randomness. Corrupted storage needs manual repair.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CoreError::CryptoInit(_) => false,
            CoreError::Storage(StoreError::DataCorruption(_)) => false,
            _ => true,
        }
    }

    /// Short message safe to show next to a peer's nick; no key material or
    /// storage internals.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Storage(_) => "Secure storage is unavailable".to_string(),
            CoreError::CryptoInit(_) => "Could not create encryption keys".to_string(),
            CoreError::Verification(_) => "The key could not be verified".to_string(),
            CoreError::KeyChanged { peer, .. } => {
                format!("The encryption key for {} has changed", peer.nick())
            }
            CoreError::NoPendingOffer(peer) => {
                format!("There is no pending key from {}", peer.nick())
            }
            CoreError::Encrypt(_) => "Message could not be encrypted".to_string(),
            CoreError::Decrypt(_) => "Message could not be decrypted".to_string(),
            CoreError::InvalidPayload(_) => "Invalid key data".to_string(),
            CoreError::UnknownPeer(peer) => format!("No key for {} yet", peer.nick()),
            CoreError::Timeout { peer, .. } => {
                format!("{} did not send a key in time", peer.nick())
            }
        }
    }
}

impl From<IdentityError> for CoreError {
    fn from(e: IdentityError) -> Self {
        CoreError::CryptoInit(e.to_string())
    }
}

impl From<PayloadError> for CoreError {
    fn from(e: PayloadError) -> Self {
        match e {
            PayloadError::Bundle(inner) => CoreError::Verification(inner),
            other => CoreError::InvalidPayload(other.to_string()),
        }
    }
}
