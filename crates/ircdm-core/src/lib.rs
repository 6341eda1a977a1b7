//! ircdm core: trust establishment for end-to-end encrypted IRC direct
//! messages.
//!
//! This crate implements:
//! - Identity persistence (one identity per installation)
//! - Bundle export and verification
//! - The trust ledger (per-network, per-nick keys and trust records)
//! - The key exchange protocol (offers, pending review, awaiting keys)
//! - Out-of-band payload import/export
//! - Message encryption against stored keys
//! - The secret-store abstraction the host application implements

#![forbid(unsafe_code)]

// Protocol
pub mod exchange;
pub mod ledger;
pub mod cipher;
pub mod bundles;
pub mod identity;

// Infrastructure
pub mod secrets;
pub mod keys;
pub mod events;
pub mod config;
mod waiters;

// Supporting modules
pub mod errors;
pub mod types;
pub mod harness;

// Optional storage implementations
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

#[cfg(test)]
mod proptests;

pub use bundles::BundleEngine;
pub use cipher::MessageCipher;
pub use config::ExchangeConfig;
pub use errors::{CoreError, ErrorKind, StoreError};
pub use events::{CollectingObserver, ExchangeObserver, ObservedEvent};
pub use exchange::{KeyExchange, KeyExchangeBuilder};
pub use identity::{IdentityInfo, IdentityStore};
pub use keys::PeerId;
pub use ledger::TrustLedger;
pub use secrets::{InMemorySecretStore, SecretStore};
pub use types::{
    AcceptanceOutcome, BundleStored, Comparison, ImportOutcome, KeyStatus, PeerSummary,
    PendingKeyRequest, PendingReason, TrustRecord, VerificationStatus,
};

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteSecretStore;
