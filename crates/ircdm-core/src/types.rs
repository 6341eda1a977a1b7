//! Records and results shared across the ledger and the exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ircdm_crypto::{Bundle, Fingerprint};

use crate::keys::PeerId;

/// How a candidate bundle relates to what is stored for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// Nothing stored yet
    New,
    /// Fingerprint matches the stored one
    Same,
    /// A different key is stored
    Changed,
}

/// Result of comparing a candidate bundle against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub status: KeyStatus,
    pub existing_fingerprint: Option<Fingerprint>,
    pub new_fingerprint: Fingerprint,
}

/// Per-peer trust state. `verified` only changes by explicit user action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustRecord {
    pub fingerprint: Fingerprint,
    pub verified: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationStatus {
    pub fingerprint: Fingerprint,
    pub verified: bool,
}

/// Why a key is waiting for a human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingReason {
    /// Explicit offer for a peer we hold no key for
    Offer,
    /// Explicit offer that differs from the stored key
    Change,
    /// Unsolicited bundle that differs from the stored key
    Legacy,
}

impl PendingReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PendingReason::Offer => "offer",
            PendingReason::Change => "change",
            PendingReason::Legacy => "legacy",
        }
    }
}

/// A key awaiting accept/reject. At most one per peer; a newer one replaces
/// the older.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingKeyRequest {
    pub peer: PeerId,
    pub bundle: Bundle,
    pub timestamp: DateTime<Utc>,
    pub reason: PendingReason,
    pub existing_fingerprint: Option<Fingerprint>,
    pub new_fingerprint: Fingerprint,
}

/// Emitted after every successful store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleStored {
    pub peer: PeerId,
    pub bundle: Bundle,
    pub fingerprint: Fingerprint,
    /// Classification at the moment of storing; `Changed` only for approved
    /// replacements
    pub status: KeyStatus,
}

/// Outcome of [`KeyExchange::handle_key_acceptance`](crate::exchange::KeyExchange::handle_key_acceptance).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptanceOutcome {
    Stored,
    Pending,
    Invalid,
}

/// One row of a peer listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSummary {
    pub nick: String,
    pub fingerprint: Fingerprint,
    pub verified: bool,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Outcome of importing an out-of-band payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Bundle is new or different and now waits for review
    BundleReceived(PendingKeyRequest),
    /// Bundle matches the key already stored
    AlreadyTrusted(Fingerprint),
    /// Fingerprint-only payload compared against the stored key
    FingerprintCompared {
        matches: bool,
        expected: Fingerprint,
        stored: Option<Fingerprint>,
    },
}
