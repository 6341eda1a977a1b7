//! Out-of-band payloads (QR code, NFC tag, file).
//!
//! ```json
//! {"v":1,"type":"bundle","nick":"alice","bundle":{...},"fingerprint":"3f2a..."}
//! {"v":1,"type":"fingerprint","nick":"alice","fingerprint":"3f2a..."}
//! ```
//!
//! The `nick` lets the consumer refuse a payload meant for someone else.

use serde::{Deserialize, Serialize};

use crate::bundle::{verify_bundle, Bundle, BundleError};
use crate::fingerprint::Fingerprint;

pub const PAYLOAD_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u8),
    #[error("declared fingerprint {declared} does not match bundle fingerprint {actual}")]
    FingerprintMismatch { declared: String, actual: String },
    #[error(transparent)]
    Bundle(#[from] BundleError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePayload {
    pub v: u8,
    pub nick: String,
    pub bundle: Bundle,
    pub fingerprint: Fingerprint,
}

impl BundlePayload {
    pub fn new(nick: impl Into<String>, bundle: Bundle) -> Self {
        let fingerprint = bundle.fingerprint();
        Self {
            v: PAYLOAD_VERSION,
            nick: nick.into(),
            bundle,
            fingerprint,
        }
    }

    /// Check the bundle signature and that the declared fingerprint is the
    /// bundle's own.
    pub fn verify(&self) -> Result<(), PayloadError> {
        verify_bundle(&self.bundle)?;
        let actual = self.bundle.fingerprint();
        if actual != self.fingerprint {
            return Err(PayloadError::FingerprintMismatch {
                declared: self.fingerprint.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintPayload {
    pub v: u8,
    pub nick: String,
    pub fingerprint: Fingerprint,
}

impl FingerprintPayload {
    pub fn new(nick: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            v: PAYLOAD_VERSION,
            nick: nick.into(),
            fingerprint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExternalPayload {
    Bundle(BundlePayload),
    Fingerprint(FingerprintPayload),
}

impl ExternalPayload {
    /// Parse and version-check a payload. Bundle signatures are not checked
    /// here; see [`BundlePayload::verify`].
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        let payload: Self = serde_json::from_str(raw.trim())
            .map_err(|e| PayloadError::Malformed(e.to_string()))?;
        let v = payload.version();
        if v != PAYLOAD_VERSION {
            return Err(PayloadError::UnsupportedVersion(v));
        }
        Ok(payload)
    }

    pub fn version(&self) -> u8 {
        match self {
            Self::Bundle(p) => p.v,
            Self::Fingerprint(p) => p.v,
        }
    }

    pub fn nick(&self) -> &str {
        match self {
            Self::Bundle(p) => &p.nick,
            Self::Fingerprint(p) => &p.nick,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            Self::Bundle(p) => &p.fingerprint,
            Self::Fingerprint(p) => &p.fingerprint,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<BundlePayload> for ExternalPayload {
    fn from(p: BundlePayload) -> Self {
        Self::Bundle(p)
    }
}

impl From<FingerprintPayload> for ExternalPayload {
    fn from(p: FingerprintPayload) -> Self {
        Self::Fingerprint(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::sign_bundle;
    use crate::identity::Identity;

    fn alice_payload() -> BundlePayload {
        let identity = Identity::generate().unwrap();
        BundlePayload::new("Alice", sign_bundle(&identity))
    }

    #[test]
    fn test_bundle_payload_wire_shape() {
        let payload: ExternalPayload = alice_payload().into();
        let value: serde_json::Value = serde_json::from_str(&payload.to_json()).unwrap();

        assert_eq!(value["v"], 1);
        assert_eq!(value["type"], "bundle");
        assert_eq!(value["nick"], "Alice");
        assert!(value["bundle"]["idPub"].is_string());
        assert_eq!(value["fingerprint"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_fingerprint_payload_round_trip() {
        let fp = alice_payload().fingerprint;
        let payload: ExternalPayload = FingerprintPayload::new("Alice", fp).into();

        let parsed = ExternalPayload::parse(&payload.to_json()).unwrap();
        assert_eq!(parsed, payload);
        assert_eq!(parsed.nick(), "Alice");
        assert_eq!(parsed.fingerprint(), &fp);
    }

    #[test]
    fn test_bundle_payload_verifies() {
        let payload = alice_payload();
        assert!(payload.verify().is_ok());
    }

    #[test]
    fn test_declared_fingerprint_must_match() {
        let mut payload = alice_payload();
        payload.fingerprint = Fingerprint::from_bytes([0u8; 32]);
        assert!(matches!(
            payload.verify(),
            Err(PayloadError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_signature_surfaces_as_bundle_error() {
        let mut payload = alice_payload();
        payload.bundle.sig[0] ^= 1;
        assert!(matches!(payload.verify(), Err(PayloadError::Bundle(_))));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let raw = format!(
            r#"{{"v":2,"type":"fingerprint","nick":"alice","fingerprint":"{}"}}"#,
            "ab".repeat(32)
        );
        assert_eq!(
            ExternalPayload::parse(&raw),
            Err(PayloadError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = r#"{"v":1,"type":"contact","nick":"alice"}"#;
        assert!(matches!(
            ExternalPayload::parse(raw),
            Err(PayloadError::Malformed(_))
        ));
    }
}
