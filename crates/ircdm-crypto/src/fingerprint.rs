//! Bundle fingerprints for out-of-band comparison.
//!
//! fingerprint = SHA-256(idPub || encPub), rendered as lowercase hex. The
//! display form groups the hex into blocks of four separated by spaces; it
//! parses back to the same value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::hash::sha256_concat;
use crate::utils::constant_time_compare_array;

/// Fingerprint length in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// Hex characters per display group.
pub const DISPLAY_GROUP: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FingerprintParseError {
    #[error("fingerprint is not valid hex")]
    InvalidHex,
    #[error("fingerprint must be {expected} hex characters, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

/// Digest identifying one (identity key, encryption key) pair.
#[derive(Clone, Copy)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

/// Compute the fingerprint of an identity key and encryption key.
pub fn fingerprint(id_pub: &[u8; 32], enc_pub: &[u8; 32]) -> Fingerprint {
    Fingerprint(sha256_concat(&[id_pub.as_slice(), enc_pub.as_slice()]))
}

/// Group a fingerprint's hex into space-separated blocks for humans.
pub fn format_for_display(fp: &Fingerprint) -> String {
    fp.to_display()
}

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Raw lowercase hex, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Grouped form, e.g. `"3f2a 91c0 ..."`.
    pub fn to_display(&self) -> String {
        let hex = self.to_hex();
        hex.as_bytes()
            .chunks(DISPLAY_GROUP)
            // hex output is ASCII so every chunk is valid UTF-8
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        constant_time_compare_array(&self.0, &other.0)
    }
}

impl Eq for Fingerprint {}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintParseError;

    /// Accepts raw hex or the grouped display form, in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .collect();
        if compact.len() != FINGERPRINT_LEN * 2 {
            return Err(FingerprintParseError::InvalidLength {
                expected: FINGERPRINT_LEN * 2,
                got: compact.len(),
            });
        }
        let mut out = [0u8; FINGERPRINT_LEN];
        hex::decode_to_slice(compact.to_ascii_lowercase(), &mut out)
            .map_err(|_| FingerprintParseError::InvalidHex)?;
        Ok(Self(out))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_groups_of_four() {
        let fp = fingerprint(&[1u8; 32], &[2u8; 32]);
        let display = fp.to_display();

        let groups: Vec<&str> = display.split(' ').collect();
        assert_eq!(groups.len(), 16);
        assert!(groups.iter().all(|g| g.len() == 4));
        assert_eq!(groups.concat(), fp.to_hex());
    }

    #[test]
    fn test_display_parses_back() {
        let fp = fingerprint(&[9u8; 32], &[8u8; 32]);
        let parsed: Fingerprint = fp.to_display().parse().unwrap();
        assert_eq!(parsed, fp);

        let upper: Fingerprint = fp.to_hex().to_uppercase().parse().unwrap();
        assert_eq!(upper, fp);
    }

    #[test]
    fn test_enc_key_rotation_changes_fingerprint() {
        let id = [5u8; 32];
        assert_ne!(fingerprint(&id, &[1u8; 32]), fingerprint(&id, &[2u8; 32]));
    }

    #[test]
    fn test_key_order_matters() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_ne!(fingerprint(&a, &b), fingerprint(&b, &a));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            "abcd".parse::<Fingerprint>(),
            Err(FingerprintParseError::InvalidLength { got: 4, .. })
        ));
        assert_eq!(
            "zz".repeat(32).parse::<Fingerprint>(),
            Err(FingerprintParseError::InvalidHex)
        );
    }

    #[test]
    fn test_serde_uses_raw_hex() {
        let fp = fingerprint(&[3u8; 32], &[4u8; 32]);
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    #[test]
    fn test_short_prefix() {
        let fp = fingerprint(&[3u8; 32], &[4u8; 32]);
        assert_eq!(fp.short().len(), 8);
        assert!(fp.to_hex().starts_with(&fp.short()));
    }
}
