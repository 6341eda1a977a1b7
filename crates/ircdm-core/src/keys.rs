//! Secret-store key scheme and peer identifiers.
//!
//! ```text
//! ircdm.identity.v1
//! ircdm.bundle.net:<network>:<nick>     ircdm.trust.net:<network>:<nick>
//! ircdm.bundle:<nick>                   ircdm.trust:<nick>        (legacy)
//! ```
//!
//! Nicks are folded to lowercase before they become part of a key. The
//! network identifier is used as given (trimmed). IRC nicks cannot contain
//! `:`, so network-scoped keys split on the last colon.

use std::fmt;

pub const IDENTITY_KEY: &str = "ircdm.identity.v1";

const BUNDLE_NET_PREFIX: &str = "ircdm.bundle.net:";
const TRUST_NET_PREFIX: &str = "ircdm.trust.net:";
const BUNDLE_LEGACY_PREFIX: &str = "ircdm.bundle:";
const TRUST_LEGACY_PREFIX: &str = "ircdm.trust:";

/// Case-fold a nickname for keying and comparison.
pub fn fold_nick(nick: &str) -> String {
    nick.trim().to_lowercase()
}

/// One trust relationship: a nick on a network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    network: String,
    nick: String,
}

impl PeerId {
    pub fn new(network: impl AsRef<str>, nick: impl AsRef<str>) -> Self {
        Self {
            network: network.as_ref().trim().to_string(),
            nick: fold_nick(nick.as_ref()),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Folded nick.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Same nick on another network.
    pub fn on_network(&self, network: impl AsRef<str>) -> Self {
        Self::new(network, &self.nick)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.nick, self.network)
    }
}

pub fn bundle_key(peer: &PeerId) -> String {
    format!("{BUNDLE_NET_PREFIX}{}:{}", peer.network, peer.nick)
}

pub fn trust_key(peer: &PeerId) -> String {
    format!("{TRUST_NET_PREFIX}{}:{}", peer.network, peer.nick)
}

pub fn legacy_bundle_key(nick: &str) -> String {
    format!("{BUNDLE_LEGACY_PREFIX}{}", fold_nick(nick))
}

pub fn legacy_trust_key(nick: &str) -> String {
    format!("{TRUST_LEGACY_PREFIX}{}", fold_nick(nick))
}

/// What a stored key refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredKey {
    Identity,
    Bundle(PeerId),
    Trust(PeerId),
    LegacyBundle(String),
    LegacyTrust(String),
}

/// Parse a secret-store key back into what it names. Keys outside the
/// scheme return `None`.
pub fn parse_key(key: &str) -> Option<StoredKey> {
    if key == IDENTITY_KEY {
        return Some(StoredKey::Identity);
    }
    // network-scoped prefixes first: the legacy ones are their prefixes
    if let Some(rest) = key.strip_prefix(BUNDLE_NET_PREFIX) {
        return split_scoped(rest).map(StoredKey::Bundle);
    }
    if let Some(rest) = key.strip_prefix(TRUST_NET_PREFIX) {
        return split_scoped(rest).map(StoredKey::Trust);
    }
    if let Some(nick) = key.strip_prefix(BUNDLE_LEGACY_PREFIX) {
        return non_empty(nick).map(StoredKey::LegacyBundle);
    }
    if let Some(nick) = key.strip_prefix(TRUST_LEGACY_PREFIX) {
        return non_empty(nick).map(StoredKey::LegacyTrust);
    }
    None
}

fn split_scoped(rest: &str) -> Option<PeerId> {
    let (network, nick) = rest.rsplit_once(':')?;
    if network.is_empty() || nick.is_empty() {
        return None;
    }
    Some(PeerId::new(network, nick))
}

fn non_empty(nick: &str) -> Option<String> {
    (!nick.is_empty()).then(|| fold_nick(nick))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nick_is_folded() {
        let a = PeerId::new("Libera", "Bob");
        let b = PeerId::new("Libera", " BOB ");
        assert_eq!(a, b);
        assert_eq!(a.nick(), "bob");
        assert_eq!(bundle_key(&a), "ircdm.bundle.net:Libera:bob");
    }

    #[test]
    fn test_network_is_verbatim() {
        assert_ne!(PeerId::new("Libera", "bob"), PeerId::new("libera", "bob"));
        assert_eq!(PeerId::new(" Libera ", "bob").network(), "Libera");
    }

    #[test]
    fn test_unicode_folding() {
        assert_eq!(fold_nick("ÄLICE"), "älice");
    }

    #[test]
    fn test_legacy_keys() {
        assert_eq!(legacy_bundle_key("Bob"), "ircdm.bundle:bob");
        assert_eq!(legacy_trust_key("Bob"), "ircdm.trust:bob");
    }

    #[test]
    fn test_parse_round_trip() {
        let peer = PeerId::new("irc.example.net:6697", "carol");
        assert_eq!(parse_key(&bundle_key(&peer)), Some(StoredKey::Bundle(peer.clone())));
        assert_eq!(parse_key(&trust_key(&peer)), Some(StoredKey::Trust(peer)));
        assert_eq!(
            parse_key(&legacy_bundle_key("Dave")),
            Some(StoredKey::LegacyBundle("dave".into()))
        );
        assert_eq!(
            parse_key(&legacy_trust_key("Dave")),
            Some(StoredKey::LegacyTrust("dave".into()))
        );
        assert_eq!(parse_key(IDENTITY_KEY), Some(StoredKey::Identity));
    }

    #[test]
    fn test_parse_rejects_foreign_keys() {
        assert_eq!(parse_key("other.app.key"), None);
        assert_eq!(parse_key("ircdm.bundle.net:onlynetwork"), None);
        assert_eq!(parse_key("ircdm.bundle:"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(PeerId::new("Libera", "Bob").to_string(), "bob@Libera");
    }
}
