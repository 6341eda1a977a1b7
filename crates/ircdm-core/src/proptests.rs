#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::keys::{bundle_key, fold_nick, parse_key, PeerId, StoredKey};

    proptest! {
        #[test]
        fn test_fold_is_idempotent(nick in "[\\p{L}\\p{N}]{1,32}") {
            let once = fold_nick(&nick);
            prop_assert_eq!(fold_nick(&once), once);
        }

        #[test]
        fn test_peer_id_ignores_nick_case(nick in "[A-Za-z\\[\\]\\\\`_^{|}][A-Za-z0-9\\[\\]\\\\`_^{|}-]{0,15}") {
            prop_assert_eq!(
                PeerId::new("Libera", nick.to_uppercase()),
                PeerId::new("Libera", nick.to_lowercase())
            );
        }

        #[test]
        fn test_bundle_key_parses_back(
            network in "[A-Za-z0-9.:-]{1,24}",
            nick in "[a-z\\[\\]\\\\`_^{|}][a-z0-9\\[\\]\\\\`_^{|}-]{0,15}"
        ) {
            let peer = PeerId::new(&network, &nick);
            prop_assume!(!peer.network().is_empty());
            prop_assert_eq!(parse_key(&bundle_key(&peer)), Some(StoredKey::Bundle(peer)));
        }
    }
}
