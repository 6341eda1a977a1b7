#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::bundle::{sign_bundle, verify_bundle};
    use crate::fingerprint::{fingerprint, Fingerprint};
    use crate::identity::Identity;
    use crate::message::{open, seal, CipherError};

    fn identity_from(sign_seed: [u8; 32], enc_secret: [u8; 32]) -> Identity {
        Identity::from_bytes(&sign_seed, &enc_secret)
    }

    proptest! {
        #[test]
        fn test_fingerprint_deterministic(id_pub in any::<[u8; 32]>(), enc_pub in any::<[u8; 32]>()) {
            prop_assert_eq!(fingerprint(&id_pub, &enc_pub), fingerprint(&id_pub, &enc_pub));
        }

        #[test]
        fn test_enc_pub_change_changes_fingerprint(
            id_pub in any::<[u8; 32]>(),
            a in any::<[u8; 32]>(),
            b in any::<[u8; 32]>()
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(fingerprint(&id_pub, &a), fingerprint(&id_pub, &b));
        }

        #[test]
        fn test_display_form_parses_back(id_pub in any::<[u8; 32]>(), enc_pub in any::<[u8; 32]>()) {
            let fp = fingerprint(&id_pub, &enc_pub);
            let parsed: Fingerprint = fp.to_display().parse().unwrap();
            prop_assert_eq!(parsed, fp);
        }

        #[test]
        fn test_any_identity_bundle_verifies(seed in any::<[u8; 32]>(), secret in any::<[u8; 32]>()) {
            let identity = identity_from(seed, secret);
            prop_assert!(verify_bundle(&sign_bundle(&identity)).is_ok());
        }

        #[test]
        fn test_cipher_round_trip(
            a_seed in any::<[u8; 32]>(),
            a_secret in any::<[u8; 32]>(),
            b_seed in any::<[u8; 32]>(),
            b_secret in any::<[u8; 32]>(),
            text in "\\PC{1,200}"
        ) {
            let alice = identity_from(a_seed, a_secret);
            let bob = identity_from(b_seed, b_secret);
            prop_assume!(alice.enc_pub() != bob.enc_pub());

            let sealed = seal(&alice, &bob.enc_pub(), text.as_bytes()).unwrap();
            let opened = open(&bob, &sealed, &alice.enc_pub()).unwrap();
            prop_assert_eq!(String::from_utf8(opened).unwrap(), text);
        }

        #[test]
        fn test_mismatched_from_pub_rejected(
            text in "\\PC{1,64}",
            forged in any::<[u8; 32]>()
        ) {
            let alice = Identity::generate().unwrap();
            let bob = Identity::generate().unwrap();
            prop_assume!(forged != alice.enc_pub());

            let sealed = seal(&alice, &bob.enc_pub(), text.as_bytes()).unwrap();
            prop_assert_eq!(open(&bob, &sealed, &forged), Err(CipherError::KeyMismatch));
        }
    }
}
