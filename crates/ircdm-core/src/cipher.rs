//! DM encryption against stored peer bundles.

use std::sync::Arc;

use ircdm_crypto::{open, seal, verify_bundle, Bundle, CipherError, EncryptedMessage};

use crate::errors::CoreError;
use crate::identity::IdentityStore;
use crate::keys::PeerId;
use crate::ledger::TrustLedger;
use crate::secrets::SecretStore;

pub struct MessageCipher<S: SecretStore + ?Sized> {
    identity: Arc<IdentityStore<S>>,
    ledger: Arc<TrustLedger<S>>,
}

impl<S: SecretStore + ?Sized> MessageCipher<S> {
    pub fn new(identity: Arc<IdentityStore<S>>, ledger: Arc<TrustLedger<S>>) -> Self {
        Self { identity, ledger }
    }

    /// Encrypt `plaintext` for the holder of `peer_bundle`.
    pub async fn encrypt(
        &self,
        plaintext: &str,
        peer_bundle: &Bundle,
    ) -> Result<EncryptedMessage, CoreError> {
        verify_bundle(peer_bundle)?;
        let identity = self.identity.get_or_create_identity().await?;
        seal(&identity, &peer_bundle.enc_pub, plaintext.as_bytes()).map_err(CoreError::Encrypt)
    }

    /// Decrypt a message that must have been sent with `peer_bundle`'s
    /// encryption key.
    pub async fn decrypt(
        &self,
        message: &EncryptedMessage,
        peer_bundle: &Bundle,
    ) -> Result<String, CoreError> {
        let identity = self.identity.get_or_create_identity().await?;
        let plaintext = open(&identity, message, &peer_bundle.enc_pub)?;
        String::from_utf8(plaintext)
            .map_err(|_| CoreError::Decrypt(CipherError::Malformed("plaintext is not UTF-8".into())))
    }

    /// Encrypt for the key stored for `peer`.
    pub async fn encrypt_for(
        &self,
        peer: &PeerId,
        plaintext: &str,
    ) -> Result<EncryptedMessage, CoreError> {
        let bundle = self.trusted_bundle(peer).await?;
        self.encrypt(plaintext, &bundle).await
    }

    /// Decrypt a message from `peer` against the stored key.
    pub async fn decrypt_from(
        &self,
        peer: &PeerId,
        message: &EncryptedMessage,
    ) -> Result<String, CoreError> {
        let bundle = self.trusted_bundle(peer).await?;
        self.decrypt(message, &bundle).await
    }

    /// [`decrypt_from`](Self::decrypt_from) for a raw in-band JSON body.
    pub async fn decrypt_json_from(&self, peer: &PeerId, raw: &str) -> Result<String, CoreError> {
        let message = EncryptedMessage::from_json(raw)?;
        self.decrypt_from(peer, &message).await
    }

    async fn trusted_bundle(&self, peer: &PeerId) -> Result<Bundle, CoreError> {
        self.ledger
            .get_bundle_for_network(peer)
            .await?
            .ok_or_else(|| CoreError::UnknownPeer(peer.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::secrets::InMemorySecretStore;
    use ircdm_crypto::{sign_bundle, BundleError, Identity};

    struct Side {
        cipher: MessageCipher<InMemorySecretStore>,
        ledger: Arc<TrustLedger<InMemorySecretStore>>,
        bundle: Bundle,
    }

    async fn side() -> Side {
        let store = InMemorySecretStore::new_shared();
        let identity = Arc::new(IdentityStore::new(store.clone()));
        let ledger = Arc::new(TrustLedger::new(store));
        let bundle = sign_bundle(&identity.get_or_create_identity().await.unwrap());
        Side {
            cipher: MessageCipher::new(identity, ledger.clone()),
            ledger,
            bundle,
        }
    }

    #[tokio::test]
    async fn test_round_trip_between_two_installations() {
        let alice = side().await;
        let bob = side().await;

        let sealed = alice.cipher.encrypt("hej då, Bob ✉", &bob.bundle).await.unwrap();
        let opened = bob.cipher.decrypt(&sealed, &alice.bundle).await.unwrap();
        assert_eq!(opened, "hej då, Bob ✉");
    }

    #[tokio::test]
    async fn test_wrong_sender_bundle_rejected() {
        let alice = side().await;
        let bob = side().await;
        let mallory = side().await;

        let sealed = mallory.cipher.encrypt("hi", &bob.bundle).await.unwrap();
        let err = bob.cipher.decrypt(&sealed, &alice.bundle).await.unwrap_err();
        assert!(matches!(err, CoreError::Decrypt(CipherError::KeyMismatch)));
    }

    #[tokio::test]
    async fn test_by_peer_uses_stored_key() {
        let alice = side().await;
        let bob = side().await;
        let bob_peer = PeerId::new("Libera", "bob");
        let alice_peer = PeerId::new("Libera", "alice");

        alice.ledger.store_bundle(&bob_peer, &bob.bundle, false).await.unwrap();
        bob.ledger.store_bundle(&alice_peer, &alice.bundle, false).await.unwrap();

        let sealed = alice.cipher.encrypt_for(&bob_peer, "hello").await.unwrap();
        let opened = bob
            .cipher
            .decrypt_json_from(&alice_peer, &sealed.to_json())
            .await
            .unwrap();
        assert_eq!(opened, "hello");
    }

    #[tokio::test]
    async fn test_unknown_peer() {
        let alice = side().await;
        let err = alice
            .cipher
            .encrypt_for(&PeerId::new("Libera", "nobody"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn test_encrypt_rejects_forged_bundle() {
        let alice = side().await;
        let bob = side().await;
        let mut forged = bob.bundle.clone();
        forged.enc_pub = alice.bundle.enc_pub;

        let err = alice.cipher.encrypt("hi", &forged).await.unwrap_err();
        assert!(matches!(err, CoreError::Verification(_)));
    }

    #[tokio::test]
    async fn test_low_order_peer_key_is_not_a_decrypt_error() {
        let alice = side().await;
        let mallory = Identity::generate().unwrap();
        let weak = [0u8; 32];
        let bundle = Bundle {
            version: 1,
            id_pub: mallory.id_pub(),
            enc_pub: weak,
            sig: mallory.sign(&weak),
        };

        let err = alice.cipher.encrypt("hi", &bundle).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Verification(BundleError::WeakEncryptionKey)
        ));
        assert_ne!(err.kind(), ErrorKind::Decrypt);
    }
}
