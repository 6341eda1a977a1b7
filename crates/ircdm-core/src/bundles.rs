//! Local bundle export and inbound bundle parsing.

use std::sync::Arc;

use ircdm_crypto::{sign_bundle, verify_bundle, Bundle, BundleError, Fingerprint};

use crate::errors::CoreError;
use crate::identity::IdentityStore;
use crate::secrets::SecretStore;

pub struct BundleEngine<S: SecretStore + ?Sized> {
    identity: Arc<IdentityStore<S>>,
}

impl<S: SecretStore + ?Sized> Clone for BundleEngine<S> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
        }
    }
}

impl<S: SecretStore + ?Sized> BundleEngine<S> {
    pub fn new(identity: Arc<IdentityStore<S>>) -> Self {
        Self { identity }
    }

    pub fn identity_store(&self) -> &Arc<IdentityStore<S>> {
        &self.identity
    }

    /// Our own signed bundle, `{version: 1, idPub, encPub, sig}`.
    pub async fn export_bundle(&self) -> Result<Bundle, CoreError> {
        let identity = self.identity.get_or_create_identity().await?;
        Ok(sign_bundle(&identity))
    }

    pub async fn own_fingerprint(&self) -> Result<Fingerprint, CoreError> {
        Ok(self.export_bundle().await?.fingerprint())
    }
}

/// Parse a raw in-band JSON body and verify it.
pub fn parse_bundle(raw: &str) -> Result<Bundle, BundleError> {
    let bundle = Bundle::from_json(raw)?;
    verify_bundle(&bundle)?;
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::InMemorySecretStore;

    fn engine() -> BundleEngine<InMemorySecretStore> {
        BundleEngine::new(Arc::new(IdentityStore::new(InMemorySecretStore::new_shared())))
    }

    #[tokio::test]
    async fn test_exported_bundle_verifies() {
        let engine = engine();
        let bundle = engine.export_bundle().await.unwrap();
        assert_eq!(bundle.version, 1);
        assert!(verify_bundle(&bundle).is_ok());
    }

    #[tokio::test]
    async fn test_export_is_stable() {
        let engine = engine();
        let a = engine.export_bundle().await.unwrap();
        let b = engine.export_bundle().await.unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(engine.own_fingerprint().await.unwrap(), a.fingerprint());
    }

    #[tokio::test]
    async fn test_parse_rejects_tampered_json() {
        let engine = engine();
        let mut bundle = engine.export_bundle().await.unwrap();
        bundle.sig[10] ^= 0x01;

        assert!(parse_bundle(&bundle.to_json()).is_err());
        assert!(matches!(
            parse_bundle("hello"),
            Err(BundleError::Malformed(_))
        ));
    }
}
