//! Identity persistence.
//!
//! Exactly one identity exists per installation. It is created lazily on
//! first use, written as a single record, and cached for the life of the
//! store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use zeroize::Zeroizing;

use ircdm_crypto::codec::b64_array;
use ircdm_crypto::{fingerprint, Fingerprint, Identity};

use crate::errors::{CoreError, StoreError};
use crate::keys::IDENTITY_KEY;
use crate::secrets::{get_json, set_json, SecretStore};

/// Persisted identity record. Public halves are stored alongside the private
/// ones so a damaged record is detected on load.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    version: u32,
    #[serde(with = "b64_array")]
    id_pub: [u8; 32],
    #[serde(with = "b64_array")]
    id_priv: [u8; 32],
    #[serde(with = "b64_array")]
    enc_pub: [u8; 32],
    #[serde(with = "b64_array")]
    enc_priv: [u8; 32],
    created_at: DateTime<Utc>,
}

impl StoredIdentity {
    const CURRENT_VERSION: u32 = 1;

    fn new(identity: &Identity, created_at: DateTime<Utc>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            id_pub: identity.id_pub(),
            id_priv: *identity.sign_seed(),
            enc_pub: identity.enc_pub(),
            enc_priv: *identity.enc_secret_bytes(),
            created_at,
        }
    }

    fn into_identity(self) -> Result<(Identity, DateTime<Utc>), StoreError> {
        if self.version != Self::CURRENT_VERSION {
            return Err(StoreError::DataCorruption(format!(
                "unsupported identity record version {}",
                self.version
            )));
        }
        let sign_seed = Zeroizing::new(self.id_priv);
        let enc_secret = Zeroizing::new(self.enc_priv);
        let identity = Identity::from_bytes(&sign_seed, &enc_secret);
        if identity.id_pub() != self.id_pub || identity.enc_pub() != self.enc_pub {
            return Err(StoreError::DataCorruption(
                "identity public keys do not match private keys".to_string(),
            ));
        }
        Ok((identity, self.created_at))
    }
}

impl Drop for StoredIdentity {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.id_priv.zeroize();
        self.enc_priv.zeroize();
    }
}

/// Public facts about the local identity, safe to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityInfo {
    pub id_pub: String,
    pub enc_pub: String,
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
}

struct Cached {
    identity: Arc<Identity>,
    created_at: DateTime<Utc>,
}

/// Lazily creates, persists and caches the local identity.
pub struct IdentityStore<S: SecretStore + ?Sized> {
    store: Arc<S>,
    cached: Mutex<Option<Cached>>,
}

impl<S: SecretStore + ?Sized> IdentityStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }

    /// Return the persisted identity, generating and persisting one first if
    /// none exists.
    ///
    /// Concurrent callers are serialized, so only one identity is ever
    /// generated. An RNG failure is fatal ([`CoreError::CryptoInit`]).
    pub async fn get_or_create_identity(&self) -> Result<Arc<Identity>, CoreError> {
        let mut cached = self.cached.lock().await;
        if let Some(c) = cached.as_ref() {
            return Ok(c.identity.clone());
        }

        let loaded = match get_json::<S, StoredIdentity>(&*self.store, IDENTITY_KEY).await? {
            Some(stored) => {
                let (identity, created_at) = stored.into_identity()?;
                debug!(fingerprint = %fingerprint(&identity.id_pub(), &identity.enc_pub()).short(), "loaded identity");
                Cached {
                    identity: Arc::new(identity),
                    created_at,
                }
            }
            None => {
                let identity = Identity::generate()?;
                let created_at = Utc::now();
                set_json(&*self.store, IDENTITY_KEY, &StoredIdentity::new(&identity, created_at))
                    .await?;
                info!(
                    fingerprint = %fingerprint(&identity.id_pub(), &identity.enc_pub()).short(),
                    "generated new identity"
                );
                Cached {
                    identity: Arc::new(identity),
                    created_at,
                }
            }
        };

        let identity = loaded.identity.clone();
        *cached = Some(loaded);
        Ok(identity)
    }

    /// Public summary of the local identity, creating it if needed.
    pub async fn info(&self) -> Result<IdentityInfo, CoreError> {
        let identity = self.get_or_create_identity().await?;
        let created_at = self
            .cached
            .lock()
            .await
            .as_ref()
            .map(|c| c.created_at)
            .unwrap_or_else(Utc::now);
        Ok(IdentityInfo {
            id_pub: hex::encode(identity.id_pub()),
            enc_pub: hex::encode(identity.enc_pub()),
            fingerprint: fingerprint(&identity.id_pub(), &identity.enc_pub()),
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::InMemorySecretStore;

    #[tokio::test]
    async fn test_created_once_and_cached() {
        let store = InMemorySecretStore::new_shared();
        let identities = IdentityStore::new(store.clone());

        let first = identities.get_or_create_identity().await.unwrap();
        let second = identities.get_or_create_identity().await.unwrap();
        assert_eq!(first.id_pub(), second.id_pub());
        assert!(store.get_secret(IDENTITY_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reloaded_from_storage() {
        let store = InMemorySecretStore::new_shared();
        let first = IdentityStore::new(store.clone())
            .get_or_create_identity()
            .await
            .unwrap();

        let second = IdentityStore::new(store)
            .get_or_create_identity()
            .await
            .unwrap();
        assert_eq!(first.id_pub(), second.id_pub());
        assert_eq!(first.enc_pub(), second.enc_pub());
    }

    #[tokio::test]
    async fn test_concurrent_first_use_creates_one_identity() {
        let store = InMemorySecretStore::new_shared();
        let identities = Arc::new(IdentityStore::new(store));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let identities = identities.clone();
                tokio::spawn(async move { identities.get_or_create_identity().await.unwrap().id_pub() })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_mismatched_record_is_corruption() {
        let store = InMemorySecretStore::new_shared();
        IdentityStore::new(store.clone())
            .get_or_create_identity()
            .await
            .unwrap();

        let raw = store.get_secret(IDENTITY_KEY).await.unwrap().unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        value["encPub"] = serde_json::Value::String("CQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQk=".into());
        store.set_secret(IDENTITY_KEY, &value.to_string()).await.unwrap();

        let err = IdentityStore::new(store).get_or_create_identity().await.unwrap_err();
        assert!(matches!(err, CoreError::Storage(StoreError::DataCorruption(_))));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_info_is_public_only() {
        let identities = IdentityStore::new(InMemorySecretStore::new_shared());
        let info = identities.info().await.unwrap();
        let identity = identities.get_or_create_identity().await.unwrap();

        assert_eq!(info.id_pub, hex::encode(identity.id_pub()));
        assert_eq!(info.fingerprint, fingerprint(&identity.id_pub(), &identity.enc_pub()));
    }
}
