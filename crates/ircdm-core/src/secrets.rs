//! Secure key-value storage abstraction.
//!
//! The host application supplies an OS-authenticated secret store (keychain,
//! keystore, credential vault). Everything this crate persists goes through
//! [`SecretStore`] as a string key mapping to a JSON string value. Each
//! operation is atomic per key; nothing spans keys.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors that can occur during secret store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("data corruption detected: {0}")]
    DataCorruption(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Async get/set/remove/enumerate over opaque string secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a secret.
    ///
    /// # Returns
    /// * `Ok(Some(value))` if present
    /// * `Ok(None)` if absent
    /// * `Err(StoreError)` if the backend fails
    async fn get_secret(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a secret, replacing any previous value.
    async fn set_secret(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a secret. Succeeds when the key is already absent.
    async fn remove_secret(&self, key: &str) -> Result<(), StoreError>;

    /// Every key currently stored, in no particular order.
    async fn list_secret_keys(&self) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
impl<T: SecretStore + ?Sized> SecretStore for Arc<T> {
    async fn get_secret(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get_secret(key).await
    }

    async fn set_secret(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set_secret(key, value).await
    }

    async fn remove_secret(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove_secret(key).await
    }

    async fn list_secret_keys(&self) -> Result<Vec<String>, StoreError> {
        (**self).list_secret_keys().await
    }
}

/// Thread-safe in-memory secret store for tests and ephemeral sessions.
///
/// Clones share the same underlying map.
#[derive(Default, Clone)]
pub struct InMemorySecretStore {
    secrets: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored secrets.
    pub async fn len(&self) -> usize {
        self.secrets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.secrets.read().await.is_empty()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_secret(&self, key: &str) -> Result<Option<String>, StoreError> {
        let secrets = self.secrets.read().await;
        Ok(secrets.get(key).cloned())
    }

    async fn set_secret(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut secrets = self.secrets.write().await;
        secrets.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_secret(&self, key: &str) -> Result<(), StoreError> {
        let mut secrets = self.secrets.write().await;
        secrets.remove(key);
        Ok(())
    }

    async fn list_secret_keys(&self) -> Result<Vec<String>, StoreError> {
        let secrets = self.secrets.read().await;
        Ok(secrets.keys().cloned().collect())
    }
}

/// Read and deserialize a JSON record.
pub(crate) async fn get_json<S, T>(store: &S, key: &str) -> Result<Option<T>, StoreError>
where
    S: SecretStore + ?Sized,
    T: serde::de::DeserializeOwned,
{
    match store.get_secret(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::DataCorruption(format!("{key}: {e}"))),
        None => Ok(None),
    }
}

/// Serialize and write a JSON record.
pub(crate) async fn set_json<S, T>(store: &S, key: &str, value: &T) -> Result<(), StoreError>
where
    S: SecretStore + ?Sized,
    T: serde::Serialize,
{
    let raw = serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    store.set_secret(key, &raw).await
}
