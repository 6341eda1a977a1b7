//! File-backed secret store.
//!
//! All secrets live in one JSON object file. Writes go to a temp file that is
//! synced and renamed over the original, and the file is kept at mode 0600
//! on Unix.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use ircdm_core::{SecretStore, StoreError};

pub struct FileSecretStore {
    path: PathBuf,
    /// Loaded lazily on first access
    entries: Mutex<Option<BTreeMap<String, String>>>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    pub fn new_shared(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                StoreError::DataCorruption(format!("{}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StoreError::OperationFailed(format!(
                "read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        write_atomic(&self.path, json.as_bytes())
            .await
            .map_err(|e| StoreError::OperationFailed(format!("write {}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), entries = entries.len(), "secret file written");
        Ok(())
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let temp_path = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&temp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    tokio::fs::rename(&temp_path, path).await
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get_secret(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard.as_ref().and_then(|entries| entries.get(key).cloned()))
    }

    async fn set_secret(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().await;
        let mut entries = match guard.take() {
            Some(entries) => entries,
            None => self.load().await?,
        };
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries).await?;
        *guard = Some(entries);
        Ok(())
    }

    async fn remove_secret(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().await;
        let mut entries = match guard.take() {
            Some(entries) => entries,
            None => self.load().await?,
        };
        if entries.remove(key).is_some() {
            self.persist(&entries).await?;
        }
        *guard = Some(entries);
        Ok(())
    }

    async fn list_secret_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard
            .as_ref()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}
