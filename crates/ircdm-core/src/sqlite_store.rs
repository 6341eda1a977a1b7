//! SQLite-backed secret store.
//!
//! For hosts without an OS keychain, or for the CLI in headless setups. The
//! database file should live on a volume the OS already protects; values are
//! stored as-is.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::secrets::{SecretStore, StoreError};

/// Current schema version. Increment when adding a migration.
const SCHEMA_VERSION: i32 = 1;

/// SQLite-based secret store.
///
/// One table of `(key, value)` rows; every trait operation is a single
/// statement and therefore atomic per key.
pub struct SqliteSecretStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSecretStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| {
            StoreError::OperationFailed(format!("failed to open database: {}", e))
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StoreError::OperationFailed(format!("failed to set pragmas: {}", e)))?;

        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StoreError::OperationFailed(format!("failed to open in-memory database: {}", e))
        })?;

        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )
        .map_err(|e| StoreError::OperationFailed(format!("failed to create schema_version: {}", e)))?;

        let current_version: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .map_err(|e| StoreError::OperationFailed(format!("failed to read schema version: {}", e)))?;

        if current_version > SCHEMA_VERSION {
            return Err(StoreError::DataCorruption(format!(
                "database schema version {} is newer than supported version {}",
                current_version, SCHEMA_VERSION
            )));
        }
        if current_version < 1 {
            Self::migrate_v1(conn)?;
        }

        Ok(())
    }

    fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS secrets (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| StoreError::OperationFailed(format!("migration v1 failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl SecretStore for SqliteSecretStore {
    async fn get_secret(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT value FROM secrets WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StoreError::OperationFailed(format!("failed to read secret: {}", e)))
    }

    async fn set_secret(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO secrets (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, chrono::Utc::now().timestamp()],
        )
        .map_err(|e| StoreError::OperationFailed(format!("failed to write secret: {}", e)))?;
        Ok(())
    }

    async fn remove_secret(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM secrets WHERE key = ?1", params![key])
            .map_err(|e| StoreError::OperationFailed(format!("failed to delete secret: {}", e)))?;
        Ok(())
    }

    async fn list_secret_keys(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT key FROM secrets ORDER BY key")
            .map_err(|e| StoreError::OperationFailed(format!("failed to list secrets: {}", e)))?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::OperationFailed(format!("failed to list secrets: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::OperationFailed(format!("failed to list secrets: {}", e)))?;
        Ok(keys)
    }
}
