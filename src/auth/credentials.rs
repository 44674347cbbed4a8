// Credential persistence: key-value secret stores for the token pair

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::types::{CredentialPair, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::error::{GatewayError, Result};

/// Key-value secret storage addressed by fixed logical keys
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Persist both tokens of a pair
    async fn save_pair(&self, pair: &CredentialPair) -> Result<()> {
        self.set(ACCESS_TOKEN_KEY, &pair.access_token).await?;
        self.set(REFRESH_TOKEN_KEY, &pair.refresh_token).await
    }

    /// Remove both tokens; missing keys are not an error
    async fn clear_pair(&self) -> Result<()> {
        self.delete(ACCESS_TOKEN_KEY).await?;
        self.delete(REFRESH_TOKEN_KEY).await
    }
}

/// Process-local store, used by tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: DashMap<String, String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding a token pair
    pub fn with_pair(pair: &CredentialPair) -> Self {
        let store = Self::new();
        store
            .entries
            .insert(ACCESS_TOKEN_KEY.to_string(), pair.access_token.clone());
        store
            .entries
            .insert(REFRESH_TOKEN_KEY.to_string(), pair.refresh_token.clone());
        store
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// SQLite-backed store using a single `auth_kv` table
pub struct SqliteCredentialStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteCredentialStore {
    /// Open (or create) the database and ensure the table exists
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    GatewayError::Store(format!(
                        "Failed to create credential directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path).map_err(|e| {
            GatewayError::Store(format!(
                "Failed to open SQLite database {}: {}",
                path.display(),
                e
            ))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(store_error)?;

        tracing::debug!("Credential store opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a blocking SQLite operation off the async executor
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            op(&*guard)
        })
        .await
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("Credential store task failed: {}", e)))?
        .map_err(store_error)
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT value FROM auth_kv WHERE key = ?", [&key], |row| {
                row.get(0)
            })
            .optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        let updated_at = chrono::Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO auth_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                [&key, &value, &updated_at],
            )
            .map(|_| ())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM auth_kv WHERE key = ?", [&key])
                .map(|_| ())
        })
        .await
    }
}

fn store_error(e: rusqlite::Error) -> GatewayError {
    GatewayError::Store(e.to_string())
}
