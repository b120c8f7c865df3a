//! SQLite-backed key-value store
//!
//! Values live in a single `kv_store` table. The schema is versioned through a
//! `schema_migrations` table so later releases can evolve it in place.

use crate::error::{StorageError, StorageResult};
use crate::KeyValueStore;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;

/// Connection pool type used by [`SqliteStore`]
pub type DbPool = Pool<Sqlite>;

/// Current schema version
pub const CURRENT_VERSION: i64 = 1;

const MIGRATION_001: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY NOT NULL,
    value BLOB NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
)
"#;

/// SQLite connection settings
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file
    pub path: PathBuf,
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// Enable Write-Ahead Logging
    pub enable_wal: bool,
    /// Create the database file if it doesn't exist
    pub create_if_missing: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("offsync.db"),
            max_connections: 5,
            enable_wal: true,
            create_if_missing: true,
        }
    }
}

impl SqliteConfig {
    /// Creates a configuration for the given database file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Sets the maximum number of connections
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Enables or disables WAL mode
    pub fn with_wal(mut self, enable: bool) -> Self {
        self.enable_wal = enable;
        self
    }

    /// Sets whether to create the database if missing
    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }
}

/// Store persisting values in SQLite
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Connects to the configured database and applies pending migrations
    pub async fn open(config: SqliteConfig) -> StorageResult<Self> {
        let mut options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(config.create_if_missing);

        if config.enable_wal {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::database("Failed to connect to database", e))?;

        let store = Self { pool };
        store.run_migrations().await?;
        log::debug!("SQLite store ready at {}", config.path.display());
        Ok(store)
    }

    /// Opens a private in-memory database
    ///
    /// The pool holds exactly one connection that never expires, otherwise
    /// the database would vanish with it.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::database("Failed to create in-memory database", e))?
            .journal_mode(SqliteJournalMode::Memory);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::database("Failed to connect to in-memory database", e))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Highest applied schema version
    pub async fn schema_version(&self) -> StorageResult<i64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::database("Failed to read schema version", e))?;
        Ok(version.unwrap_or(0))
    }

    /// Closes the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::database("Failed to create migrations table", e))?;

        self.run_migration(1, MIGRATION_001).await
    }

    async fn run_migration(&self, version: i64, sql: &str) -> StorageResult<()> {
        let applied: Option<i64> =
            sqlx::query_scalar("SELECT version FROM schema_migrations WHERE version = ?")
                .bind(version)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::database("Failed to check migration status", e))?;

        if applied.is_some() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::database("Failed to begin migration", e))?;

        sqlx::query(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::database(&format!("Failed to run migration {}", version), e))?;

        sqlx::query("INSERT INTO schema_migrations (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::database("Failed to record migration", e))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::database("Failed to commit migration", e))?;

        log::info!("Applied storage migration {}", version);
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::database("Failed to read value", e))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = strftime('%s', 'now') * 1000
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::database("Failed to write value", e))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::database("Failed to remove value", e))?;
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        sqlx::query("DELETE FROM kv_store")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::database("Failed to clear store", e))?;
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        sqlx::query_scalar("SELECT key FROM kv_store ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::database("Failed to list keys", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = SqliteConfig::new("test.db")
            .with_max_connections(2)
            .with_wal(false)
            .with_create_if_missing(false);

        assert_eq!(config.path, PathBuf::from("test.db"));
        assert_eq!(config.max_connections, 2);
        assert!(!config.enable_wal);
        assert!(!config.create_if_missing);
    }

    #[tokio::test]
    async fn test_migrations_recorded_once() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.run_migrations().await.unwrap();

        assert_eq!(store.schema_version().await.unwrap(), CURRENT_VERSION);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_value() {
        let store = SqliteStore::in_memory().await.unwrap();

        store.set("dataset:a", b"one".to_vec()).await.unwrap();
        store.set("dataset:a", b"two".to_vec()).await.unwrap();

        assert_eq!(store.get("dataset:a").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.keys().await.unwrap(), vec!["dataset:a"]);
    }

    #[tokio::test]
    async fn test_open_creates_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("offsync.db");

        let store = SqliteStore::open(SqliteConfig::new(path.clone())).await.unwrap();
        assert!(path.exists());
        store.close().await;
    }
}
