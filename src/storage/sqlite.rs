use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::DurableStore;
use crate::core::errors::BridgeError;

/// SQLite-backed store: one row per key, the value kept as JSON text.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    is_memory: bool,
}

impl SqliteStore {
    pub async fn new_with_url(database_url: &str) -> Result<Self, BridgeError> {
        // normalize sqlite URLs: accept "sqlite:" or "sqlite://"
        let mut db_url = database_url.to_string();
        if db_url.starts_with("sqlite:") && !db_url.starts_with("sqlite://") {
            db_url = db_url.replacen("sqlite:", "sqlite://", 1);
        }

        // ensure parent directory exists for file-backed sqlite URLs
        if let Some(path) = db_url.strip_prefix("sqlite://") {
            let path_only = path.split_once('?').map(|(p, _)| p).unwrap_or(path);
            if path_only != ":memory:" && !path_only.is_empty() {
                if let Some(parent) = std::path::Path::new(path_only).parent() {
                    if !parent.as_os_str().is_empty() {
                        if let Err(e) = std::fs::create_dir_all(parent) {
                            warn!("Failed to create database dir {:?}: {}", parent, e);
                        }
                    }
                }
            }
        }

        // Avoid logging the full path; scheme and length are enough to diagnose.
        let safe_db_url_info = match db_url.split_once("://") {
            Some((scheme, rest)) => format!("{}://(redacted, len={})", scheme, rest.len()),
            None => "(invalid db_url format)".to_string(),
        };
        info!(db = %safe_db_url_info, "[storage] connecting to database");
        let is_memory = db_url.contains(":memory:");

        let connect_options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| BridgeError::Storage(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // An in-memory database lives and dies with its single connection.
        let pool_options = if is_memory {
            SqlitePoolOptions::new().max_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(8)
                .min_connections(1)
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800))
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_options)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to connect to database: {}", e)))?;

        let store = Self { pool, is_memory };
        store.initialize_schema().await?;

        info!("Durable store initialized");
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, BridgeError> {
        Self::new_with_url("sqlite::memory:").await
    }

    async fn initialize_schema(&self) -> Result<(), BridgeError> {
        debug!("Initializing kv schema");
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::Storage(format!("Failed to create kv table: {}", e)))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, BridgeError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.get("value");
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), BridgeError> {
        let raw = serde_json::to_string(&value)?;
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(raw)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;
        debug!(key, "store value written");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BridgeError> {
        sqlx::query("DELETE FROM kv WHERE key = ?1").bind(key).execute(&self.pool).await?;
        Ok(())
    }

    fn is_in_memory(&self) -> bool {
        self.is_memory
    }
}
