//! Durable key-value storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{SettingsStore, SettingsTransaction},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, error};

const DEFAULT_NAMESPACE: &str = "core";

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS kv_entries (
        namespace TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        value_type TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (namespace, key)
    )
"#;

const UPSERT: &str = r#"
    INSERT INTO kv_entries (namespace, key, value, value_type, updated_at)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT(namespace, key) DO UPDATE SET
        value = excluded.value,
        value_type = excluded.value_type,
        updated_at = excluded.updated_at
"#;

fn db_error(context: &str, e: sqlx::Error) -> BridgeError {
    BridgeError::DatabaseError(format!("{}: {}", context, e))
}

/// SQLite-backed key-value store.
///
/// Entries live in a single `kv_entries` table partitioned by namespace, so
/// several stores (playback state, bookmarks, sync checkpoints) can share one
/// database file without key collisions. Each row carries its value type and
/// reads verify it.
pub struct SqliteSettingsStore {
    pool: SqlitePool,
    namespace: String,
}

impl SqliteSettingsStore {
    /// Open (or create) the database at `db_path` using the default namespace.
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        // SQLite URLs want forward slashes even on Windows.
        let path_str = db_path.to_string_lossy().replace('\\', "/");
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path_str))
            .map_err(|e| db_error("Invalid database path", e))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| db_error("Failed to connect to DB", e))?;

        let store = Self::with_pool(pool, DEFAULT_NAMESPACE).await?;
        debug!(path = ?db_path, "Initialized key-value store");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    ///
    /// The pool is capped at one connection; every SQLite in-memory connection
    /// is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| db_error("Failed to connect to DB", e))?;

        Self::with_pool(pool, DEFAULT_NAMESPACE).await
    }

    /// Another store over the same database, isolated by `namespace`.
    pub fn namespaced(&self, namespace: impl Into<String>) -> Self {
        Self {
            pool: self.pool.clone(),
            namespace: namespace.into(),
        }
    }

    async fn with_pool(pool: SqlitePool, namespace: &str) -> Result<Self> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| db_error("Failed to create table", e))?;

        Ok(Self {
            pool,
            namespace: namespace.to_string(),
        })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn set_value(&self, key: &str, value: &str, value_type: &str) -> Result<()> {
        sqlx::query(UPSERT)
            .bind(&self.namespace)
            .bind(key)
            .bind(value)
            .bind(value_type)
            .bind(Self::now())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to set entry", e))?;

        debug!(namespace = %self.namespace, key = key, value_type = value_type, "Stored entry");
        Ok(())
    }

    async fn get_value(&self, key: &str, expected_type: &str) -> Result<Option<String>> {
        let row =
            sqlx::query("SELECT value, value_type FROM kv_entries WHERE namespace = ? AND key = ?")
                .bind(&self.namespace)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to get entry", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let value: String = row.get(0);
        let value_type: String = row.get(1);
        if value_type != expected_type {
            error!(
                key = key,
                expected = expected_type,
                actual = %value_type,
                "Type mismatch"
            );
            return Err(BridgeError::OperationFailed(format!(
                "Type mismatch for '{}': expected {}, got {}",
                key, expected_type, value_type
            )));
        }

        Ok(Some(value))
    }

    async fn get_parsed<T>(&self, key: &str, expected_type: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_value(key, expected_type).await? {
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|e| BridgeError::OperationFailed(format!("Parse error: {}", e))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set_value(key, value, "string").await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get_value(key, "string").await
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_value(key, &value.to_string(), "bool").await
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get_parsed(key, "bool").await
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.set_value(key, &value.to_string(), "i64").await
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        self.get_parsed(key, "i64").await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_entries WHERE namespace = ? AND key = ?")
            .bind(&self.namespace)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete entry", e))?;

        debug!(namespace = %self.namespace, key = key, "Deleted entry");
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM kv_entries WHERE namespace = ? AND key = ?")
            .bind(&self.namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to check key", e))?;

        Ok(row.is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM kv_entries WHERE namespace = ? ORDER BY key")
            .bind(&self.namespace)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list keys", e))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM kv_entries WHERE namespace = ?")
            .bind(&self.namespace)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to clear namespace", e))?;

        debug!(namespace = %self.namespace, "Cleared namespace");
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn SettingsTransaction + Send>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        Ok(Box::new(SqliteSettingsTransaction {
            tx: Some(tx),
            namespace: self.namespace.clone(),
        }))
    }
}

/// SQLite transaction; dropped without commit means rolled back.
struct SqliteSettingsTransaction {
    tx: Option<sqlx::Transaction<'static, sqlx::Sqlite>>,
    namespace: String,
}

impl SqliteSettingsTransaction {
    fn active(&mut self) -> Result<&mut sqlx::Transaction<'static, sqlx::Sqlite>> {
        self.tx.as_mut().ok_or_else(|| {
            BridgeError::OperationFailed("Transaction already finished".to_string())
        })
    }
}

#[async_trait]
impl SettingsTransaction for SqliteSettingsTransaction {
    async fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        let namespace = self.namespace.clone();
        let tx = self.active()?;

        sqlx::query(UPSERT)
            .bind(namespace)
            .bind(key)
            .bind(value)
            .bind("string")
            .bind(SqliteSettingsStore::now())
            .execute(&mut **tx)
            .await
            .map_err(|e| db_error("Failed to set entry", e))?;

        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        let namespace = self.namespace.clone();
        let tx = self.active()?;

        sqlx::query("DELETE FROM kv_entries WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(&mut **tx)
            .await
            .map_err(|e| db_error("Failed to delete entry", e))?;

        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| {
            BridgeError::OperationFailed("Transaction already finished".to_string())
        })?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit", e))?;

        debug!(namespace = %self.namespace, "Committed transaction");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| {
            BridgeError::OperationFailed("Transaction already finished".to_string())
        })?;

        tx.rollback()
            .await
            .map_err(|e| db_error("Failed to rollback", e))?;

        debug!(namespace = %self.namespace, "Rolled back transaction");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_string_operations() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_string("test_key", "test_value").await.unwrap();
        let value = store.get_string("test_key").await.unwrap();
        assert_eq!(value, Some("test_value".to_string()));

        store.delete("test_key").await.unwrap();
        assert_eq!(store.get_string("test_key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_operations() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_bool("bool_key", true).await.unwrap();
        assert_eq!(store.get_bool("bool_key").await.unwrap(), Some(true));

        store.set_i64("i64_key", 42).await.unwrap();
        assert_eq!(store.get_i64("i64_key").await.unwrap(), Some(42));

        assert!(store.get_string("i64_key").await.is_err());
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();
        let other = store.namespaced("sync");

        store.set_string("shared", "core").await.unwrap();
        other.set_string("shared", "sync").await.unwrap();

        assert_eq!(store.get_string("shared").await.unwrap().as_deref(), Some("core"));
        assert_eq!(other.get_string("shared").await.unwrap().as_deref(), Some("sync"));

        other.clear_all().await.unwrap();
        assert!(store.has_key("shared").await.unwrap());
        assert_eq!(other.list_keys().await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn transaction_commits_atomically() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();
        store.set_string("stale", "x").await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.set_string("a", "1").await.unwrap();
        tx.set_string("b", "2").await.unwrap();
        tx.delete("stale").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.list_keys().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn rolled_back_transaction_leaves_no_trace() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.set_string("a", "1").await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.get_string("a").await.unwrap(), None);
    }
}
