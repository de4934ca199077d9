//! Storage and File System Abstractions
//!
//! Provides platform-agnostic traits for file I/O and key-value storage.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Abstracts file I/O operations to support different platforms:
/// - Desktop: Direct filesystem access
/// - iOS/Android: Sandboxed app directories
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn write_manifest(fs: &dyn FileSystemAccess, data: &[u8]) -> Result<()> {
///     let dir = fs.get_data_directory().await?.join("downloads");
///     fs.create_dir_all(&dir).await?;
///     fs.write_file(&dir.join("metadata.json"), Bytes::copy_from_slice(data)).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Get the application's cache directory
    ///
    /// This directory is suitable for temporary files that can be deleted
    /// by the system when storage is low.
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    /// Get the application's data directory
    ///
    /// This directory is suitable for persistent application data such as
    /// downloaded books.
    async fn get_data_directory(&self) -> Result<PathBuf>;

    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, creating it if it doesn't exist
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete a directory and all its contents
    async fn delete_dir_all(&self, path: &Path) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Calculate total size of a directory recursively
    async fn directory_size(&self, path: &Path) -> Result<u64> {
        let mut total = 0u64;
        let mut pending = vec![path.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in self.list_directory(&dir).await? {
                let metadata = self.metadata(&entry).await?;
                if metadata.is_directory {
                    pending.push(entry);
                } else {
                    total += metadata.size;
                }
            }
        }

        Ok(total)
    }
}

/// Key-value settings storage trait
///
/// Abstracts platform-specific durable key-value storage:
/// - iOS: UserDefaults
/// - Android: SharedPreferences / DataStore
/// - Desktop: SQLite
///
/// Every single-key write replaces the whole value atomically, so a reader
/// never observes a partially written entry.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn remember(store: &dyn SettingsStore) -> Result<()> {
///     store.set_string("last_opened_book", "li_8z2").await?;
///     store.set_bool("resume_on_launch", true).await
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store a boolean value
    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    /// Retrieve a boolean value
    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    /// Store an integer value
    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    /// Retrieve an integer value
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    /// Delete a setting
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a setting exists
    async fn has_key(&self, key: &str) -> Result<bool>;

    /// List all setting keys
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Clear all settings
    async fn clear_all(&self) -> Result<()>;

    /// Begin a transaction for atomic updates
    ///
    /// Nothing written through the transaction is visible until `commit`;
    /// dropping it without committing discards the writes.
    async fn begin_transaction(&self) -> Result<Box<dyn SettingsTransaction + Send>>;
}

/// Transaction for atomic settings updates
#[async_trait]
pub trait SettingsTransaction: Send {
    /// Set a value within the transaction
    async fn set_string(&mut self, key: &str, value: &str) -> Result<()>;

    /// Delete a value within the transaction
    async fn delete(&mut self, key: &str) -> Result<()>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}
