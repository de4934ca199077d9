//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const APP_DIR: &str = "audioshelf";

/// Tokio-based file system implementation
///
/// Writes go to a sibling `.part` file that is flushed and renamed into place,
/// so a crash never leaves a truncated file under the final name.
#[derive(Debug, Clone)]
pub struct TokioFileSystem {
    cache_dir: PathBuf,
    data_dir: PathBuf,
}

impl TokioFileSystem {
    /// Use the platform cache and data directories.
    pub fn new() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR);

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join(APP_DIR);

        Self { cache_dir, data_dir }
    }

    pub fn with_directories(cache_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self { cache_dir, data_dir }
    }

    /// Root both directories under `root` (tests, portable installs).
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::with_directories(root.join("cache"), root.join("data"))
    }

    fn map_io_error(path: &Path, e: std::io::Error) -> BridgeError {
        if e.kind() == std::io::ErrorKind::NotFound {
            BridgeError::NotFound(path.display().to_string())
        } else {
            BridgeError::Io(e)
        }
    }

    async fn ensure_dir(path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| Self::map_io_error(path, e))?;
        Ok(path.to_path_buf())
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_secs(time: std::io::Result<SystemTime>) -> Option<i64> {
    time.ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn get_cache_directory(&self) -> Result<PathBuf> {
        Self::ensure_dir(&self.cache_dir).await
    }

    async fn get_data_directory(&self) -> Result<PathBuf> {
        Self::ensure_dir(&self.data_dir).await
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path)
            .await
            .map_err(|e| Self::map_io_error(path, e))
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|e| Self::map_io_error(path, e))?;

        Ok(FileMetadata {
            size: metadata.len(),
            created_at: unix_secs(metadata.created()),
            modified_at: unix_secs(metadata.modified()),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        Self::ensure_dir(path).await?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path)
            .await
            .map_err(|e| Self::map_io_error(path, e))?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent).await?;
        }

        let mut staging = path.as_os_str().to_owned();
        staging.push(".part");
        let staging = PathBuf::from(staging);

        let mut file = fs::File::create(&staging)
            .await
            .map_err(|e| Self::map_io_error(&staging, e))?;
        file.write_all(&data)
            .await
            .map_err(|e| Self::map_io_error(&staging, e))?;
        file.sync_all()
            .await
            .map_err(|e| Self::map_io_error(&staging, e))?;
        drop(file);

        fs::rename(&staging, path)
            .await
            .map_err(|e| Self::map_io_error(path, e))?;

        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
            .await
            .map_err(|e| Self::map_io_error(path, e))?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)
            .await
            .map_err(|e| Self::map_io_error(path, e))?;
        debug!(path = ?path, "Deleted directory");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path)
            .await
            .map_err(|e| Self::map_io_error(path, e))?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| Self::map_io_error(path, e))?
        {
            entries.push(entry.path());
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directories_are_created_on_demand() {
        let root = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::rooted_at(root.path());

        let data_dir = fs.get_data_directory().await.unwrap();
        assert_eq!(data_dir, root.path().join("data"));
        assert!(fs.exists(&data_dir).await.unwrap());
    }

    #[tokio::test]
    async fn write_replaces_atomically_and_leaves_no_staging_file() {
        let root = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::rooted_at(root.path());
        let file = root.path().join("book").join("metadata.json");

        fs.write_file(&file, Bytes::from_static(b"{\"v\":1}"))
            .await
            .unwrap();
        fs.write_file(&file, Bytes::from_static(b"{\"v\":2}"))
            .await
            .unwrap();

        assert_eq!(fs.read_file(&file).await.unwrap(), Bytes::from_static(b"{\"v\":2}"));
        let entries = fs.list_directory(file.parent().unwrap()).await.unwrap();
        assert_eq!(entries, vec![file.clone()]);
    }

    #[tokio::test]
    async fn missing_paths_map_to_not_found() {
        let root = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::rooted_at(root.path());

        let err = fs.read_file(&root.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn directory_size_is_recursive() {
        let root = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::rooted_at(root.path());
        let book = root.path().join("book");

        fs.write_file(&book.join("01.mp3"), Bytes::from(vec![0u8; 100]))
            .await
            .unwrap();
        fs.write_file(&book.join("nested").join("02.mp3"), Bytes::from(vec![0u8; 50]))
            .await
            .unwrap();

        assert_eq!(fs.directory_size(&book).await.unwrap(), 150);
    }
}
