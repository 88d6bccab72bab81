//! Storage gateway: local filesystem plus optional cloud object storage.

use crate::{BackupError, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Cloud object storage for backup payloads
#[async_trait]
pub trait CloudStore: Send + Sync {
    /// Upload the stored bytes of backup `id`, returning the object reference
    async fn upload(&self, id: &str, data: &[u8]) -> Result<String>;

    /// Download the object behind `reference`
    async fn download(&self, reference: &str, id: &str) -> Result<Vec<u8>>;

    /// Delete the object behind `reference`
    async fn delete(&self, reference: &str, id: &str) -> Result<()>;
}

/// Local filesystem access rooted at the backup directory, with an optional cloud tier
pub struct StorageGateway {
    root: PathBuf,
    cloud: Option<Arc<dyn CloudStore>>,
}

impl StorageGateway {
    /// Create the gateway, creating the root directory if missing
    pub async fn new(root: impl Into<PathBuf>, cloud: Option<Arc<dyn CloudStore>>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            BackupError::Storage(format!("Failed to create backup directory {}: {}", root.display(), e))
        })?;

        debug!("Storage gateway rooted at {:?} (cloud: {})", root, cloud.is_some());

        Ok(Self { root, cloud })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cloud_enabled(&self) -> bool {
        self.cloud.is_some()
    }

    /// Resolve a relative storage path, rejecting anything that escapes the root
    fn build_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(BackupError::Storage(format!("Invalid storage path: {:?}", path)));
        }
        Ok(self.root.join(relative))
    }

    /// Write bytes via temp file and rename
    pub async fn write_local(&self, path: &str, data: &[u8]) -> Result<()> {
        let full = self.build_path(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut temp = full.clone().into_os_string();
        temp.push(".partial");
        let temp = PathBuf::from(temp);

        fs::write(&temp, data)
            .await
            .map_err(|e| BackupError::Storage(format!("Failed to write {}: {}", full.display(), e)))?;
        fs::rename(&temp, &full)
            .await
            .map_err(|e| BackupError::Storage(format!("Failed to finalize {}: {}", full.display(), e)))?;

        debug!("Wrote {} bytes to {}", data.len(), full.display());
        Ok(())
    }

    pub async fn read_local(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.build_path(path)?;
        fs::read(&full)
            .await
            .map_err(|e| BackupError::Storage(format!("Failed to read {}: {}", full.display(), e)))
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.build_path(path)?;
        Ok(fs::try_exists(&full).await?)
    }

    /// Delete a local file. Returns whether it existed.
    pub async fn delete(&self, path: &str) -> Result<bool> {
        let full = self.build_path(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BackupError::Storage(format!("Failed to delete {}: {}", full.display(), e))),
        }
    }

    fn cloud(&self) -> Result<&Arc<dyn CloudStore>> {
        self.cloud
            .as_ref()
            .ok_or_else(|| BackupError::Storage("Cloud storage is not configured".to_string()))
    }

    pub async fn upload_cloud(&self, id: &str, data: &[u8]) -> Result<String> {
        let reference = self.cloud()?.upload(id, data).await?;
        info!("Uploaded backup {} to cloud ({})", id, reference);
        Ok(reference)
    }

    pub async fn download_cloud(&self, reference: &str, id: &str) -> Result<Vec<u8>> {
        self.cloud()?.download(reference, id).await
    }

    pub async fn delete_cloud(&self, reference: &str, id: &str) -> Result<()> {
        self.cloud()?.delete(reference, id).await
    }
}

/// Cloud store backed by a directory (mounted bucket, NFS share, or a second disk)
pub struct DirectoryCloudStore {
    root: PathBuf,
}

impl DirectoryCloudStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn object_path(&self, reference: &str) -> Result<PathBuf> {
        let key = reference
            .strip_prefix("dir://")
            .ok_or_else(|| BackupError::Storage(format!("Unsupported cloud reference: {}", reference)))?;
        if key.is_empty() || key.contains(['/', '\\']) || key == ".." {
            return Err(BackupError::Storage(format!("Invalid cloud reference: {}", reference)));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl CloudStore for DirectoryCloudStore {
    async fn upload(&self, id: &str, data: &[u8]) -> Result<String> {
        let reference = format!("dir://{}", id);
        let path = self.object_path(&reference)?;
        fs::write(&path, data)
            .await
            .map_err(|e| BackupError::Storage(format!("Cloud upload of {} failed: {}", id, e)))?;
        Ok(reference)
    }

    async fn download(&self, reference: &str, id: &str) -> Result<Vec<u8>> {
        let path = self.object_path(reference)?;
        fs::read(&path)
            .await
            .map_err(|e| BackupError::Storage(format!("Cloud download of {} failed: {}", id, e)))
    }

    async fn delete(&self, reference: &str, id: &str) -> Result<()> {
        let path = self.object_path(reference)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackupError::Storage(format!("Cloud delete of {} failed: {}", id, e))),
        }
    }
}
