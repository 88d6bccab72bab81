//! File-backed document store: one JSON document per entity.
//!
//! Each record lives at `<root>/<collection>/<id>.json` and is written via a
//! temporary file followed by an atomic rename, so a crash leaves either the old
//! or the new document on disk. Writers to the same id are serialized through a
//! per-id async mutex; different ids never contend.

use crate::{BackupError, Result};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// An entity persisted by [`DocumentStore`]
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
}

/// Durable per-entity JSON store
pub struct DocumentStore<T> {
    collection: String,
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Document> DocumentStore<T> {
    /// Open (and create if needed) the collection directory under `root`
    pub async fn open(root: impl AsRef<Path>, collection: &str) -> Result<Self> {
        let dir = root.as_ref().join(collection);
        fs::create_dir_all(&dir).await.map_err(|e| {
            BackupError::Storage(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        debug!("Opened document store {} at {}", collection, dir.display());

        Ok(Self {
            collection: collection.to_string(),
            dir,
            locks: DashMap::new(),
            _marker: PhantomData,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\'])
            && !id.contains('\0');
        if !valid {
            return Err(BackupError::Precondition(format!("Invalid document id: {:?}", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read a document, `None` if it does not exist
    pub async fn get(&self, id: &str) -> Result<Option<T>> {
        let path = self.path_for(id)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackupError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Read a document, failing with `NotFound` if it does not exist
    pub async fn load(&self, id: &str) -> Result<T> {
        self.get(id)
            .await?
            .ok_or_else(|| BackupError::NotFound(format!("{} {} not found", self.collection, id)))
    }

    /// Write the whole document
    pub async fn put(&self, doc: &T) -> Result<()> {
        let lock = self.lock_for(doc.id());
        let _guard = lock.lock().await;
        self.write_unlocked(doc).await
    }

    /// Read-modify-write under the per-id lock
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut T) -> Result<()>,
    {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut doc = self.load(id).await?;
        mutate(&mut doc)?;
        self.write_unlocked(&doc).await?;
        Ok(doc)
    }

    /// Remove a document. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        let lock = self.lock_for(id);
        let existed = {
            let _guard = lock.lock().await;
            match fs::remove_file(&path).await {
                Ok(()) => true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => {
                    return Err(BackupError::Storage(format!(
                        "Failed to delete {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        };
        self.locks.remove(id);
        Ok(existed)
    }

    /// All documents in the collection. Unreadable files are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<T>> {
        let mut docs = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).await {
                Ok(data) => match serde_json::from_slice::<T>(&data) {
                    Ok(doc) => docs.push(doc),
                    Err(e) => warn!("Skipping unparsable document {}: {}", path.display(), e),
                },
                Err(e) => warn!("Skipping unreadable document {}: {}", path.display(), e),
            }
        }

        Ok(docs)
    }

    async fn write_unlocked(&self, doc: &T) -> Result<()> {
        let path = self.path_for(doc.id())?;
        let json = serde_json::to_vec_pretty(doc)?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json).await.map_err(|e| {
            BackupError::Storage(format!("Failed to write {}: {}", temp_path.display(), e))
        })?;
        fs::rename(&temp_path, &path).await.map_err(|e| {
            BackupError::Storage(format!("Failed to rename {}: {}", temp_path.display(), e))
        })?;

        debug!("Persisted {}/{}", self.collection, doc.id());
        Ok(())
    }
}
