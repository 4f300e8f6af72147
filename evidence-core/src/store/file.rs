//! Directory-backed blob store.
//!
//! Each key is stored as one file whose name is the hex SHA3-256 digest of the
//! key, so arbitrary keys map to safe, fixed-length file names. Writes go to a
//! temporary sibling first and are renamed into place, so a reader never sees
//! a half-written blob.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha3::{Digest, Sha3_256};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use super::{BlobStore, StoreError, StoreResult};

/// Extension of committed blob files.
const BLOB_EXTENSION: &str = "blob";

/// Extension of in-progress writes.
const TEMP_EXTENSION: &str = "tmp";

/// Blob store keeping one file per key in a directory.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Fails with [`StoreError::Unavailable`] when the directory cannot be
    /// created or is not a directory.
    #[instrument(level = "debug", skip_all, fields(root = %root.as_ref().display()))]
    pub async fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(&root).await.map_err(|e| {
            warn!(error = %e, "Failed to create blob directory");
            StoreError::Unavailable(format!("cannot create {}: {e}", root.display()))
        })?;

        let metadata = fs::metadata(&root)
            .await
            .map_err(|e| StoreError::Unavailable(format!("cannot stat {}: {e}", root.display())))?;
        if !metadata.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        info!(root = %root.display(), "Blob store opened");
        Ok(Self { root })
    }

    /// Directory holding the blobs
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name for a key: hex SHA3-256 of the key.
    pub fn file_name(key: &str) -> String {
        let mut hasher = Sha3_256::new();
        hasher.update(key.as_bytes());
        format!("{}.{}", hex::encode(hasher.finalize()), BLOB_EXTENSION)
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(Self::file_name(key))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let target = self.blob_path(key);
        let temp = target.with_extension(format!(
            "{}.{}",
            uuid::Uuid::new_v4().simple(),
            TEMP_EXTENSION
        ));
        let size = bytes.len();

        if let Err(e) = fs::write(&temp, bytes).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        debug!(key, size, "Stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(self.blob_path(key)).await {
            Ok(bytes) => {
                debug!(key, size = bytes.len(), "Read blob");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        match fs::remove_file(self.blob_path(key)).await {
            Ok(()) => {
                debug!(key, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut removed = 0usize;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_ours = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == BLOB_EXTENSION || ext == TEMP_EXTENSION);
            if !is_ours {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!(removed, "Cleared blob store");
        Ok(())
    }

    async fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(fs::try_exists(self.blob_path(key)).await?)
    }
}

impl std::fmt::Debug for FileBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBlobStore")
            .field("root", &self.root)
            .finish()
    }
}
