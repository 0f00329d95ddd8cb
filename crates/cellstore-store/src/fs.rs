//! Filesystem blob store.
//!
//! Blob keys are `/`-separated relative paths below a root directory.

use async_trait::async_trait;
use cellstore_core::error::{CellstoreError, Result};
use cellstore_core::ports::BlobStore;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// BlobStore writing one file per key below `root`
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path, refusing anything that would escape the root
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(CellstoreError::validation(
                "blob_key",
                format!("'{}' is not a relative path", key),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Staged write; readers never see a partial blob.
        let mut staging = path.clone().into_os_string();
        staging.push(".partial");
        let staging = PathBuf::from(staging);
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;
        tracing::debug!(key = %key, path = %path.display(), "Stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(CellstoreError::BlobNotFound { key: key.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("features/ds/abc/17", vec![7, 8, 9]).await.unwrap();
        assert!(dir.path().join("features/ds/abc/17").exists());
        assert_eq!(store.get("features/ds/abc/17").await.unwrap(), vec![7, 8, 9]);

        store.delete("features/ds/abc/17").await.unwrap();
        store.delete("features/ds/abc/17").await.unwrap();
        assert!(matches!(
            store.get("features/ds/abc/17").await,
            Err(CellstoreError::BlobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("a/b", vec![1]).await.unwrap();
        store.put("a/b", vec![2, 2]).await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), vec![2, 2]);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        for key in ["../outside", "/etc/passwd", "a/../../b", ""] {
            assert!(
                matches!(store.put(key, vec![1]).await, Err(CellstoreError::Validation { .. })),
                "{} should be rejected",
                key
            );
        }
    }
}
