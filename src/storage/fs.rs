//! Filesystem Storage Implementation
//!
//! Stores each object as a file under a root directory. Suitable for a
//! single shared volume; paths map 1:1 to files.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::traits::{
    validate_path, ObjectMeta, Precondition, Storage, StorageError, StorageResult,
};

/// Filesystem-backed object store rooted at a directory
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> StorageResult<PathBuf> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }

    async fn ensure_parent(&self, full: &Path) -> StorageResult<()> {
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn read(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        let full = self.full_path(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let full = self.full_path(path)?;
        self.ensure_parent(&full).await?;
        tokio::fs::write(&full, data).await?;
        Ok(())
    }

    async fn append(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let full = self.full_path(path)?;
        self.ensure_parent(&full).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut results = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }

                let relative = path
                    .strip_prefix(&self.root)
                    .map_err(|_| StorageError::Backend("entry outside root".to_string()))?;
                let key = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
                if key.starts_with(prefix) {
                    results.push(key);
                }
            }
        }

        results.sort();
        Ok(results)
    }

    async fn stat(&self, path: &str) -> StorageResult<Option<ObjectMeta>> {
        let full = self.full_path(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) => {
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs());
                Ok(Some(ObjectMeta {
                    size: meta.len(),
                    modified,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Conditional write, ADVISORY ONLY on this backend.
    ///
    /// The filesystem gives us no compare-and-swap, so the precondition check
    /// and the write are two separate operations. Two processes passing the
    /// check concurrently can both write, last-writer-wins. This window makes
    /// `FsStorage` unsafe as the lease backend for horizontally scaled
    /// deployments; multi-instance setups need a backend with an atomic
    /// conditional put (see `MemoryStorage` for the reference semantics).
    async fn put_if(
        &self,
        path: &str,
        data: &[u8],
        expected: Precondition,
    ) -> StorageResult<bool> {
        let current = self.read(path).await?;

        let holds = match &expected {
            Precondition::Absent => current.is_none(),
            Precondition::Matches(bytes) => {
                current.as_deref().map(|c| c == &bytes[..]).unwrap_or(false)
            }
        };

        if !holds {
            return Ok(false);
        }

        self.write(path, data).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        (dir, storage)
    }

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let (_dir, store) = store();

        assert!(store.read("sales/u1/1.json").await.unwrap().is_none());
        store.write("sales/u1/1.json", b"{\"id\":1}").await.unwrap();
        assert_eq!(
            store.read("sales/u1/1.json").await.unwrap().unwrap(),
            b"{\"id\":1}"
        );
    }

    #[tokio::test]
    async fn test_append() {
        let (_dir, store) = store();

        store.append("w/1.log", b"created\n").await.unwrap();
        store.append("w/1.log", b"paid\n").await.unwrap();
        assert_eq!(
            store.read("w/1.log").await.unwrap().unwrap(),
            b"created\npaid\n"
        );
    }

    #[tokio::test]
    async fn test_list_recursive_sorted() {
        let (_dir, store) = store();
        store.write("sales/u1/2.json", b"b").await.unwrap();
        store.write("sales/u1/1.json", b"a").await.unwrap();
        store.write("indexes/u1/by_task.json", b"{}").await.unwrap();

        let listed = store.list("sales/").await.unwrap();
        assert_eq!(listed, vec!["sales/u1/1.json", "sales/u1/2.json"]);

        // Listing an empty root is not an error
        let empty = FsStorage::new(_dir.path().join("missing"));
        assert!(empty.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stat() {
        let (_dir, store) = store();
        assert!(store.stat("x.bin").await.unwrap().is_none());

        store.write("x.bin", &[0u8; 16]).await.unwrap();
        let meta = store.stat("x.bin").await.unwrap().unwrap();
        assert_eq!(meta.size, 16);
        assert!(meta.modified.is_some());
    }

    #[tokio::test]
    async fn test_put_if() {
        let (_dir, store) = store();

        assert!(store
            .put_if("lease.json", b"v1", Precondition::Absent)
            .await
            .unwrap());
        assert!(!store
            .put_if("lease.json", b"v2", Precondition::Absent)
            .await
            .unwrap());
        assert!(store
            .put_if("lease.json", b"v2", Precondition::Matches(b"v1".to_vec()))
            .await
            .unwrap());
        assert_eq!(store.read("lease.json").await.unwrap().unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, store) = store();
        assert!(store.read("../outside").await.is_err());
        assert!(store.write("/absolute", b"x").await.is_err());
    }
}
