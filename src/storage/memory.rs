//! In-Memory Storage Implementation
//!
//! Backs tests and single-process deployments. All operations, including
//! `put_if`, run under one lock, so conditional writes are genuinely atomic
//! here - the same guarantee an object store's conditional put gives.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{
    validate_path, ObjectMeta, Precondition, Storage, StorageError, StorageResult,
};
use crate::common::now_ts;

/// In-memory object store
///
/// Thread-safe; keys are kept sorted so `list` output is deterministic.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store holds no objects
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_path(path)?;
        Ok(self.objects.read().await.get(path).cloned())
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        validate_path(path)?;
        self.objects
            .write()
            .await
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn append(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        validate_path(path)?;
        let mut objects = self.objects.write().await;
        objects
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn stat(&self, path: &str) -> StorageResult<Option<ObjectMeta>> {
        validate_path(path)?;
        Ok(self.objects.read().await.get(path).map(|data| ObjectMeta {
            size: data.len() as u64,
            modified: Some(now_ts()),
        }))
    }

    async fn put_if(
        &self,
        path: &str,
        data: &[u8],
        expected: Precondition,
    ) -> StorageResult<bool> {
        validate_path(path)?;
        // Single write lock across check and write: atomic conditional put.
        let mut objects = self.objects.write().await;
        let current = objects.get(path);

        let holds = match &expected {
            Precondition::Absent => current.is_none(),
            Precondition::Matches(bytes) => current.map(|c| c == bytes).unwrap_or(false),
        };

        if !holds {
            return Ok(false);
        }

        objects.insert(path.to_string(), data.to_vec());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let store = MemoryStorage::new();

        assert!(store.read("a/b.json").await.unwrap().is_none());
        store.write("a/b.json", b"{}").await.unwrap();
        assert_eq!(store.read("a/b.json").await.unwrap().unwrap(), b"{}");

        let meta = store.stat("a/b.json").await.unwrap().unwrap();
        assert_eq!(meta.size, 2);
    }

    #[tokio::test]
    async fn test_append_creates_and_extends() {
        let store = MemoryStorage::new();

        store.append("log.txt", b"one\n").await.unwrap();
        store.append("log.txt", b"two\n").await.unwrap();
        assert_eq!(store.read("log.txt").await.unwrap().unwrap(), b"one\ntwo\n");
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = MemoryStorage::new();
        store.write("sales/u1/1.json", b"a").await.unwrap();
        store.write("sales/u1/2.json", b"b").await.unwrap();
        store.write("sales/u2/1.json", b"c").await.unwrap();

        let listed = store.list("sales/u1/").await.unwrap();
        assert_eq!(listed, vec!["sales/u1/1.json", "sales/u1/2.json"]);

        let all = store.list("sales/").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_put_if_absent() {
        let store = MemoryStorage::new();

        assert!(store
            .put_if("lease.json", b"first", Precondition::Absent)
            .await
            .unwrap());
        assert!(!store
            .put_if("lease.json", b"second", Precondition::Absent)
            .await
            .unwrap());
        assert_eq!(store.read("lease.json").await.unwrap().unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_put_if_matches() {
        let store = MemoryStorage::new();
        store.write("lease.json", b"v1").await.unwrap();

        assert!(!store
            .put_if("lease.json", b"v2", Precondition::Matches(b"other".to_vec()))
            .await
            .unwrap());
        assert!(store
            .put_if("lease.json", b"v2", Precondition::Matches(b"v1".to_vec()))
            .await
            .unwrap());
        assert_eq!(store.read("lease.json").await.unwrap().unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_concurrent_put_if_absent_single_winner() {
        let store = MemoryStorage::new();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put_if("slot", format!("w{}", i).as_bytes(), Precondition::Absent)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
