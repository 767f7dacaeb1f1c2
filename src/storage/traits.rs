//! Storage Trait Definitions
//!
//! Defines the abstract path-addressed storage interface shared by every
//! instance of the service. Implementations can use the local filesystem
//! (production) or memory (testing).

use async_trait::async_trait;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid data at {0}: {1}")]
    InvalidData(String, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Object metadata returned by `stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object size in bytes
    pub size: u64,
    /// Last modification time (unix seconds), if the backend tracks it
    pub modified: Option<u64>,
}

/// Precondition for a conditional write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Write only if no object exists at the path
    Absent,
    /// Write only if the current object content equals these bytes
    Matches(Vec<u8>),
}

/// Path-addressed storage interface
///
/// Implementations:
/// - `FsStorage` - local filesystem; `put_if` is advisory (see its docs)
/// - `MemoryStorage` - in-memory; `put_if` is atomic
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read an object; `Ok(None)` if it does not exist
    async fn read(&self, path: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Write an object, creating parent namespaces as needed
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()>;

    /// Append bytes to an object, creating it if absent
    async fn append(&self, path: &str, data: &[u8]) -> StorageResult<()>;

    /// List full paths of all objects under a prefix
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Object metadata; `Ok(None)` if it does not exist
    async fn stat(&self, path: &str) -> StorageResult<Option<ObjectMeta>>;

    /// Conditional write: apply `data` only if `expected` holds.
    ///
    /// Returns `true` when the write was applied, `false` when the
    /// precondition failed. Whether the check-and-write is atomic depends on
    /// the backend; the leader lease inherits that guarantee.
    async fn put_if(
        &self,
        path: &str,
        data: &[u8],
        expected: Precondition,
    ) -> StorageResult<bool>;
}

/// Reject empty, absolute and traversing paths before they reach a backend
pub(crate) fn validate_path(path: &str) -> StorageResult<()> {
    if path.is_empty() || path.starts_with('/') {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    if path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}
