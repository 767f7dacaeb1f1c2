//! Path-Addressed Storage Backend
//!
//! The ledger, the leader lease and the withdrawal markers all live in one
//! shared storage backend addressed by `/`-separated paths. Implementations:
//! - `FsStorage` - local filesystem (production, single shared volume)
//! - `MemoryStorage` - in-memory (testing; conditional writes are atomic)

pub mod fs;
pub mod memory;
pub mod traits;

pub use fs::FsStorage;
pub use memory::MemoryStorage;
pub use traits::{ObjectMeta, Precondition, Storage, StorageError, StorageResult};
