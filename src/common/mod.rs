//! Common Types and Helpers
//!
//! Shared error type and small utilities used across all modules.

pub mod error;

pub use error::{PaydeskError, Result};

/// Current unix time in seconds.
pub fn now_ts() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
