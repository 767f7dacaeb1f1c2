//! Leader Lease
//!
//! Distributed mutual exclusion over the shared storage backend: at most one
//! of N horizontally-scaled instances holds the lease for a bounded period
//! and runs the side-effecting reconciliation passes. Everybody else no-ops.
//!
//! Two implementations behind one interface:
//! - `StorageLease` - conditional-write over a `Storage` backend. Strict when
//!   the backend's `put_if` is atomic (`MemoryStorage`, an object store's
//!   conditional put); only advisory on `FsStorage`, whose race window is
//!   documented there. Only a strict backend is safe for multi-instance
//!   deployments.
//! - `ProcessLease` - in-process election for single-instance deployments
//!   and tests; NOT safe for horizontal scaling.
//!
//! Losing the election is a normal branch, never an error. A holder renews by
//! calling `try_acquire_or_renew` again before expiry; the TTL must exceed
//! one worker pass plus a renewal margin (enforced by `Config::validate`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::storage::{Precondition, Storage, StorageError};

/// Storage path of the lease record
pub const LEASE_PATH: &str = "lease/worker.json";

/// Lease errors
#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// The persisted lease record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Instance currently holding the lease
    pub holder: String,
    /// When the holder first acquired it (unix seconds)
    pub acquired_at: u64,
    /// When the lease expires unless renewed (unix seconds)
    pub expires_at: u64,
}

impl LeaseRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

/// Outcome of an acquire/renew attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseGrant {
    /// Whether the caller holds the lease for the current window
    pub is_leader: bool,
    /// When the current lease expires (ours or the other holder's)
    pub expires_at: u64,
}

/// Leader election interface
#[async_trait]
pub trait LeaderLease: Send + Sync {
    /// Acquire the lease, or renew it if the caller already holds it.
    ///
    /// Succeeds when no lease exists, the existing one is expired at `now`,
    /// or its holder equals `instance_id` (renewal keeps `acquired_at`).
    async fn try_acquire_or_renew(
        &self,
        instance_id: &str,
        now: u64,
        ttl_secs: u64,
    ) -> Result<LeaseGrant, LeaseError>;
}

/// Lease over a shared `Storage` backend.
///
/// Strictness is inherited from the backend's `put_if`: atomic backends give
/// real mutual exclusion, `FsStorage` gives a best-effort advisory lease.
pub struct StorageLease {
    storage: Arc<dyn Storage>,
    path: String,
}

impl StorageLease {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            path: LEASE_PATH.to_string(),
        }
    }

    #[cfg(test)]
    fn with_path(storage: Arc<dyn Storage>, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
        }
    }

    async fn read_current(&self) -> Result<(Option<LeaseRecord>, Option<Vec<u8>>), LeaseError> {
        let raw = self.storage.read(&self.path).await?;
        let record = match &raw {
            Some(data) => match serde_json::from_slice::<LeaseRecord>(data) {
                Ok(record) => Some(record),
                Err(e) => {
                    // An unreadable lease must not wedge the election; treat
                    // it as absent so the next writer repairs it.
                    tracing::warn!(target: "paydesk::lease", error = %e, "unreadable lease record, treating as absent");
                    None
                }
            },
            None => None,
        };
        Ok((record, raw))
    }
}

#[async_trait]
impl LeaderLease for StorageLease {
    async fn try_acquire_or_renew(
        &self,
        instance_id: &str,
        now: u64,
        ttl_secs: u64,
    ) -> Result<LeaseGrant, LeaseError> {
        let (current, raw) = self.read_current().await?;

        let acquired_at = match &current {
            Some(record) if record.holder == instance_id && !record.is_expired(now) => {
                // Renewal: keep the original acquisition time
                record.acquired_at
            }
            Some(record) if !record.is_expired(now) => {
                // Held by someone else: normal non-leader branch
                return Ok(LeaseGrant {
                    is_leader: false,
                    expires_at: record.expires_at,
                });
            }
            _ => now,
        };

        let next = LeaseRecord {
            holder: instance_id.to_string(),
            acquired_at,
            expires_at: now + ttl_secs,
        };
        let data = serde_json::to_vec(&next)
            .map_err(|e| StorageError::InvalidData(self.path.clone(), e.to_string()))?;

        let expected = match raw {
            Some(prior) => Precondition::Matches(prior),
            None => Precondition::Absent,
        };

        if self.storage.put_if(&self.path, &data, expected).await? {
            return Ok(LeaseGrant {
                is_leader: true,
                expires_at: next.expires_at,
            });
        }

        // Lost the conditional write: somebody else moved first
        let (after, _) = self.read_current().await?;
        Ok(LeaseGrant {
            is_leader: false,
            expires_at: after.map(|r| r.expires_at).unwrap_or(now),
        })
    }
}

/// In-process advisory lease.
///
/// Election state lives in this process only, so it coordinates nothing
/// across instances; use it for single-instance deployments where the
/// storage backend cannot provide conditional writes.
#[derive(Default)]
pub struct ProcessLease {
    current: Mutex<Option<LeaseRecord>>,
}

impl ProcessLease {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaderLease for ProcessLease {
    async fn try_acquire_or_renew(
        &self,
        instance_id: &str,
        now: u64,
        ttl_secs: u64,
    ) -> Result<LeaseGrant, LeaseError> {
        let mut current = self.current.lock().await;

        if let Some(record) = current.as_ref() {
            if !record.is_expired(now) && record.holder != instance_id {
                return Ok(LeaseGrant {
                    is_leader: false,
                    expires_at: record.expires_at,
                });
            }
        }

        let acquired_at = current
            .as_ref()
            .filter(|r| r.holder == instance_id && !r.is_expired(now))
            .map(|r| r.acquired_at)
            .unwrap_or(now);

        let next = LeaseRecord {
            holder: instance_id.to_string(),
            acquired_at,
            expires_at: now + ttl_secs,
        };
        let expires_at = next.expires_at;
        *current = Some(next);

        Ok(LeaseGrant {
            is_leader: true,
            expires_at,
        })
    }
}
