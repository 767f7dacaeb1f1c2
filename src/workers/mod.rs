//! Background Reconciliation Workers
//!
//! Leader-gated periodic passes keeping receipt state in sync with the
//! fiscal provider. Every instance runs the timers; only the lease holder
//! performs side-effecting work, everybody else no-ops. All mutations are
//! idempotent fill-only merges, so the brief double-execution window during
//! a leadership handoff is tolerable, not corrupting.

pub mod repair;
pub mod schedule;

pub use repair::{repair_pass, resync_sale, RepairWorker};
pub use schedule::{run_due_jobs_now, schedule_pass, ScheduleOutcome, ScheduleWorker};

use thiserror::Error;

use crate::common::now_ts;
use crate::context::AppContext;
use crate::fiscal::ReceiptClientError;
use crate::lease::{LeaderLease, LeaseError};
use crate::ledger::LedgerError;

/// Worker errors
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("receipt provider error: {0}")]
    Receipt(#[from] ReceiptClientError),

    #[error("lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error("not found: {0}")]
    NotFound(String),
}

impl WorkerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Receipt(e) => e.is_retryable(),
            WorkerError::Ledger(LedgerError::Storage(_)) | WorkerError::Lease(_) => true,
            _ => false,
        }
    }
}

/// Summary of one worker pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Receipt kinds examined
    pub scanned: usize,
    /// Receipt kinds that reached their public URL this pass
    pub resolved: usize,
    /// Transient failures, retried implicitly by the next pass
    pub failures: usize,
}

impl std::fmt::Display for PassStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} scanned | {} resolved | {} failures",
            self.scanned, self.resolved, self.failures
        )
    }
}

/// Acquire or renew the leader lease for this instance.
///
/// Not being the leader is a normal no-op branch for the periodic workers.
pub(crate) async fn acquire_leadership(ctx: &AppContext) -> Result<bool, WorkerError> {
    let grant = ctx
        .lease
        .try_acquire_or_renew(&ctx.instance_id, now_ts(), ctx.config.lease_ttl_secs)
        .await?;

    if !grant.is_leader {
        tracing::debug!(
            target: "paydesk::worker",
            instance = %ctx.instance_id,
            until = grant.expires_at,
            "not the leader, skipping pass"
        );
    }

    Ok(grant.is_leader)
}
