//! Paydesk Backend - Fiscal Receipt Reconciliation
//!
//! Server-side core for a platform where self-employed users issue sales
//! that must be fiscalized through an external receipt provider and paid out
//! through an external payout provider. Both providers are eventually
//! consistent, so the interesting work happens after the triggering request
//! has returned:
//!
//! 1. **Repair Worker** - leader-gated periodic scan resolving receipts
//! 2. **Schedule Worker** - leader-gated execution of due offset receipts
//! 3. **Withdrawal Poller** - request-triggered idempotent payout check
//!
//! Instances scale horizontally over one shared storage backend; the leader
//! lease elects a single active worker, and every mutation funnels through
//! the ledger's merge-patch so concurrent writers cannot lose updates.

pub mod common;
pub mod config;
pub mod context;
pub mod events;
pub mod fiscal;
pub mod lease;
pub mod ledger;
pub mod logging;
pub mod payout;
pub mod storage;
pub mod workers;

// Re-exports: root error
pub use common::{now_ts, PaydeskError, Result};

// Re-exports: configuration
pub use config::{Config, ConfigError, Profile};

// Re-exports: context
pub use context::AppContext;

// Re-exports: storage
pub use storage::{FsStorage, MemoryStorage, ObjectMeta, Precondition, Storage, StorageError};

// Re-exports: ledger
pub use ledger::{
    LedgerError, RebuildReport, ReceiptKind, ReceiptSlot, ReceiptState, SaleDraft, SalePatch,
    SaleRecord, SaleStatus, SalesLedger, WithdrawalPatch, WithdrawalRecord, WithdrawalStatus,
};

// Re-exports: leader lease
pub use lease::{LeaderLease, LeaseError, LeaseGrant, LeaseRecord, ProcessLease, StorageLease};

// Re-exports: fiscal provider client
pub use fiscal::{
    build_receipt_view_url, token_fingerprint, FiscalIds, HttpReceiptClient, ReceiptApi,
    ReceiptClientError, ReceiptCreated, ReceiptDraft, ReceiptLookup,
};

// Re-exports: payout provider client and poller
pub use payout::{
    refresh_withdrawal, HttpPayoutClient, PayoutApi, PayoutError, PayoutTask, WithdrawalOutcome,
};

// Re-exports: workers
pub use workers::{
    repair_pass, resync_sale, run_due_jobs_now, schedule_pass, PassStats, RepairWorker,
    ScheduleOutcome, ScheduleWorker, WorkerError,
};

// Re-exports: event bus
pub use events::{ws_user_events, EventBus, UserEvent};

/// Minor-unit money helpers
pub mod money {
    pub const MINOR_PER_UNIT: u64 = 100;

    /// Format minor units as a decimal amount, e.g. `15000` → `"150.00"`
    pub fn format_minor(minor: u64) -> String {
        format!("{}.{:02}", minor / MINOR_PER_UNIT, minor % MINOR_PER_UNIT)
    }

    /// Convert a whole-unit amount to minor units
    pub fn units_to_minor(units: u64) -> u64 {
        units * MINOR_PER_UNIT
    }

}
