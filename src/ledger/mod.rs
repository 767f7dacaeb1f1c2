//! Sales Ledger
//!
//! Durable store of sale and withdrawal records, keyed by (user, order) and
//! resolvable by payout task id. All mutation goes through one merge-patch
//! entry point; secondary indexes are derived caches, never the source of
//! truth.

pub mod store;
pub mod types;

pub use store::{LedgerError, RebuildReport, SalesLedger};
pub use types::{
    ReceiptKind, ReceiptSlot, ReceiptState, SaleDraft, SalePatch, SaleRecord, SaleStatus,
    WithdrawalPatch, WithdrawalRecord, WithdrawalStatus,
};
