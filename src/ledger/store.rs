//! Sales Ledger Store
//!
//! Persists sale and withdrawal records in the shared storage backend.
//!
//! Layout (one logical keyed collection plus derived indexes):
//! - `sales/{user}/{order}.json` - primary sale records
//! - `indexes/{user}/by_task.json` - task id → order id (derived cache)
//! - `indexes/{user}/by_invoice.json` - invoice id → order id (derived cache)
//! - `withdrawals/{user}/{task}.json` - withdrawal records
//! - `withdrawals/{user}/{task}.done` - completion markers (terminal)
//! - `withdrawals/{user}/{task}.log` - append-only audit trail
//!
//! Every mutation goes through a merge-patch under a per-record critical
//! section, so concurrent writers to one record serialize while different
//! records proceed independently. The indexes are always re-derivable from
//! the primary records; they are caches, never the source of truth.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use super::types::{
    SaleDraft, SalePatch, SaleRecord, WithdrawalPatch, WithdrawalRecord,
};
use crate::storage::{Precondition, Storage, StorageError};

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("corrupt record at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result of an index rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Sale records folded into the indexes
    pub processed: usize,
    /// Records that could not be parsed and were skipped
    pub errors: usize,
}

impl std::fmt::Display for RebuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} processed, {} errors", self.processed, self.errors)
    }
}

/// Durable store of sale and withdrawal records
pub struct SalesLedger {
    storage: Arc<dyn Storage>,
    /// Per-record critical sections, keyed by storage path
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SalesLedger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    fn sale_path(user_id: &str, order_id: u64) -> String {
        format!("sales/{}/{:08}.json", user_id, order_id)
    }

    fn by_task_path(user_id: &str) -> String {
        format!("indexes/{}/by_task.json", user_id)
    }

    fn by_invoice_path(user_id: &str) -> String {
        format!("indexes/{}/by_invoice.json", user_id)
    }

    fn withdrawal_path(user_id: &str, task_id: &str) -> String {
        format!("withdrawals/{}/{}.json", user_id, task_id)
    }

    fn marker_path(user_id: &str, task_id: &str) -> String {
        format!("withdrawals/{}/{}.done", user_id, task_id)
    }

    fn audit_path(user_id: &str, task_id: &str) -> String {
        format!("withdrawals/{}/{}.log", user_id, task_id)
    }

    // ------------------------------------------------------------------
    // Serialization helpers
    // ------------------------------------------------------------------

    fn to_bytes<T: Serialize>(path: &str, value: &T) -> Result<Vec<u8>, LedgerError> {
        serde_json::to_vec(value).map_err(|e| LedgerError::Corrupt {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn from_bytes<T: DeserializeOwned>(path: &str, data: &[u8]) -> Result<T, LedgerError> {
        serde_json::from_slice(data).map_err(|e| LedgerError::Corrupt {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, LedgerError> {
        match self.storage.read(path).await? {
            Some(data) => Ok(Some(Self::from_bytes(path, &data)?)),
            None => Ok(None),
        }
    }

    async fn write_json<T: Serialize>(&self, path: &str, value: &T) -> Result<(), LedgerError> {
        let data = Self::to_bytes(path, value)?;
        self.storage.write(path, &data).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sales
    // ------------------------------------------------------------------

    /// Create a sale, assigning the next order id for the user
    pub async fn create_sale(
        &self,
        user_id: &str,
        draft: SaleDraft,
    ) -> Result<SaleRecord, LedgerError> {
        if user_id.is_empty() {
            return Err(LedgerError::Invalid("empty user id".to_string()));
        }

        // Serialize creations per user so two callers cannot claim one order id
        let lock = self.lock_for(&format!("create/{}", user_id));
        let _guard = lock.lock().await;

        let existing = self.storage.list(&format!("sales/{}/", user_id)).await?;
        let next_order = existing
            .iter()
            .filter_map(|path| Self::order_id_from_path(path))
            .max()
            .unwrap_or(0)
            + 1;

        let record = SaleRecord::new(user_id.to_string(), next_order, draft);
        self.write_json(&Self::sale_path(user_id, next_order), &record)
            .await?;

        if let Some(task_id) = &record.task_id {
            self.index_insert(&Self::by_task_path(user_id), task_id, next_order)
                .await?;
        }
        let invoices: Vec<String> = [
            &record.receipts.prepay.invoice_id,
            &record.receipts.offset.invoice_id,
            &record.receipts.full.invoice_id,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect();
        if !invoices.is_empty() {
            self.index_insert_many(&Self::by_invoice_path(user_id), &invoices, next_order)
                .await?;
        }

        Ok(record)
    }

    fn order_id_from_path(path: &str) -> Option<u64> {
        path.rsplit('/')
            .next()
            .and_then(|name| name.strip_suffix(".json"))
            .and_then(|stem| stem.parse().ok())
    }

    /// Get a sale by its primary key
    pub async fn get_sale(
        &self,
        user_id: &str,
        order_id: u64,
    ) -> Result<Option<SaleRecord>, LedgerError> {
        self.read_json(&Self::sale_path(user_id, order_id)).await
    }

    /// All sales of a user, ordered by order id. Corrupt records are skipped
    /// with a warning; they surface through `rebuild_indexes_from_primary`.
    pub async fn list_sales(&self, user_id: &str) -> Result<Vec<SaleRecord>, LedgerError> {
        let (sales, _errors) = self.load_sales(user_id).await?;
        Ok(sales)
    }

    async fn load_sales(
        &self,
        user_id: &str,
    ) -> Result<(Vec<SaleRecord>, usize), LedgerError> {
        let paths = self.storage.list(&format!("sales/{}/", user_id)).await?;
        let mut sales = Vec::with_capacity(paths.len());
        let mut errors = 0;

        for path in paths {
            if !path.ends_with(".json") {
                continue;
            }
            let Some(data) = self.storage.read(&path).await? else {
                continue;
            };
            match Self::from_bytes::<SaleRecord>(&path, &data) {
                Ok(sale) => sales.push(sale),
                Err(e) => {
                    tracing::warn!(target: "paydesk::ledger", %path, error = %e, "skipping unreadable sale record");
                    errors += 1;
                }
            }
        }

        sales.sort_by_key(|s| s.order_id);
        Ok((sales, errors))
    }

    /// All users with at least one sale
    pub async fn list_users(&self) -> Result<Vec<String>, LedgerError> {
        let paths = self.storage.list("sales/").await?;
        let users: BTreeSet<String> = paths
            .iter()
            .filter_map(|path| path.split('/').nth(1))
            .map(|s| s.to_string())
            .collect();
        Ok(users.into_iter().collect())
    }

    /// Resolve a sale by payout task id.
    ///
    /// The by-task index is consulted first as a cache; on a miss or a stale
    /// entry the primary records are scanned. Unknown task ids return
    /// `Ok(None)` and never create a placeholder.
    pub async fn find_sale_by_task_id(
        &self,
        user_id: &str,
        task_id: &str,
    ) -> Result<Option<SaleRecord>, LedgerError> {
        if let Some(index) = self
            .read_json::<BTreeMap<String, u64>>(&Self::by_task_path(user_id))
            .await
            .unwrap_or(None)
        {
            if let Some(&order_id) = index.get(task_id) {
                if let Some(sale) = self.get_sale(user_id, order_id).await? {
                    if sale.task_id.as_deref() == Some(task_id) {
                        return Ok(Some(sale));
                    }
                }
            }
        }

        // Cache miss or stale entry: the primary records decide
        let sales = self.list_sales(user_id).await?;
        Ok(sales
            .into_iter()
            .find(|s| s.task_id.as_deref() == Some(task_id)))
    }

    /// THE single mutation entry point for sale records.
    ///
    /// Merge-only: applies the whitelisted patch under the record's critical
    /// section, so racing patches from the repair pass, the schedule pass and
    /// manual actions serialize and disjoint fields all survive.
    pub async fn update_sale_by_order_id(
        &self,
        user_id: &str,
        order_id: u64,
        patch: SalePatch,
    ) -> Result<SaleRecord, LedgerError> {
        let path = Self::sale_path(user_id, order_id);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        let mut sale: SaleRecord = self
            .read_json(&path)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("sale {}/{}", user_id, order_id)))?;

        let task_was_absent = sale.task_id.is_none();
        let changed = patch.apply(&mut sale);
        if changed {
            self.write_json(&path, &sale).await?;

            if task_was_absent {
                if let Some(task_id) = sale.task_id.clone() {
                    self.index_insert(&Self::by_task_path(user_id), &task_id, order_id)
                        .await?;
                }
            }
        }

        Ok(sale)
    }

    // ------------------------------------------------------------------
    // Indexes
    // ------------------------------------------------------------------

    async fn index_insert(
        &self,
        index_path: &str,
        key: &str,
        order_id: u64,
    ) -> Result<(), LedgerError> {
        self.index_insert_many(index_path, &[key.to_string()], order_id)
            .await
    }

    async fn index_insert_many(
        &self,
        index_path: &str,
        keys: &[String],
        order_id: u64,
    ) -> Result<(), LedgerError> {
        let lock = self.lock_for(index_path);
        let _guard = lock.lock().await;

        let mut index: BTreeMap<String, u64> = self
            .read_json(index_path)
            .await
            .unwrap_or(None)
            .unwrap_or_default();
        for key in keys {
            index.insert(key.clone(), order_id);
        }
        self.write_json(index_path, &index).await
    }

    /// Reconstruct the by-task and by-invoice indexes from the primary sale
    /// records. Idempotent: a second run rewrites byte-identical content.
    pub async fn rebuild_indexes_from_primary(&self) -> Result<RebuildReport, LedgerError> {
        let mut report = RebuildReport::default();

        for user_id in self.list_users().await? {
            let (sales, errors) = self.load_sales(&user_id).await?;
            report.errors += errors;

            let mut by_task: BTreeMap<String, u64> = BTreeMap::new();
            let mut by_invoice: BTreeMap<String, u64> = BTreeMap::new();

            for sale in &sales {
                if let Some(task_id) = &sale.task_id {
                    by_task.insert(task_id.clone(), sale.order_id);
                }
                for slot in [
                    &sale.receipts.prepay,
                    &sale.receipts.offset,
                    &sale.receipts.full,
                ] {
                    if let Some(invoice_id) = &slot.invoice_id {
                        by_invoice.insert(invoice_id.clone(), sale.order_id);
                    }
                }
                report.processed += 1;
            }

            let by_task_path = Self::by_task_path(&user_id);
            let by_invoice_path = Self::by_invoice_path(&user_id);
            {
                let lock = self.lock_for(&by_task_path);
                let _guard = lock.lock().await;
                self.write_json(&by_task_path, &by_task).await?;
            }
            {
                let lock = self.lock_for(&by_invoice_path);
                let _guard = lock.lock().await;
                self.write_json(&by_invoice_path, &by_invoice).await?;
            }
        }

        Ok(report)
    }

    // ------------------------------------------------------------------
    // Withdrawals
    // ------------------------------------------------------------------

    /// Get or create the withdrawal record for a payout task
    pub async fn ensure_withdrawal(
        &self,
        user_id: &str,
        task_id: &str,
        amount_minor: u64,
    ) -> Result<WithdrawalRecord, LedgerError> {
        let path = Self::withdrawal_path(user_id, task_id);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        if let Some(existing) = self.read_json(&path).await? {
            return Ok(existing);
        }

        let record =
            WithdrawalRecord::new(user_id.to_string(), task_id.to_string(), amount_minor);
        self.write_json(&path, &record).await?;
        Ok(record)
    }

    pub async fn get_withdrawal(
        &self,
        user_id: &str,
        task_id: &str,
    ) -> Result<Option<WithdrawalRecord>, LedgerError> {
        self.read_json(&Self::withdrawal_path(user_id, task_id))
            .await
    }

    /// Merge-patch a withdrawal record, same mechanism as sales
    pub async fn update_withdrawal(
        &self,
        user_id: &str,
        task_id: &str,
        patch: WithdrawalPatch,
    ) -> Result<WithdrawalRecord, LedgerError> {
        let path = Self::withdrawal_path(user_id, task_id);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        let mut record: WithdrawalRecord = self.read_json(&path).await?.ok_or_else(|| {
            LedgerError::NotFound(format!("withdrawal {}/{}", user_id, task_id))
        })?;

        if patch.apply(&mut record) {
            self.write_json(&path, &record).await?;
        }

        Ok(record)
    }

    /// Whether the completion marker for (user, task) is set
    pub async fn completion_marker_exists(
        &self,
        user_id: &str,
        task_id: &str,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .storage
            .stat(&Self::marker_path(user_id, task_id))
            .await?
            .is_some())
    }

    /// Set the completion marker. Returns `true` for the single caller whose
    /// conditional write landed; the marker, once set, is never cleared.
    pub async fn set_completion_marker(
        &self,
        user_id: &str,
        task_id: &str,
    ) -> Result<bool, LedgerError> {
        let content = format!("{}\n", crate::common::now_ts());
        Ok(self
            .storage
            .put_if(
                &Self::marker_path(user_id, task_id),
                content.as_bytes(),
                Precondition::Absent,
            )
            .await?)
    }

    /// Append one free-text line to the per-withdrawal audit log
    pub async fn append_audit(
        &self,
        user_id: &str,
        task_id: &str,
        line: &str,
    ) -> Result<(), LedgerError> {
        let entry = format!("{} {}\n", chrono::Utc::now().to_rfc3339(), line);
        self.storage
            .append(&Self::audit_path(user_id, task_id), entry.as_bytes())
            .await?;
        Ok(())
    }

    /// Read the audit log lines for a withdrawal
    pub async fn audit_log(
        &self,
        user_id: &str,
        task_id: &str,
    ) -> Result<Vec<String>, LedgerError> {
        let data = self
            .storage
            .read(&Self::audit_path(user_id, task_id))
            .await?
            .unwrap_or_default();
        Ok(String::from_utf8_lossy(&data)
            .lines()
            .map(|l| l.to_string())
            .collect())
    }

    /// Raw bytes of a user's indexes, used by admin tooling to verify
    /// rebuild idempotence
    pub async fn index_bytes(
        &self,
        user_id: &str,
    ) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>), LedgerError> {
        let by_task = self.storage.read(&Self::by_task_path(user_id)).await?;
        let by_invoice = self.storage.read(&Self::by_invoice_path(user_id)).await?;
        Ok((by_task, by_invoice))
    }
}
