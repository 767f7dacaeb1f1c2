//! Sales Ledger Types
//!
//! A sale carries up to three fiscal receipts (prepay / offset / full), each
//! advancing through: absent → id-known → resolved. "Resolved" means a public
//! receipt URL is known. The state is derived from the stored fields and can
//! never move backwards because merge-patches only fill empty fields.

use serde::{Deserialize, Serialize};

use crate::common::now_ts;

/// The three receipt kinds of a prepay → offset → full chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    /// Advance payment receipt
    Prepay,
    /// Credit-of-prepayment receipt issued when the service is delivered
    Offset,
    /// Full settlement receipt
    Full,
}

impl ReceiptKind {
    /// All kinds, in chain order
    pub fn all() -> [ReceiptKind; 3] {
        [ReceiptKind::Prepay, ReceiptKind::Offset, ReceiptKind::Full]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptKind::Prepay => "prepay",
            ReceiptKind::Offset => "offset",
            ReceiptKind::Full => "full",
        }
    }
}

impl std::fmt::Display for ReceiptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReceiptKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepay" => Ok(ReceiptKind::Prepay),
            "offset" => Ok(ReceiptKind::Offset),
            "full" => Ok(ReceiptKind::Full),
            _ => Err(format!("unknown receipt kind: {}", s)),
        }
    }
}

/// Derived reconciliation state of one receipt kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptState {
    /// No provider-side receipt is known yet
    Absent,
    /// The provider assigned a receipt id, but no public URL exists yet
    IdKnown,
    /// A public receipt URL is known
    Resolved,
}

impl std::fmt::Display for ReceiptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReceiptState::Absent => "absent",
            ReceiptState::IdKnown => "id_known",
            ReceiptState::Resolved => "resolved",
        };
        write!(f, "{}", s)
    }
}

/// Stored fields of one receipt kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSlot {
    /// External per-stage invoice reference, set when the sale is created
    pub invoice_id: Option<String>,
    /// Provider-assigned receipt id
    pub receipt_id: Option<String>,
    /// Public receipt view URL
    pub receipt_url: Option<String>,
}

impl ReceiptSlot {
    /// Derive the reconciliation state from the stored fields
    pub fn state(&self) -> ReceiptState {
        if self.receipt_url.is_some() {
            ReceiptState::Resolved
        } else if self.receipt_id.is_some() {
            ReceiptState::IdKnown
        } else {
            ReceiptState::Absent
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state() == ReceiptState::Resolved
    }

    /// Whether the slot can be queried at the provider at all
    pub fn has_reference(&self) -> bool {
        self.receipt_id.is_some() || self.invoice_id.is_some()
    }

    /// The identifier to query the provider with (receipt id wins)
    pub fn provider_reference(&self) -> Option<&str> {
        self.receipt_id.as_deref().or(self.invoice_id.as_deref())
    }
}

/// The three receipt slots of a sale
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleReceipts {
    pub prepay: ReceiptSlot,
    pub offset: ReceiptSlot,
    pub full: ReceiptSlot,
}

impl SaleReceipts {
    pub fn slot(&self, kind: ReceiptKind) -> &ReceiptSlot {
        match kind {
            ReceiptKind::Prepay => &self.prepay,
            ReceiptKind::Offset => &self.offset,
            ReceiptKind::Full => &self.full,
        }
    }

    pub fn slot_mut(&mut self, kind: ReceiptKind) -> &mut ReceiptSlot {
        match kind {
            ReceiptKind::Prepay => &mut self.prepay,
            ReceiptKind::Offset => &mut self.offset,
            ReceiptKind::Full => &mut self.full,
        }
    }
}

/// Business status of a sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Created, awaiting payment
    New,
    /// Payment received
    Paid,
    /// Service delivered, chain complete
    Completed,
    /// Canceled before completion
    Canceled,
}

impl Default for SaleStatus {
    fn default() -> Self {
        Self::New
    }
}

impl std::fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Paid => "paid",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SaleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "paid" => Ok(Self::Paid),
            "completed" => Ok(Self::Completed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("unknown status: {}", s)),
        }
    }
}

/// A sale record tracking one order through fiscalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    /// Owning user
    pub user_id: String,
    /// Stable ledger-assigned order id, unique per user
    pub order_id: u64,
    /// Task id assigned by the payout API, if a payout exists
    pub task_id: Option<String>,
    /// Organization the sale belongs to
    pub org_id: Option<String>,
    /// Total amount in minor currency units
    pub amount_minor: u64,
    /// Prepaid part in minor currency units
    pub prepay_minor: u64,
    /// Business status
    pub status: SaleStatus,
    /// Fiscal receipts per kind
    pub receipts: SaleReceipts,
    /// Fingerprint of the provider auth token last used for this sale
    pub token_fp: Option<String>,
    /// When the deferred offset step becomes due (unix seconds)
    pub offset_due_at: Option<u64>,
    /// Hidden from user-facing listings
    pub hidden: bool,
    /// Timestamp when the sale was created
    pub created_at: u64,
    /// Timestamp of last update
    pub updated_at: u64,
}

impl SaleRecord {
    /// Create a record from a draft; the ledger assigns the order id
    pub fn new(user_id: String, order_id: u64, draft: SaleDraft) -> Self {
        let now = now_ts();
        Self {
            user_id,
            order_id,
            task_id: draft.task_id,
            org_id: draft.org_id,
            amount_minor: draft.amount_minor,
            prepay_minor: draft.prepay_minor,
            status: SaleStatus::default(),
            receipts: SaleReceipts {
                prepay: ReceiptSlot {
                    invoice_id: draft.prepay_invoice_id,
                    ..Default::default()
                },
                offset: ReceiptSlot {
                    invoice_id: draft.offset_invoice_id,
                    ..Default::default()
                },
                full: ReceiptSlot {
                    invoice_id: draft.full_invoice_id,
                    ..Default::default()
                },
            },
            token_fp: None,
            offset_due_at: draft.offset_due_at,
            hidden: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the deferred offset step is due: prepay resolved, offset
    /// unresolved, due time passed. A pure function of (now, sale).
    pub fn is_offset_due(&self, now: u64) -> bool {
        self.receipts.prepay.is_resolved()
            && !self.receipts.offset.is_resolved()
            && self.offset_due_at.map(|t| t <= now).unwrap_or(false)
    }

    /// Whether every receipt kind that has an invoice is resolved
    pub fn is_fully_resolved(&self) -> bool {
        ReceiptKind::all().iter().all(|&kind| {
            let slot = self.receipts.slot(kind);
            slot.invoice_id.is_none() || slot.is_resolved()
        })
    }

    /// Update timestamp
    pub fn touch(&mut self) {
        self.updated_at = now_ts();
    }
}

/// Input for creating a sale; the ledger assigns the order id
#[derive(Debug, Clone, Default)]
pub struct SaleDraft {
    pub org_id: Option<String>,
    pub task_id: Option<String>,
    pub amount_minor: u64,
    pub prepay_minor: u64,
    pub prepay_invoice_id: Option<String>,
    pub offset_invoice_id: Option<String>,
    pub full_invoice_id: Option<String>,
    pub offset_due_at: Option<u64>,
}

/// Merge-patch for one receipt slot: fills empty fields only
#[derive(Debug, Clone, Default)]
pub struct ReceiptSlotPatch {
    pub receipt_id: Option<String>,
    pub receipt_url: Option<String>,
}

impl ReceiptSlotPatch {
    fn is_empty(&self) -> bool {
        self.receipt_id.is_none() && self.receipt_url.is_none()
    }
}

/// Whitelisted merge-patch for a sale record.
///
/// Only the fields here can change after creation, and receipt fields are
/// fill-only: an already-set receipt id or URL is never overwritten, which is
/// what keeps receipt state monotonic under concurrent patches.
#[derive(Debug, Clone, Default)]
pub struct SalePatch {
    pub status: Option<SaleStatus>,
    pub hidden: Option<bool>,
    pub task_id: Option<String>,
    pub token_fp: Option<String>,
    pub offset_due_at: Option<u64>,
    pub prepay: ReceiptSlotPatch,
    pub offset: ReceiptSlotPatch,
    pub full: ReceiptSlotPatch,
}

impl SalePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: SaleStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = Some(hidden);
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_token_fp(mut self, fp: impl Into<String>) -> Self {
        self.token_fp = Some(fp.into());
        self
    }

    pub fn with_offset_due_at(mut self, due_at: u64) -> Self {
        self.offset_due_at = Some(due_at);
        self
    }

    pub fn with_receipt_id(mut self, kind: ReceiptKind, id: impl Into<String>) -> Self {
        self.slot_patch_mut(kind).receipt_id = Some(id.into());
        self
    }

    pub fn with_receipt_url(mut self, kind: ReceiptKind, url: impl Into<String>) -> Self {
        self.slot_patch_mut(kind).receipt_url = Some(url.into());
        self
    }

    fn slot_patch_mut(&mut self, kind: ReceiptKind) -> &mut ReceiptSlotPatch {
        match kind {
            ReceiptKind::Prepay => &mut self.prepay,
            ReceiptKind::Offset => &mut self.offset,
            ReceiptKind::Full => &mut self.full,
        }
    }

    fn slot_patch(&self, kind: ReceiptKind) -> &ReceiptSlotPatch {
        match kind {
            ReceiptKind::Prepay => &self.prepay,
            ReceiptKind::Offset => &self.offset,
            ReceiptKind::Full => &self.full,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.hidden.is_none()
            && self.task_id.is_none()
            && self.token_fp.is_none()
            && self.offset_due_at.is_none()
            && self.prepay.is_empty()
            && self.offset.is_empty()
            && self.full.is_empty()
    }

    /// Merge this patch into a record. Returns whether anything changed.
    pub fn apply(&self, sale: &mut SaleRecord) -> bool {
        let mut changed = false;

        if let Some(status) = self.status {
            if sale.status != status {
                sale.status = status;
                changed = true;
            }
        }
        if let Some(hidden) = self.hidden {
            if sale.hidden != hidden {
                sale.hidden = hidden;
                changed = true;
            }
        }
        // Task ids are assigned once by the payout API: fill-only.
        if let Some(task_id) = &self.task_id {
            if sale.task_id.is_none() {
                sale.task_id = Some(task_id.clone());
                changed = true;
            }
        }
        if let Some(fp) = &self.token_fp {
            if sale.token_fp.as_deref() != Some(fp.as_str()) {
                sale.token_fp = Some(fp.clone());
                changed = true;
            }
        }
        if let Some(due_at) = self.offset_due_at {
            if sale.offset_due_at != Some(due_at) {
                sale.offset_due_at = Some(due_at);
                changed = true;
            }
        }

        for kind in ReceiptKind::all() {
            let patch = self.slot_patch(kind);
            let slot = sale.receipts.slot_mut(kind);

            if let Some(id) = &patch.receipt_id {
                if slot.receipt_id.is_none() {
                    slot.receipt_id = Some(id.clone());
                    changed = true;
                }
            }
            if let Some(url) = &patch.receipt_url {
                if slot.receipt_url.is_none() {
                    slot.receipt_url = Some(url.clone());
                    changed = true;
                }
            }
        }

        if changed {
            sale.touch();
        }
        changed
    }
}

/// Status of a withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Submitted to the payout provider, outcome unknown
    Pending,
    /// Payout confirmed paid by the provider
    Paid,
}

impl Default for WithdrawalStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
        };
        write!(f, "{}", s)
    }
}

/// A withdrawal record tracking one payout task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub user_id: String,
    /// Task id assigned by the payout API
    pub task_id: String,
    pub amount_minor: u64,
    pub status: WithdrawalStatus,
    /// When the payout was confirmed paid (unix seconds)
    pub paid_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl WithdrawalRecord {
    pub fn new(user_id: String, task_id: String, amount_minor: u64) -> Self {
        let now = now_ts();
        Self {
            user_id,
            task_id,
            amount_minor,
            status: WithdrawalStatus::default(),
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Whitelisted merge-patch for a withdrawal record
#[derive(Debug, Clone, Default)]
pub struct WithdrawalPatch {
    pub status: Option<WithdrawalStatus>,
    pub paid_at: Option<u64>,
}

impl WithdrawalPatch {
    /// Patch marking the withdrawal paid at the given time
    pub fn paid(paid_at: u64) -> Self {
        Self {
            status: Some(WithdrawalStatus::Paid),
            paid_at: Some(paid_at),
        }
    }

    /// Merge into a record. `paid_at` is fill-only; a paid withdrawal is
    /// terminal.
    pub fn apply(&self, record: &mut WithdrawalRecord) -> bool {
        let mut changed = false;

        if let Some(status) = self.status {
            if record.status != status && record.status != WithdrawalStatus::Paid {
                record.status = status;
                changed = true;
            }
        }
        if let Some(paid_at) = self.paid_at {
            if record.paid_at.is_none() {
                record.paid_at = Some(paid_at);
                changed = true;
            }
        }

        if changed {
            record.updated_at = now_ts();
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale_with_prepay_invoice() -> SaleRecord {
        SaleRecord::new(
            "user1".to_string(),
            1,
            SaleDraft {
                amount_minor: 150_00,
                prepay_minor: 50_00,
                prepay_invoice_id: Some("inv-p-1".to_string()),
                offset_invoice_id: Some("inv-o-1".to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_receipt_state_derivation() {
        let mut slot = ReceiptSlot::default();
        assert_eq!(slot.state(), ReceiptState::Absent);
        assert!(!slot.has_reference());

        slot.invoice_id = Some("inv-1".to_string());
        assert_eq!(slot.state(), ReceiptState::Absent);
        assert!(slot.has_reference());
        assert_eq!(slot.provider_reference(), Some("inv-1"));

        slot.receipt_id = Some("rc-1".to_string());
        assert_eq!(slot.state(), ReceiptState::IdKnown);
        assert_eq!(slot.provider_reference(), Some("rc-1"));

        slot.receipt_url = Some("https://check.ofd.ru/rec/1/2/3".to_string());
        assert_eq!(slot.state(), ReceiptState::Resolved);
    }

    #[test]
    fn test_patch_never_regresses_receipt_state() {
        let mut sale = sale_with_prepay_invoice();

        SalePatch::new()
            .with_receipt_id(ReceiptKind::Prepay, "rc-1")
            .apply(&mut sale);
        SalePatch::new()
            .with_receipt_url(ReceiptKind::Prepay, "https://check.ofd.ru/rec/1/2/3")
            .apply(&mut sale);
        assert_eq!(sale.receipts.prepay.state(), ReceiptState::Resolved);

        // A later patch with a different id/url is a no-op: fill-only merge
        let changed = SalePatch::new()
            .with_receipt_id(ReceiptKind::Prepay, "rc-other")
            .with_receipt_url(ReceiptKind::Prepay, "https://check.ofd.ru/rec/9/9/9")
            .apply(&mut sale);
        assert!(!changed);
        assert_eq!(sale.receipts.prepay.receipt_id.as_deref(), Some("rc-1"));
        assert_eq!(
            sale.receipts.prepay.receipt_url.as_deref(),
            Some("https://check.ofd.ru/rec/1/2/3")
        );
        assert_eq!(sale.receipts.prepay.state(), ReceiptState::Resolved);
    }

    #[test]
    fn test_patch_disjoint_kinds_both_apply() {
        let mut sale = sale_with_prepay_invoice();

        SalePatch::new()
            .with_receipt_url(ReceiptKind::Prepay, "https://check.ofd.ru/rec/1/1/1")
            .apply(&mut sale);
        SalePatch::new()
            .with_receipt_url(ReceiptKind::Full, "https://check.ofd.ru/rec/2/2/2")
            .apply(&mut sale);

        assert!(sale.receipts.prepay.is_resolved());
        assert!(sale.receipts.full.is_resolved());
    }

    #[test]
    fn test_task_id_fill_only() {
        let mut sale = sale_with_prepay_invoice();

        assert!(SalePatch::new().with_task_id("task-1").apply(&mut sale));
        assert!(!SalePatch::new().with_task_id("task-2").apply(&mut sale));
        assert_eq!(sale.task_id.as_deref(), Some("task-1"));
    }

    #[test]
    fn test_offset_due() {
        let mut sale = sale_with_prepay_invoice();
        sale.offset_due_at = Some(1_000);

        // Prepay not resolved yet
        assert!(!sale.is_offset_due(2_000));

        sale.receipts.prepay.receipt_url = Some("https://check.ofd.ru/rec/1/2/3".to_string());
        assert!(!sale.is_offset_due(999));
        assert!(sale.is_offset_due(1_000));
        assert!(sale.is_offset_due(2_000));

        // Offset resolved: no longer due
        sale.receipts.offset.receipt_url = Some("https://check.ofd.ru/rec/4/5/6".to_string());
        assert!(!sale.is_offset_due(2_000));
    }

    #[test]
    fn test_fully_resolved_ignores_absent_invoices() {
        let mut sale = SaleRecord::new(
            "user1".to_string(),
            2,
            SaleDraft {
                amount_minor: 100_00,
                full_invoice_id: Some("inv-f-2".to_string()),
                ..Default::default()
            },
        );
        assert!(!sale.is_fully_resolved());

        sale.receipts.full.receipt_url = Some("https://check.ofd.ru/rec/1/2/3".to_string());
        assert!(sale.is_fully_resolved());
    }

    #[test]
    fn test_withdrawal_patch_terminal_paid() {
        let mut record =
            WithdrawalRecord::new("user1".to_string(), "task-9".to_string(), 500_00);

        assert!(WithdrawalPatch::paid(1_700_000_000).apply(&mut record));
        assert_eq!(record.status, WithdrawalStatus::Paid);
        assert_eq!(record.paid_at, Some(1_700_000_000));

        // Paid is terminal and paid_at fill-only
        assert!(!WithdrawalPatch::paid(1_800_000_000).apply(&mut record));
        assert_eq!(record.paid_at, Some(1_700_000_000));
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in ReceiptKind::all() {
            assert_eq!(kind.as_str().parse::<ReceiptKind>().unwrap(), kind);
        }
        assert!("unknown".parse::<ReceiptKind>().is_err());
    }
}
