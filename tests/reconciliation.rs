//! End-to-end reconciliation tests over in-memory storage
//!
//! Exercises the public API the way two scaled instances would: shared
//! storage, leader election, repair and schedule passes, and the idempotent
//! withdrawal poller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use paydesk::{
    now_ts, refresh_withdrawal, repair_pass, schedule_pass, AppContext, Config, EventBus,
    FiscalIds, LeaderLease, MemoryStorage, PayoutApi, PayoutError, PayoutTask, ReceiptApi,
    ReceiptClientError, ReceiptCreated, ReceiptDraft, ReceiptKind, ReceiptLookup, SaleDraft,
    SalePatch, SalesLedger, Storage, StorageLease, UserEvent,
};

/// Receipt provider stub: every queried receipt is fiscalized
struct FakeReceipts {
    status_calls: AtomicUsize,
    create_calls: AtomicUsize,
}

impl FakeReceipts {
    fn new() -> Self {
        Self {
            status_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl ReceiptApi for FakeReceipts {
    async fn get_receipt_status(
        &self,
        reference: &str,
    ) -> Result<ReceiptLookup, ReceiptClientError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ReceiptLookup::Fiscalized {
            receipt_id: Some(format!("rc-{}", reference)),
            direct_url: None,
            fiscal: Some(FiscalIds {
                fiscal_number: "9282000100".to_string(),
                fiscal_doc: "117".to_string(),
                fiscal_sign: "2968749264".to_string(),
            }),
        })
    }

    async fn create_receipt(
        &self,
        draft: &ReceiptDraft,
    ) -> Result<ReceiptCreated, ReceiptClientError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ReceiptCreated {
            receipt_id: Some(format!("rc-{}", draft.invoice_id)),
        })
    }

    async fn current_token_fingerprint(&self) -> Option<String> {
        None
    }
}

/// Payout provider stub reporting every task as a paid withdrawal
struct FakePayout {
    calls: AtomicUsize,
}

impl FakePayout {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl PayoutApi for FakePayout {
    async fn get_task(&self, _task_id: &str) -> Result<PayoutTask, PayoutError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PayoutTask {
            task_type: Some("withdrawal".to_string()),
            status: Some("paid".to_string()),
            paid_at: Some(1_700_000_000),
        })
    }
}

fn build_context(
    storage: Arc<dyn Storage>,
    receipts: Arc<FakeReceipts>,
    payout: Arc<FakePayout>,
    instance_id: &str,
) -> Arc<AppContext> {
    Arc::new(AppContext {
        config: Config::for_tests("unused"),
        storage: storage.clone(),
        ledger: Arc::new(SalesLedger::new(storage.clone())),
        lease: Arc::new(StorageLease::new(storage)),
        receipts,
        payout,
        events: Arc::new(EventBus::default()),
        instance_id: instance_id.to_string(),
    })
}

#[tokio::test]
async fn test_repair_resolves_and_settles() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let receipts = Arc::new(FakeReceipts::new());
    let payout = Arc::new(FakePayout::new());
    let ctx = build_context(storage, receipts.clone(), payout, "inst_a");

    let sale = ctx
        .ledger
        .create_sale(
            "freelancer",
            SaleDraft {
                amount_minor: 250_00,
                prepay_invoice_id: Some("inv-p-7".to_string()),
                full_invoice_id: Some("inv-f-7".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut events = ctx.events.subscribe("freelancer");

    let stats = repair_pass(&ctx).await.unwrap();
    assert_eq!(stats.scanned, 2);
    assert_eq!(stats.resolved, 2);
    assert_eq!(receipts.status_calls.load(Ordering::SeqCst), 2);

    let sale = ctx
        .ledger
        .get_sale("freelancer", sale.order_id)
        .await
        .unwrap()
        .unwrap();
    assert!(sale.receipts.prepay.is_resolved());
    assert!(sale.receipts.full.is_resolved());
    assert_eq!(
        sale.receipts.prepay.receipt_url.as_deref(),
        Some("https://check.ofd.ru/rec/9282000100/117/2968749264")
    );

    // Both resolutions were pushed to the live connection
    assert!(matches!(
        events.recv().await.unwrap(),
        UserEvent::ReceiptResolved { .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        UserEvent::ReceiptResolved { .. }
    ));

    // A settled ledger costs nothing: no further provider calls
    let stats = repair_pass(&ctx).await.unwrap();
    assert_eq!(stats.scanned, 0);
    assert_eq!(receipts.status_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_schedule_runs_due_offset_once() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let receipts = Arc::new(FakeReceipts::new());
    let payout = Arc::new(FakePayout::new());
    let ctx = build_context(storage, receipts.clone(), payout, "inst_a");

    let sale = ctx
        .ledger
        .create_sale(
            "freelancer",
            SaleDraft {
                amount_minor: 250_00,
                prepay_minor: 100_00,
                prepay_invoice_id: Some("inv-p-8".to_string()),
                offset_invoice_id: Some("inv-o-8".to_string()),
                offset_due_at: Some(now_ts() - 60),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    ctx.ledger
        .update_sale_by_order_id(
            "freelancer",
            sale.order_id,
            SalePatch::new().with_receipt_url(ReceiptKind::Prepay, "https://check.ofd.ru/rec/1/2/3"),
        )
        .await
        .unwrap();

    let stats = schedule_pass(&ctx).await.unwrap();
    assert_eq!(stats.resolved, 1);
    assert_eq!(receipts.create_calls.load(Ordering::SeqCst), 1);

    let sale = ctx
        .ledger
        .get_sale("freelancer", sale.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sale.receipts.offset.receipt_id.as_deref(), Some("rc-inv-o-8"));
    assert!(sale.receipts.offset.is_resolved());

    // Re-running is a no-op: the offset step is settled
    let stats = schedule_pass(&ctx).await.unwrap();
    assert_eq!(stats.scanned, 0);
    assert_eq!(receipts.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_withdrawal_poller_idempotent_across_instances() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let receipts = Arc::new(FakeReceipts::new());
    let payout = Arc::new(FakePayout::new());

    // Two app instances over the same storage
    let ctx_a = build_context(storage.clone(), receipts.clone(), payout.clone(), "inst_a");
    let ctx_b = build_context(storage.clone(), receipts, payout.clone(), "inst_b");

    ctx_a
        .ledger
        .ensure_withdrawal("freelancer", "task-77", 1_000_00)
        .await
        .unwrap();

    let outcome_a = refresh_withdrawal(&ctx_a, "freelancer", "task-77")
        .await
        .unwrap();
    assert!(outcome_a.done);
    assert_eq!(payout.calls.load(Ordering::SeqCst), 1);

    // The other instance sees the marker through shared storage and skips
    // the provider entirely
    let outcome_b = refresh_withdrawal(&ctx_b, "freelancer", "task-77")
        .await
        .unwrap();
    assert!(outcome_b.done);
    assert_eq!(outcome_b.paid_at, outcome_a.paid_at);
    assert_eq!(payout.calls.load(Ordering::SeqCst), 1);

    let audit = ctx_a
        .ledger
        .audit_log("freelancer", "task-77")
        .await
        .unwrap();
    assert_eq!(audit.len(), 2);
}

#[tokio::test]
async fn test_only_leader_instance_would_run_passes() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

    let lease_a = StorageLease::new(storage.clone());
    let lease_b = StorageLease::new(storage.clone());
    let now = now_ts();

    let grant_a = lease_a.try_acquire_or_renew("inst_a", now, 300).await.unwrap();
    let grant_b = lease_b.try_acquire_or_renew("inst_b", now, 300).await.unwrap();
    assert!(grant_a.is_leader);
    assert!(!grant_b.is_leader);

    // Renewal keeps the leader; the standby takes over only after expiry
    let grant_a = lease_a
        .try_acquire_or_renew("inst_a", now + 120, 300)
        .await
        .unwrap();
    assert!(grant_a.is_leader);

    let grant_b = lease_b
        .try_acquire_or_renew("inst_b", grant_a.expires_at, 300)
        .await
        .unwrap();
    assert!(grant_b.is_leader);
}
