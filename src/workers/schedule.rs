//! Schedule Worker
//!
//! Executes the time-due deferred "offset" step of a prepay → offset → full
//! chain. "Due" is a pure function of (now, sale state) - a sale is due once
//! its prepay receipt is resolved, its offset receipt is not, and the derived
//! due time has passed. There is no durable job queue; a missed run is
//! retried automatically by the next pass.

use std::sync::Arc;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

use super::repair::apply_lookup;
use super::{acquire_leadership, PassStats, WorkerError};
use crate::common::now_ts;
use crate::context::AppContext;
use crate::fiscal::{ReceiptApi, ReceiptDraft};
use crate::ledger::{ReceiptKind, SalePatch, SaleRecord};
use crate::logging::log_worker_pass;

/// Outcome of the manual "run due jobs now" trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// This instance held the lease and ran the pass
    Ran(PassStats),
    /// Another instance holds the lease; nothing was run
    NotLeader,
}

/// Background schedule worker
pub struct ScheduleWorker {
    ctx: Arc<AppContext>,
    cancel: CancellationToken,
}

impl ScheduleWorker {
    pub fn new(ctx: Arc<AppContext>, cancel: CancellationToken) -> Self {
        Self { ctx, cancel }
    }

    /// Run until cancelled. Every tick renews the lease; non-leaders no-op.
    pub async fn run(self) {
        tracing::info!(
            target: "paydesk::worker",
            interval_secs = self.ctx.config.schedule_interval_secs,
            "schedule worker started"
        );

        let mut ticker = interval(Duration::from_secs(self.ctx.config.schedule_interval_secs));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(target: "paydesk::worker", "schedule worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match acquire_leadership(&self.ctx).await {
                        Ok(true) => match schedule_pass(&self.ctx).await {
                            Ok(stats) => {
                                log_worker_pass("schedule", stats.scanned, stats.resolved, stats.failures);
                            }
                            Err(e) => {
                                tracing::warn!(target: "paydesk::worker", error = %e, "schedule pass failed");
                            }
                        },
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(target: "paydesk::worker", error = %e, "lease check failed");
                        }
                    }
                }
            }
        }
    }
}

/// One schedule pass: execute every due offset job
pub async fn schedule_pass(ctx: &Arc<AppContext>) -> Result<PassStats, WorkerError> {
    let now = now_ts();
    let mut stats = PassStats::default();

    for user_id in ctx.ledger.list_users().await? {
        for sale in ctx.ledger.list_sales(&user_id).await? {
            if !sale.is_offset_due(now) {
                continue;
            }
            stats.scanned += 1;

            match execute_offset(ctx, &user_id, sale.order_id, now).await {
                Ok(true) => stats.resolved += 1,
                Ok(false) => {}
                Err(e) => {
                    stats.failures += 1;
                    tracing::warn!(
                        target: "paydesk::worker",
                        user = %user_id,
                        order = sale.order_id,
                        error = %e,
                        "offset job failed"
                    );
                }
            }
        }
    }

    Ok(stats)
}

/// Manual "run due jobs now" trigger. The normal lease gate applies;
/// errors surface to the synchronous caller.
pub async fn run_due_jobs_now(ctx: &Arc<AppContext>) -> Result<ScheduleOutcome, WorkerError> {
    if !acquire_leadership(ctx).await? {
        return Ok(ScheduleOutcome::NotLeader);
    }
    Ok(ScheduleOutcome::Ran(schedule_pass(ctx).await?))
}

/// Execute the offset fiscalization for one sale.
///
/// Re-reads the sale first: when a periodic pass and a manual trigger race on
/// the same due sale, the loser observes the winner's merge-patch here and
/// becomes a no-op. The provider call itself is idempotent by invoice id.
async fn execute_offset(
    ctx: &AppContext,
    user_id: &str,
    order_id: u64,
    now: u64,
) -> Result<bool, WorkerError> {
    let sale = ctx
        .ledger
        .get_sale(user_id, order_id)
        .await?
        .ok_or_else(|| WorkerError::NotFound(format!("sale {}/{}", user_id, order_id)))?;

    if !sale.is_offset_due(now) {
        return Ok(false);
    }

    let offset = &sale.receipts.offset;
    let Some(invoice_id) = offset.invoice_id.clone() else {
        tracing::warn!(
            target: "paydesk::worker",
            user = %user_id,
            order = order_id,
            "offset due but no offset invoice id, skipping"
        );
        return Ok(false);
    };

    let receipt_id = match offset.receipt_id.clone() {
        Some(receipt_id) => receipt_id,
        None => {
            let created = ctx
                .receipts
                .create_receipt(&offset_draft(&sale, &invoice_id))
                .await?;

            if let Some(receipt_id) = created.receipt_id.clone() {
                ctx.ledger
                    .update_sale_by_order_id(
                        user_id,
                        order_id,
                        SalePatch::new().with_receipt_id(ReceiptKind::Offset, receipt_id),
                    )
                    .await?;
            }
            created.receipt_id.unwrap_or(invoice_id)
        }
    };

    // One status lookup so the URL lands in the same pass when the provider
    // already has the fiscal data
    let lookup = ctx.receipts.get_receipt_status(&receipt_id).await?;
    apply_lookup(ctx, user_id, order_id, ReceiptKind::Offset, lookup).await
}

fn offset_draft(sale: &SaleRecord, invoice_id: &str) -> ReceiptDraft {
    ReceiptDraft {
        invoice_id: invoice_id.to_string(),
        amount_minor: sale.prepay_minor,
        description: format!("Offset of prepayment for order #{}", sale.order_id),
        offset_of: sale.receipts.prepay.invoice_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiscal::{FiscalIds, MockReceiptApi, ReceiptCreated, ReceiptLookup};
    use crate::lease::LeaderLease;
    use crate::ledger::SaleDraft;

    fn fiscalized() -> ReceiptLookup {
        ReceiptLookup::Fiscalized {
            receipt_id: Some("rc-off".to_string()),
            direct_url: None,
            fiscal: Some(FiscalIds {
                fiscal_number: "321".to_string(),
                fiscal_doc: "54".to_string(),
                fiscal_sign: "9876".to_string(),
            }),
        }
    }

    /// A sale with prepay resolved and the offset step due in the past
    async fn seed_due_sale(ctx: &AppContext, due_at: u64) -> u64 {
        let sale = ctx
            .ledger
            .create_sale(
                "user1",
                SaleDraft {
                    amount_minor: 150_00,
                    prepay_minor: 50_00,
                    prepay_invoice_id: Some("inv-p".to_string()),
                    offset_invoice_id: Some("inv-o".to_string()),
                    offset_due_at: Some(due_at),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        ctx.ledger
            .update_sale_by_order_id(
                "user1",
                sale.order_id,
                SalePatch::new()
                    .with_receipt_id(ReceiptKind::Prepay, "rc-p")
                    .with_receipt_url(ReceiptKind::Prepay, "https://check.ofd.ru/rec/1/2/3"),
            )
            .await
            .unwrap();
        sale.order_id
    }

    #[tokio::test]
    async fn test_due_offset_resolves_in_one_pass_second_pass_noop() {
        let mut receipts = MockReceiptApi::new();
        receipts
            .expect_create_receipt()
            .times(1)
            .withf(|draft| draft.invoice_id == "inv-o" && draft.offset_of.as_deref() == Some("inv-p"))
            .returning(|_| {
                Ok(ReceiptCreated {
                    receipt_id: Some("rc-off".to_string()),
                })
            });
        receipts
            .expect_get_receipt_status()
            .times(1)
            .withf(|reference| reference == "rc-off")
            .returning(|_| Ok(fiscalized()));
        receipts
            .expect_current_token_fingerprint()
            .returning(|| None);
        let ctx = Arc::new(AppContext::for_tests_with_receipts(Arc::new(receipts)));

        // Due one hour in the past
        let order_id = seed_due_sale(&ctx, now_ts() - 3600).await;

        let stats = schedule_pass(&ctx).await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.resolved, 1);

        let sale = ctx.ledger.get_sale("user1", order_id).await.unwrap().unwrap();
        assert_eq!(sale.receipts.offset.receipt_id.as_deref(), Some("rc-off"));
        assert_eq!(
            sale.receipts.offset.receipt_url.as_deref(),
            Some("https://check.ofd.ru/rec/321/54/9876")
        );

        // Immediately after: not due anymore, zero provider calls (the mock
        // expectations above are exhausted)
        let stats = schedule_pass(&ctx).await.unwrap();
        assert_eq!(stats, PassStats::default());
    }

    #[tokio::test]
    async fn test_not_due_until_due_time_passes() {
        let mut receipts = MockReceiptApi::new();
        receipts.expect_create_receipt().times(0);
        receipts.expect_get_receipt_status().times(0);
        let ctx = Arc::new(AppContext::for_tests_with_receipts(Arc::new(receipts)));

        seed_due_sale(&ctx, now_ts() + 3600).await;

        let stats = schedule_pass(&ctx).await.unwrap();
        assert_eq!(stats, PassStats::default());
    }

    #[tokio::test]
    async fn test_unresolved_prepay_not_due() {
        let mut receipts = MockReceiptApi::new();
        receipts.expect_create_receipt().times(0);
        receipts.expect_get_receipt_status().times(0);
        let ctx = Arc::new(AppContext::for_tests_with_receipts(Arc::new(receipts)));

        // Due time long past, but the prepay receipt never resolved
        ctx.ledger
            .create_sale(
                "user1",
                SaleDraft {
                    prepay_invoice_id: Some("inv-p".to_string()),
                    offset_invoice_id: Some("inv-o".to_string()),
                    offset_due_at: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stats = schedule_pass(&ctx).await.unwrap();
        assert_eq!(stats.scanned, 0);
    }

    #[tokio::test]
    async fn test_concurrent_passes_converge() {
        let mut receipts = MockReceiptApi::new();
        // Truly simultaneous invocations may both reach the provider; the
        // calls are idempotent by invoice id and the merge converges.
        receipts
            .expect_create_receipt()
            .times(1..=2)
            .returning(|_| {
                Ok(ReceiptCreated {
                    receipt_id: Some("rc-off".to_string()),
                })
            });
        receipts
            .expect_get_receipt_status()
            .times(1..=2)
            .returning(|_| Ok(fiscalized()));
        receipts
            .expect_current_token_fingerprint()
            .returning(|| None);
        let ctx = Arc::new(AppContext::for_tests_with_receipts(Arc::new(receipts)));

        let order_id = seed_due_sale(&ctx, now_ts() - 3600).await;

        let a = {
            let ctx = ctx.clone();
            tokio::spawn(async move { schedule_pass(&ctx).await.unwrap() })
        };
        let b = {
            let ctx = ctx.clone();
            tokio::spawn(async move { schedule_pass(&ctx).await.unwrap() })
        };
        a.await.unwrap();
        b.await.unwrap();

        let sale = ctx.ledger.get_sale("user1", order_id).await.unwrap().unwrap();
        assert_eq!(sale.receipts.offset.receipt_id.as_deref(), Some("rc-off"));
        assert!(sale.receipts.offset.is_resolved());
    }

    #[tokio::test]
    async fn test_manual_trigger_respects_lease_gate() {
        let mut receipts = MockReceiptApi::new();
        receipts.expect_create_receipt().times(0);
        receipts.expect_get_receipt_status().times(0);
        let ctx = Arc::new(AppContext::for_tests_with_receipts(Arc::new(receipts)));

        // Another instance holds the lease
        ctx.lease
            .try_acquire_or_renew("inst_other", now_ts(), 300)
            .await
            .unwrap();

        let outcome = run_due_jobs_now(&ctx).await.unwrap();
        assert_eq!(outcome, ScheduleOutcome::NotLeader);
    }

    #[tokio::test]
    async fn test_manual_trigger_runs_when_leader() {
        let mut receipts = MockReceiptApi::new();
        receipts.expect_create_receipt().times(0);
        receipts.expect_get_receipt_status().times(0);
        let ctx = Arc::new(AppContext::for_tests_with_receipts(Arc::new(receipts)));

        let outcome = run_due_jobs_now(&ctx).await.unwrap();
        assert_eq!(outcome, ScheduleOutcome::Ran(PassStats::default()));
    }
}
