//! Repair Worker
//!
//! Periodic leader-gated scan resolving unresolved receipts. Per sale and
//! receipt kind the state machine is: absent → (query provider) → id-known |
//! resolved. Already-resolved kinds are skipped before any provider call, so
//! re-running over a settled ledger is free. Transient failures leave state
//! unchanged and are retried implicitly by the next pass - there is no
//! attempt counter.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

use super::{acquire_leadership, PassStats, WorkerError};
use crate::context::AppContext;
use crate::events::UserEvent;
use crate::fiscal::{ReceiptApi, ReceiptLookup};
use crate::ledger::{ReceiptKind, ReceiptState, SalePatch};
use crate::logging::{log_receipt_event, log_worker_pass};

/// Background repair worker
pub struct RepairWorker {
    ctx: Arc<AppContext>,
    cancel: CancellationToken,
}

impl RepairWorker {
    pub fn new(ctx: Arc<AppContext>, cancel: CancellationToken) -> Self {
        Self { ctx, cancel }
    }

    /// Run until cancelled. Every tick renews the lease; non-leaders no-op.
    pub async fn run(self) {
        tracing::info!(
            target: "paydesk::worker",
            interval_secs = self.ctx.config.repair_interval_secs,
            "repair worker started"
        );

        let mut ticker = interval(Duration::from_secs(self.ctx.config.repair_interval_secs));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(target: "paydesk::worker", "repair worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match acquire_leadership(&self.ctx).await {
                        Ok(true) => match repair_pass(&self.ctx).await {
                            Ok(stats) => {
                                log_worker_pass("repair", stats.scanned, stats.resolved, stats.failures);
                            }
                            Err(e) => {
                                tracing::warn!(target: "paydesk::worker", error = %e, "repair pass failed");
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

/// One repair pass over every user's sales.
///
/// Candidates are unresolved receipt kinds with a known receipt id or a
/// resolvable invoice id; they are queried concurrently under the configured
/// cap - the scarce resource is the provider API, not CPU.
pub async fn repair_pass(ctx: &Arc<AppContext>) -> Result<PassStats, WorkerError> {
    let mut stats = PassStats::default();
    let semaphore = Arc::new(Semaphore::new(ctx.config.pass_concurrency));
    let mut tasks = JoinSet::new();

    for user_id in ctx.ledger.list_users().await? {
        for sale in ctx.ledger.list_sales(&user_id).await? {
            for kind in ReceiptKind::all() {
                let slot = sale.receipts.slot(kind);
                if slot.is_resolved() || !slot.has_reference() {
                    continue;
                }
                stats.scanned += 1;

                let ctx = ctx.clone();
                let semaphore = semaphore.clone();
                let user_id = user_id.clone();
                let order_id = sale.order_id;
                let reference = slot
                    .provider_reference()
                    .map(|r| r.to_string())
                    .unwrap_or_default();

                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    resolve_receipt_kind(&ctx, &user_id, order_id, &reference, kind).await
                });
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(true)) => stats.resolved += 1,
            Ok(Ok(false)) => {}
            Ok(Err(e)) => {
                stats.failures += 1;
                tracing::warn!(target: "paydesk::worker", error = %e, "receipt resolution failed");
            }
            Err(e) => {
                stats.failures += 1;
                tracing::warn!(target: "paydesk::worker", error = %e, "receipt task panicked");
            }
        }
    }

    Ok(stats)
}

/// Query the provider for one receipt kind and merge-patch the outcome.
/// Returns whether the kind reached its public URL.
pub(crate) async fn resolve_receipt_kind(
    ctx: &AppContext,
    user_id: &str,
    order_id: u64,
    reference: &str,
    kind: ReceiptKind,
) -> Result<bool, WorkerError> {
    let lookup = ctx.receipts.get_receipt_status(reference).await?;
    apply_lookup(ctx, user_id, order_id, kind, lookup).await
}

/// Merge-patch a lookup outcome into the ledger, through the same path every
/// other writer uses
pub(crate) async fn apply_lookup(
    ctx: &AppContext,
    user_id: &str,
    order_id: u64,
    kind: ReceiptKind,
    lookup: ReceiptLookup,
) -> Result<bool, WorkerError> {
    let url = lookup.resolved_url();

    let mut patch = SalePatch::new();
    match lookup {
        ReceiptLookup::NotReady => return Ok(false),
        ReceiptLookup::Registered { receipt_id } => {
            patch = patch.with_receipt_id(kind, receipt_id);
        }
        ReceiptLookup::Fiscalized { receipt_id, .. } => {
            if let Some(receipt_id) = receipt_id {
                patch = patch.with_receipt_id(kind, receipt_id);
            }
            if let Some(url) = &url {
                patch = patch.with_receipt_url(kind, url.clone());
            }
        }
    }

    if let Some(fp) = ctx.receipts.current_token_fingerprint().await {
        patch = patch.with_token_fp(fp);
    }

    ctx.ledger
        .update_sale_by_order_id(user_id, order_id, patch)
        .await?;

    match url {
        Some(url) => {
            log_receipt_event("resolved", user_id, order_id, kind.as_str(), true, None);
            ctx.events.publish(
                user_id,
                UserEvent::ReceiptResolved {
                    order_id,
                    kind: kind.as_str().to_string(),
                    url,
                },
            );
            Ok(true)
        }
        None => {
            log_receipt_event("id_assigned", user_id, order_id, kind.as_str(), true, None);
            Ok(false)
        }
    }
}

/// Manual single-sale resync: an explicit operator action that bypasses the
/// lease gate but uses the identical merge-patch path. Synchronous result.
pub async fn resync_sale(
    ctx: &AppContext,
    user_id: &str,
    order_id: u64,
    kind: ReceiptKind,
) -> Result<ReceiptState, WorkerError> {
    let sale = ctx
        .ledger
        .get_sale(user_id, order_id)
        .await?
        .ok_or_else(|| WorkerError::NotFound(format!("sale {}/{}", user_id, order_id)))?;

    let slot = sale.receipts.slot(kind);
    if slot.is_resolved() {
        return Ok(ReceiptState::Resolved);
    }
    let Some(reference) = slot.provider_reference().map(|r| r.to_string()) else {
        return Ok(slot.state());
    };

    resolve_receipt_kind(ctx, user_id, order_id, &reference, kind).await?;

    let sale = ctx
        .ledger
        .get_sale(user_id, order_id)
        .await?
        .ok_or_else(|| WorkerError::NotFound(format!("sale {}/{}", user_id, order_id)))?;
    Ok(sale.receipts.slot(kind).state())
}
