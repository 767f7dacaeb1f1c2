//! Withdrawal Status Poller
//!
//! Request-triggered, not periodic. The persisted completion marker is
//! checked first and short-circuits the external call; completion is defined
//! strictly as `type == withdrawal && status == paid`. Concurrent callers for
//! one (user, task) converge on the same outcome regardless of which one wins
//! the marker write - the marker, not the remote response, is authoritative.

use super::client::PayoutApi;
use crate::common::{now_ts, PaydeskError};
use crate::context::AppContext;
use crate::events::UserEvent;
use crate::ledger::WithdrawalPatch;
use crate::logging::log_withdrawal_event;

/// Result of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalOutcome {
    /// Whether the withdrawal is complete
    pub done: bool,
    /// When it was paid, if known
    pub paid_at: Option<u64>,
}

/// Check a withdrawal's completion against the payout API.
///
/// Transient provider failures are surfaced to the synchronous caller; every
/// event appends one line to the per-withdrawal audit log.
pub async fn refresh_withdrawal(
    ctx: &AppContext,
    user_id: &str,
    task_id: &str,
) -> Result<WithdrawalOutcome, PaydeskError> {
    if user_id.is_empty() {
        return Err(PaydeskError::MissingParameter("user_id".to_string()));
    }
    if task_id.is_empty() {
        return Err(PaydeskError::MissingParameter("task_id".to_string()));
    }
    if ctx.ledger.get_withdrawal(user_id, task_id).await?.is_none() {
        return Err(PaydeskError::not_found(format!(
            "withdrawal {}/{}",
            user_id, task_id
        )));
    }

    // Marker first: once set it is terminal, no external call needed
    if ctx.ledger.completion_marker_exists(user_id, task_id).await? {
        let paid_at = ctx
            .ledger
            .get_withdrawal(user_id, task_id)
            .await?
            .and_then(|w| w.paid_at);
        ctx.ledger
            .append_audit(user_id, task_id, "status check: already completed (marker)")
            .await?;
        return Ok(WithdrawalOutcome {
            done: true,
            paid_at,
        });
    }

    let task = match ctx.payout.get_task(task_id).await {
        Ok(task) => task,
        Err(e) => {
            ctx.ledger
                .append_audit(
                    user_id,
                    task_id,
                    &format!("status check failed: {}", e),
                )
                .await?;
            log_withdrawal_event("status_check", user_id, task_id, false, Some(&e.to_string()));
            return Err(e.into());
        }
    };

    if !task.is_withdrawal_paid() {
        // The remote said "not complete", but a concurrent caller may have
        // completed meanwhile; the marker stays authoritative.
        if ctx.ledger.completion_marker_exists(user_id, task_id).await? {
            let paid_at = ctx
                .ledger
                .get_withdrawal(user_id, task_id)
                .await?
                .and_then(|w| w.paid_at);
            return Ok(WithdrawalOutcome {
                done: true,
                paid_at,
            });
        }

        ctx.ledger
            .append_audit(
                user_id,
                task_id,
                &format!(
                    "status check: not complete (type={}, status={})",
                    task.task_type.as_deref().unwrap_or("-"),
                    task.status.as_deref().unwrap_or("-")
                ),
            )
            .await?;
        return Ok(WithdrawalOutcome {
            done: false,
            paid_at: None,
        });
    }

    let paid_at = task.paid_at.unwrap_or_else(now_ts);

    // Marker before merge-patch; exactly one concurrent caller wins the write
    let won = ctx.ledger.set_completion_marker(user_id, task_id).await?;
    if won {
        ctx.ledger
            .update_withdrawal(user_id, task_id, WithdrawalPatch::paid(paid_at))
            .await?;
        ctx.ledger
            .append_audit(user_id, task_id, "payout confirmed paid, marker written")
            .await?;
        log_withdrawal_event("completed", user_id, task_id, true, None);
        ctx.events.publish(
            user_id,
            UserEvent::WithdrawalPaid {
                task_id: task_id.to_string(),
                paid_at,
            },
        );
    } else {
        ctx.ledger
            .append_audit(
                user_id,
                task_id,
                "payout confirmed paid, marker already present",
            )
            .await?;
    }

    let paid_at = ctx
        .ledger
        .get_withdrawal(user_id, task_id)
        .await?
        .and_then(|w| w.paid_at)
        .or(Some(paid_at));

    Ok(WithdrawalOutcome {
        done: true,
        paid_at,
    })
}
