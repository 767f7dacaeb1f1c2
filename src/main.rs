//! Paydesk Backend - Service Launcher
//!
//! Run modes:
//!   paydesk worker                - Start the background reconciliation workers
//!   paydesk reindex               - Rebuild the ledger's secondary indexes
//!   paydesk resync ...            - Resync one sale's receipt kind (admin)
//!   paydesk refresh ...           - Refresh one withdrawal's payout status (admin)

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use paydesk::workers::{RepairWorker, ScheduleWorker};
use paydesk::{
    money, refresh_withdrawal, resync_sale, run_due_jobs_now, AppContext, Config, PaydeskError,
    ReceiptKind, ScheduleOutcome,
};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let result = match args[1].as_str() {
        "worker" => run_workers().await,
        "reindex" => run_reindex().await,
        "run-jobs" => run_due_jobs().await,
        "resync" => run_resync(&args[2..]).await,
        "refresh" => run_refresh(&args[2..]).await,
        "help" | "--help" | "-h" => {
            print_usage();
            return;
        }
        _ => {
            print_usage();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error [{}]: {}", e.error_code(), e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Paydesk Backend - Fiscal Receipt Reconciliation");
    println!();
    println!("Usage:");
    println!("  paydesk worker                                    Start repair + schedule workers");
    println!("  paydesk reindex                                   Rebuild secondary indexes");
    println!("  paydesk run-jobs                                  Run due schedule jobs now (lease gate applies)");
    println!("  paydesk resync --user <id> --order <n> --kind <k> Resync one receipt (kind: prepay|offset|full)");
    println!("  paydesk refresh --user <id> --task <id>           Refresh withdrawal payout status");
    println!();
    println!("Environment Variables:");
    println!("  PAYDESK_PROFILE          production | staging | development");
    println!("  PAYDESK_STORAGE_DIR      Shared storage root (default: data)");
    println!("  PAYDESK_FISCAL_URL       Receipt provider API base URL");
    println!("  PAYDESK_FISCAL_LOGIN     Receipt provider login");
    println!("  PAYDESK_FISCAL_PASSWORD  Receipt provider password");
    println!("  PAYDESK_PAYOUT_URL       Payout API base URL");
    println!("  PAYDESK_PAYOUT_LOGIN     Payout API login");
    println!("  PAYDESK_PAYOUT_KEY       Payout API key");
    println!("  PAYDESK_LOG_LEVEL        debug | info | warn | error");
}

fn build_context() -> Result<Arc<AppContext>, PaydeskError> {
    let config = Config::from_env()?;
    paydesk::logging::init_from_config(&config)?;
    Ok(Arc::new(AppContext::from_config(config)?))
}

/// Start both background workers; Ctrl+C cancels the loops and waits for the
/// in-flight pass to finish.
async fn run_workers() -> Result<(), PaydeskError> {
    let ctx = build_context()?;

    println!("=== Paydesk Reconciliation Workers ===");
    println!();
    println!("Configuration:");
    println!("  Instance: {}", ctx.instance_id);
    println!("  Storage: {}", ctx.config.storage_dir);
    println!("  Repair Interval: {} seconds", ctx.config.repair_interval_secs);
    println!("  Schedule Interval: {} seconds", ctx.config.schedule_interval_secs);
    println!("  Lease TTL: {} seconds", ctx.config.lease_ttl_secs);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let cancel = CancellationToken::new();
    let repair = tokio::spawn(RepairWorker::new(ctx.clone(), cancel.clone()).run());
    let schedule = tokio::spawn(ScheduleWorker::new(ctx.clone(), cancel.clone()).run());

    tokio::signal::ctrl_c().await.ok();
    println!("Shutting down...");
    cancel.cancel();

    let _ = repair.await;
    let _ = schedule.await;
    Ok(())
}

/// Administrative repair: rebuild the derived indexes from the primary records
async fn run_reindex() -> Result<(), PaydeskError> {
    let ctx = build_context()?;

    let report = ctx.ledger.rebuild_indexes_from_primary().await?;
    println!("Index rebuild complete: {}", report);
    Ok(())
}

/// Admin trigger: run due schedule jobs immediately
async fn run_due_jobs() -> Result<(), PaydeskError> {
    let ctx = build_context()?;

    match run_due_jobs_now(&ctx).await? {
        ScheduleOutcome::Ran(stats) => println!("Schedule pass complete: {}", stats),
        ScheduleOutcome::NotLeader => {
            println!("Another instance holds the worker lease; nothing run")
        }
    }
    Ok(())
}

/// Admin resync of one sale's receipt kind; bypasses the lease gate
async fn run_resync(args: &[String]) -> Result<(), PaydeskError> {
    let user_id = flag_value(args, "--user")
        .ok_or_else(|| PaydeskError::MissingParameter("--user".to_string()))?;
    let order_id: u64 = flag_value(args, "--order")
        .ok_or_else(|| PaydeskError::MissingParameter("--order".to_string()))?
        .parse()
        .map_err(|_| PaydeskError::validation("--order must be a number"))?;
    let kind: ReceiptKind = flag_value(args, "--kind")
        .ok_or_else(|| PaydeskError::MissingParameter("--kind".to_string()))?
        .parse()
        .map_err(PaydeskError::Validation)?;

    let ctx = build_context()?;

    let state = resync_sale(&ctx, &user_id, order_id, kind).await?;
    println!("Sale {}/{} {} receipt: {}", user_id, order_id, kind, state);
    Ok(())
}

/// Admin refresh of one withdrawal's payout status
async fn run_refresh(args: &[String]) -> Result<(), PaydeskError> {
    let user_id = flag_value(args, "--user")
        .ok_or_else(|| PaydeskError::MissingParameter("--user".to_string()))?;
    let task_id = flag_value(args, "--task")
        .ok_or_else(|| PaydeskError::MissingParameter("--task".to_string()))?;

    let ctx = build_context()?;

    let withdrawal = ctx.ledger.get_withdrawal(&user_id, &task_id).await?;
    let outcome = refresh_withdrawal(&ctx, &user_id, &task_id).await?;

    if outcome.done {
        println!("Withdrawal {} is paid", task_id);
        if let Some(record) = withdrawal {
            println!("  Amount: {}", money::format_minor(record.amount_minor));
        }
        if let Some(paid_at) = outcome.paid_at {
            println!("  Paid at: {}", paid_at);
        }
    } else {
        println!("Withdrawal {} is still pending", task_id);
    }
    Ok(())
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
