//! Application Context
//!
//! Everything the workers and manual actions need, constructed once at
//! process start and passed explicitly - no module-level globals. Lifecycle
//! is tied to process start/stop.

use std::sync::Arc;

use crate::common::{now_ts, PaydeskError};
use crate::config::Config;
use crate::events::EventBus;
use crate::fiscal::{HttpReceiptClient, ReceiptApi};
use crate::lease::{LeaderLease, ProcessLease, StorageLease};
use crate::ledger::SalesLedger;
use crate::payout::{HttpPayoutClient, PayoutApi};
use crate::storage::{FsStorage, Storage};

/// Shared application context
pub struct AppContext {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub ledger: Arc<SalesLedger>,
    pub lease: Arc<dyn LeaderLease>,
    pub receipts: Arc<dyn ReceiptApi>,
    pub payout: Arc<dyn PayoutApi>,
    pub events: Arc<EventBus>,
    /// Identity of this process in leader election; stable for the process
    /// lifetime only
    pub instance_id: String,
}

impl AppContext {
    /// Build the production context from configuration
    pub fn from_config(config: Config) -> Result<Self, PaydeskError> {
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(config.storage_dir.clone()));
        let ledger = Arc::new(SalesLedger::new(storage.clone()));
        let lease: Arc<dyn LeaderLease> = if config.single_instance {
            Arc::new(ProcessLease::new())
        } else {
            Arc::new(StorageLease::new(storage.clone()))
        };

        let receipts: Arc<dyn ReceiptApi> = Arc::new(HttpReceiptClient::new(
            &config.fiscal_url,
            config.fiscal_login.clone(),
            config.fiscal_password.clone(),
            config.http_timeout_secs,
        )?);
        let payout: Arc<dyn PayoutApi> = Arc::new(HttpPayoutClient::new(
            &config.payout_url,
            &config.payout_login,
            &config.payout_key,
            config.http_timeout_secs,
        )?);

        let events = Arc::new(EventBus::default());
        let instance_id = format!("inst_{}_{:08x}", now_ts(), rand::random::<u32>());

        Ok(Self {
            config,
            storage,
            ledger,
            lease,
            receipts,
            payout,
            events,
            instance_id,
        })
    }
}

#[cfg(test)]
impl AppContext {
    /// Test context over in-memory storage with the given provider doubles
    pub fn for_tests_full(
        receipts: Arc<dyn ReceiptApi>,
        payout: Arc<dyn PayoutApi>,
    ) -> Self {
        let storage: Arc<dyn Storage> = Arc::new(crate::storage::MemoryStorage::new());
        let ledger = Arc::new(SalesLedger::new(storage.clone()));
        let lease: Arc<dyn LeaderLease> = Arc::new(StorageLease::new(storage.clone()));

        Self {
            config: Config::for_tests("unused"),
            storage,
            ledger,
            lease,
            receipts,
            payout,
            events: Arc::new(EventBus::default()),
            instance_id: "inst_test".to_string(),
        }
    }

    /// Test context where only the payout provider is exercised
    pub fn for_tests(payout: Arc<dyn PayoutApi>) -> Self {
        Self::for_tests_full(Arc::new(crate::fiscal::MockReceiptApi::new()), payout)
    }

    /// Test context where only the receipt provider is exercised
    pub fn for_tests_with_receipts(receipts: Arc<dyn ReceiptApi>) -> Self {
        Self::for_tests_full(receipts, Arc::new(crate::payout::MockPayoutApi::new()))
    }
}
