//! Payout Provider Client and Withdrawal Status Poller
//!
//! The payout provider is eventually consistent: a withdrawal's completion is
//! learned by polling its task status after the triggering request has long
//! returned. The poller is request-triggered and idempotent - once the
//! completion marker is set, it never calls the provider again.

pub mod client;
pub mod poller;

pub use client::{HttpPayoutClient, PayoutApi, PayoutError, PayoutTask};
pub use poller::{refresh_withdrawal, WithdrawalOutcome};

#[cfg(test)]
pub use client::MockPayoutApi;
