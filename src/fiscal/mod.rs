//! Fiscal Receipt Provider Client
//!
//! Thin protocol wrapper over the receipt provider's HTTP API: cached auth
//! token acquisition, receipt creation, receipt status queries, and the
//! deterministic receipt view URL built from the fiscal identifiers.

pub mod client;

pub use client::{
    build_receipt_view_url, token_fingerprint, FiscalIds, HttpReceiptClient, ReceiptApi,
    ReceiptClientError, ReceiptCreated, ReceiptDraft, ReceiptLookup, RECEIPT_VIEW_BASE,
};

#[cfg(test)]
pub use client::MockReceiptApi;
