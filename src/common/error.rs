//! Common Error Types for the Paydesk Backend
//!
//! Provides unified error handling across all modules. Periodic workers log
//! and continue; synchronous (manual-trigger) callers get structured error
//! codes from this type.

use thiserror::Error;

/// Root error type for the paydesk backend
#[derive(Debug, Error)]
pub enum PaydeskError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// Sales ledger errors
    #[error("ledger error: {0}")]
    Ledger(#[from] crate::ledger::LedgerError),

    /// Leader lease errors
    #[error("lease error: {0}")]
    Lease(#[from] crate::lease::LeaseError),

    /// Fiscal receipt provider errors
    #[error("receipt provider error: {0}")]
    Receipt(#[from] crate::fiscal::ReceiptClientError),

    /// Payout provider errors
    #[error("payout provider error: {0}")]
    Payout(#[from] crate::payout::PayoutError),

    /// Worker pass errors
    #[error("worker error: {0}")]
    Worker(#[from] crate::workers::WorkerError),

    /// A required request parameter was missing
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    /// Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller is not allowed to perform the action
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PaydeskError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a retryable error
    ///
    /// Retryable failures are silent to periodic passes (the next pass picks
    /// the record up again); synchronous callers may choose to retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            PaydeskError::Storage(_) | PaydeskError::Io(_) => true,
            PaydeskError::Receipt(e) => e.is_retryable(),
            PaydeskError::Payout(e) => e.is_retryable(),
            PaydeskError::Worker(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            PaydeskError::Config(_) => "CONFIG_ERROR",
            PaydeskError::Logging(_) => "LOGGING_ERROR",
            PaydeskError::Storage(_) => "STORAGE_ERROR",
            PaydeskError::Ledger(_) => "LEDGER_ERROR",
            PaydeskError::Lease(_) => "LEASE_ERROR",
            PaydeskError::Receipt(_) => "RECEIPT_PROVIDER_ERROR",
            PaydeskError::Payout(_) => "PAYOUT_PROVIDER_ERROR",
            PaydeskError::Worker(_) => "WORKER_ERROR",
            PaydeskError::MissingParameter(_) => "MISSING_PARAMETER",
            PaydeskError::Validation(_) => "VALIDATION_ERROR",
            PaydeskError::NotFound(_) => "NOT_FOUND",
            PaydeskError::Forbidden(_) => "FORBIDDEN",
            PaydeskError::Internal(_) => "INTERNAL_ERROR",
            PaydeskError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using PaydeskError
pub type Result<T> = std::result::Result<T, PaydeskError>;
