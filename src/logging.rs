//! Structured Logging for the Paydesk Backend
//!
//! Provides production-ready structured logging with:
//! - JSON output for log aggregation services
//! - Correlation IDs tying log lines to a sale or withdrawal
//! - Receipt / withdrawal / worker event helpers
//!
//! Background passes never surface errors to users; everything they observe
//! about a failing pass comes through these events.

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

/// Event categories for structured logging
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Receipt reconciliation events
    Receipt,
    /// Withdrawal/payout events
    Withdrawal,
    /// Background worker pass events
    Worker,
    /// System events (startup, shutdown)
    System,
    /// Error events
    Error,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (ISO 8601)
    pub timestamp: String,
    /// Log level
    pub level: String,
    /// Event category
    pub category: EventCategory,
    /// Human-readable message
    pub message: String,
    /// Correlation ID (sale order, withdrawal task)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Additional structured data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEvent {
    /// Create a new log event
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: format!("{:?}", level).to_uppercase(),
            category,
            message: message.into(),
            correlation_id: None,
            data: None,
            error: None,
        }
    }

    /// Add correlation ID
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Add structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Add error details
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Serialize this event to JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }
}

// ============================================================================
// Event Helpers
// ============================================================================

/// Log a receipt reconciliation event
pub fn log_receipt_event(
    event_type: &str,
    user_id: &str,
    order_id: u64,
    kind: &str,
    success: bool,
    error: Option<&str>,
) {
    let level = if success { LogLevel::Info } else { LogLevel::Warn };
    let mut event = LogEvent::new(level, EventCategory::Receipt, event_type)
        .with_correlation_id(format!("{}/{}", user_id, order_id))
        .with_data(serde_json::json!({
            "user_id": user_id,
            "order_id": order_id,
            "kind": kind,
            "success": success
        }));

    if let Some(err) = error {
        event = event.with_error(err);
    }

    if success {
        tracing::info!(target: "paydesk::receipt", "{}", event.to_json());
    } else {
        tracing::warn!(target: "paydesk::receipt", "{}", event.to_json());
    }
}

/// Log a withdrawal event
pub fn log_withdrawal_event(
    event_type: &str,
    user_id: &str,
    task_id: &str,
    success: bool,
    error: Option<&str>,
) {
    let level = if success { LogLevel::Info } else { LogLevel::Error };
    let mut event = LogEvent::new(level, EventCategory::Withdrawal, event_type)
        .with_correlation_id(task_id)
        .with_data(serde_json::json!({
            "user_id": user_id,
            "task_id": task_id,
            "success": success
        }));

    if let Some(err) = error {
        event = event.with_error(err);
    }

    if success {
        tracing::info!(target: "paydesk::withdrawal", "{}", event.to_json());
    } else {
        tracing::error!(target: "paydesk::withdrawal", "{}", event.to_json());
    }
}

/// Log a worker pass summary
pub fn log_worker_pass(worker: &str, scanned: usize, resolved: usize, failures: usize) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::Worker, "pass complete")
        .with_data(serde_json::json!({
            "worker": worker,
            "scanned": scanned,
            "resolved": resolved,
            "failures": failures
        }));

    tracing::info!(target: "paydesk::worker", "{}", event.to_json());
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Minimum log level to output
/// * `json_format` - Use JSON format (recommended for production)
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let level_str = format!("{:?}", level).to_lowercase();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("paydesk={},axum={}", level_str, level_str)));

    if json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from Config
pub fn init_from_config(config: &crate::config::Config) -> Result<(), LoggingError> {
    let level = LogLevel::from(config.log_level.as_str());
    init_logging(level, config.profile.json_logs())
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_serialization() {
        let event = LogEvent::new(LogLevel::Info, EventCategory::Receipt, "Receipt resolved")
            .with_correlation_id("user1/100")
            .with_data(serde_json::json!({"kind": "prepay"}));

        let json = event.to_json();
        assert!(json.contains("Receipt resolved"));
        assert!(json.contains("user1/100"));
        assert!(json.contains("prepay"));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("unknown"), LogLevel::Info);
    }
}
