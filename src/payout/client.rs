//! Payout Provider HTTP Client

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Payout client errors
#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("payout task not found: {0}")]
    TaskNotFound(String),

    #[error("payout API authentication failed")]
    Unauthorized,

    #[error("payout API rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("payout API unavailable ({status})")]
    Unavailable { status: u16 },

    #[error("malformed payout response: {0}")]
    Malformed(String),
}

impl PayoutError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PayoutError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            PayoutError::Unavailable { .. } => true,
            _ => false,
        }
    }
}

/// Task state as reported by the payout API. Fields the provider has not
/// filled in yet are data, not errors.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PayoutTask {
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub paid_at: Option<u64>,
}

impl PayoutTask {
    /// Completion is strictly `type == withdrawal && status == paid`; no
    /// other field combination counts.
    pub fn is_withdrawal_paid(&self) -> bool {
        self.task_type.as_deref() == Some("withdrawal")
            && self.status.as_deref() == Some("paid")
    }
}

/// The seam the poller consumes; `HttpPayoutClient` is the production
/// implementation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayoutApi: Send + Sync {
    /// Get a payout task by id
    async fn get_task(&self, task_id: &str) -> Result<PayoutTask, PayoutError>;
}

/// HTTP client for the payout provider
pub struct HttpPayoutClient {
    http: Client,
    base_url: String,
    auth_header: String,
}

impl HttpPayoutClient {
    pub fn new(
        base_url: &str,
        login: &str,
        api_key: &str,
        timeout_secs: u64,
    ) -> Result<Self, PayoutError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        let credentials = BASE64.encode(format!("{}:{}", login, api_key));

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: format!("Basic {}", credentials),
        })
    }
}

#[async_trait]
impl PayoutApi for HttpPayoutClient {
    async fn get_task(&self, task_id: &str) -> Result<PayoutTask, PayoutError> {
        let url = format!("{}/v1/tasks/{}", self.base_url, task_id);
        let resp = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => {
                return Err(PayoutError::TaskNotFound(task_id.to_string()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(PayoutError::Unauthorized)
            }
            status if status.is_server_error() => {
                return Err(PayoutError::Unavailable {
                    status: status.as_u16(),
                })
            }
            status if !status.is_success() => {
                let body = resp.text().await.unwrap_or_default();
                return Err(PayoutError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }
            _ => {}
        }

        resp.json()
            .await
            .map_err(|e| PayoutError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_predicate_is_strict() {
        let paid = PayoutTask {
            task_type: Some("withdrawal".to_string()),
            status: Some("paid".to_string()),
            paid_at: Some(1_700_000_000),
        };
        assert!(paid.is_withdrawal_paid());

        // Wrong type
        let deposit = PayoutTask {
            task_type: Some("deposit".to_string()),
            status: Some("paid".to_string()),
            paid_at: None,
        };
        assert!(!deposit.is_withdrawal_paid());

        // Wrong status
        let processing = PayoutTask {
            task_type: Some("withdrawal".to_string()),
            status: Some("processing".to_string()),
            paid_at: None,
        };
        assert!(!processing.is_withdrawal_paid());

        // Missing fields never count as complete
        assert!(!PayoutTask::default().is_withdrawal_paid());
    }

    #[test]
    fn test_task_deserialization_tolerates_missing_fields() {
        let task: PayoutTask = serde_json::from_str("{}").unwrap();
        assert_eq!(task, PayoutTask::default());

        let task: PayoutTask =
            serde_json::from_str(r#"{"type":"withdrawal","status":"paid","paid_at":123}"#)
                .unwrap();
        assert!(task.is_withdrawal_paid());
        assert_eq!(task.paid_at, Some(123));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PayoutError::Unavailable { status: 503 }.is_retryable());
        assert!(!PayoutError::TaskNotFound("t".to_string()).is_retryable());
        assert!(!PayoutError::Unauthorized.is_retryable());
    }
}
