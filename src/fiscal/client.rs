//! Receipt Provider HTTP Client
//!
//! Talks to the fiscal provider's API. Fiscalization is eventually
//! consistent: a receipt queried right after creation routinely comes back
//! with fields missing, which is the normal `NotReady` outcome here, not an
//! error. The repair pass revisits such receipts until they resolve.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::common::now_ts;

/// Base of the public receipt view service
pub const RECEIPT_VIEW_BASE: &str = "https://check.ofd.ru/rec";

/// Safety margin subtracted from a token's lifetime before it counts as
/// expired
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 30;

/// Receipt client errors
#[derive(Debug, Error)]
pub enum ReceiptClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider authentication failed")]
    Unauthorized,

    #[error("provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("provider unavailable ({status})")]
    Unavailable { status: u16 },

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ReceiptClientError {
    /// Network problems and provider 5xx are retried by the next pass;
    /// rejected content is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReceiptClientError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_request()
            }
            ReceiptClientError::Unavailable { .. } => true,
            ReceiptClientError::Unauthorized
            | ReceiptClientError::Rejected { .. }
            | ReceiptClientError::Malformed(_) => false,
        }
    }
}

/// The fiscal identifier triple printed on every receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiscalIds {
    /// Fiscal storage number (fn)
    pub fiscal_number: String,
    /// Fiscal document number (fd)
    pub fiscal_doc: String,
    /// Fiscal document signature (fp)
    pub fiscal_sign: String,
}

/// Build the public receipt view URL from the fiscal identifier triple.
///
/// Pure string construction following the provider's documented format; used
/// whenever the provider returns no direct URL.
pub fn build_receipt_view_url(fiscal_number: &str, fiscal_doc: &str, fiscal_sign: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        RECEIPT_VIEW_BASE, fiscal_number, fiscal_doc, fiscal_sign
    )
}

/// Short stable fingerprint of an auth token, recorded on sales so support
/// can tell which credential produced a receipt without logging the token
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..8])
}

/// Outcome of a receipt status query
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptLookup {
    /// The provider has nothing usable yet; revisit next pass
    NotReady,
    /// A receipt id exists but no fiscal data yet
    Registered { receipt_id: String },
    /// Fiscalized: a view URL is known directly or derivable
    Fiscalized {
        receipt_id: Option<String>,
        direct_url: Option<String>,
        fiscal: Option<FiscalIds>,
    },
}

impl ReceiptLookup {
    /// The public receipt URL: the provider's own if present, otherwise
    /// built from the fiscal triple
    pub fn resolved_url(&self) -> Option<String> {
        match self {
            ReceiptLookup::Fiscalized {
                direct_url, fiscal, ..
            } => direct_url.clone().or_else(|| {
                fiscal.as_ref().map(|ids| {
                    build_receipt_view_url(
                        &ids.fiscal_number,
                        &ids.fiscal_doc,
                        &ids.fiscal_sign,
                    )
                })
            }),
            _ => None,
        }
    }
}

/// Payload for creating a receipt. The invoice id doubles as the
/// provider-side idempotency key, so re-sending a draft is safe.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptDraft {
    pub invoice_id: String,
    pub amount_minor: u64,
    pub description: String,
    /// Invoice id of the prepayment this receipt offsets, for the deferred
    /// offset step of a prepay chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_of: Option<String>,
}

/// Provider acknowledgment of a receipt creation
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptCreated {
    pub receipt_id: Option<String>,
}

/// The seam the workers consume; `HttpReceiptClient` is the production
/// implementation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReceiptApi: Send + Sync {
    /// Query receipt status by receipt id or invoice id
    async fn get_receipt_status(
        &self,
        reference: &str,
    ) -> Result<ReceiptLookup, ReceiptClientError>;

    /// Create a receipt at the provider
    async fn create_receipt(
        &self,
        draft: &ReceiptDraft,
    ) -> Result<ReceiptCreated, ReceiptClientError>;

    /// Fingerprint of the auth token currently in use, if one is cached
    async fn current_token_fingerprint(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: u64,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Raw fields of a receipt status response; everything optional because the
/// provider fills them in as fiscalization progresses
#[derive(Debug, Default, Deserialize)]
struct ReceiptStatusBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "fn")]
    fiscal_number: Option<String>,
    #[serde(default, rename = "fd")]
    fiscal_doc: Option<String>,
    #[serde(default, rename = "fp")]
    fiscal_sign: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CreateReceiptBody {
    #[serde(default)]
    id: Option<String>,
}

/// Classify a status body into the tagged lookup outcome.
///
/// Missing fields mean "not yet available", never an error - fiscalization
/// can still complete later.
fn classify_receipt_body(body: ReceiptStatusBody) -> ReceiptLookup {
    let fiscal = match (&body.fiscal_number, &body.fiscal_doc, &body.fiscal_sign) {
        (Some(fiscal_number), Some(fiscal_doc), Some(fiscal_sign)) => Some(FiscalIds {
            fiscal_number: fiscal_number.clone(),
            fiscal_doc: fiscal_doc.clone(),
            fiscal_sign: fiscal_sign.clone(),
        }),
        _ => None,
    };

    if body.url.is_some() || fiscal.is_some() {
        return ReceiptLookup::Fiscalized {
            receipt_id: body.id,
            direct_url: body.url,
            fiscal,
        };
    }

    match body.id {
        Some(receipt_id) => ReceiptLookup::Registered { receipt_id },
        None => ReceiptLookup::NotReady,
    }
}

/// HTTP client for the fiscal provider
pub struct HttpReceiptClient {
    http: Client,
    base_url: String,
    login: String,
    password: String,
    /// Cached auth token. The mutex is held across the fetch, so concurrent
    /// callers share one in-flight token request instead of racing
    /// duplicates.
    token: Mutex<Option<CachedToken>>,
}

impl HttpReceiptClient {
    pub fn new(
        base_url: &str,
        login: impl Into<String>,
        password: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ReceiptClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            login: login.into(),
            password: password.into(),
            token: Mutex::new(None),
        })
    }

    /// Get a valid auth token, fetching one if the cache is empty or expired
    pub async fn get_auth_token(&self) -> Result<String, ReceiptClientError> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > now_ts() {
                return Ok(token.token.clone());
            }
        }

        let url = format!("{}/v1/auth", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "login": self.login,
                "password": self.password,
            }))
            .send()
            .await?;

        if resp.status() == StatusCode::UNAUTHORIZED || resp.status() == StatusCode::FORBIDDEN {
            return Err(ReceiptClientError::Unauthorized);
        }
        if !resp.status().is_success() {
            return Err(ReceiptClientError::Unavailable {
                status: resp.status().as_u16(),
            });
        }

        let auth: AuthResponse = resp
            .json()
            .await
            .map_err(|e| ReceiptClientError::Malformed(e.to_string()))?;

        let lifetime = auth.expires_in.unwrap_or(3_600);
        let token = CachedToken {
            token: auth.token,
            expires_at: now_ts() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS),
        };
        let value = token.token.clone();
        *cached = Some(token);

        Ok(value)
    }

    /// Drop the cached token so the next call fetches a fresh one
    pub async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Send a request with a cached token; on provider-reported unauthorized,
    /// invalidate the cache and retry exactly once with a fresh token.
    async fn send_authorized(
        &self,
        build: impl Fn(&Client, &str) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ReceiptClientError> {
        let token = self.get_auth_token().await?;
        let resp = build(&self.http, &token).send().await?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        self.invalidate_token().await;
        let token = self.get_auth_token().await?;
        let resp = build(&self.http, &token).send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(ReceiptClientError::Unauthorized);
        }
        Ok(resp)
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ReceiptClientError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status.is_server_error() {
            return Err(ReceiptClientError::Unavailable {
                status: status.as_u16(),
            });
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ReceiptClientError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ReceiptApi for HttpReceiptClient {
    async fn get_receipt_status(
        &self,
        reference: &str,
    ) -> Result<ReceiptLookup, ReceiptClientError> {
        let url = format!("{}/v1/receipts/{}", self.base_url, reference);
        let resp = self
            .send_authorized(|http: &Client, token: &str| http.get(&url).bearer_auth(token))
            .await?;

        // An id the provider has not seen yet is the same as "no data yet"
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(ReceiptLookup::NotReady);
        }
        let resp = Self::check_status(resp).await?;

        let body: ReceiptStatusBody = resp
            .json()
            .await
            .map_err(|e| ReceiptClientError::Malformed(e.to_string()))?;

        Ok(classify_receipt_body(body))
    }

    async fn create_receipt(
        &self,
        draft: &ReceiptDraft,
    ) -> Result<ReceiptCreated, ReceiptClientError> {
        let url = format!("{}/v1/receipts", self.base_url);
        let resp = self
            .send_authorized(|http: &Client, token: &str| {
                http.post(&url).bearer_auth(token).json(draft)
            })
            .await?;
        let resp = Self::check_status(resp).await?;

        let body: CreateReceiptBody = resp
            .json()
            .await
            .map_err(|e| ReceiptClientError::Malformed(e.to_string()))?;

        Ok(ReceiptCreated {
            receipt_id: body.id,
        })
    }

    async fn current_token_fingerprint(&self) -> Option<String> {
        let cached = self.token.lock().await;
        cached
            .as_ref()
            .filter(|t| t.expires_at > now_ts())
            .map(|t| token_fingerprint(&t.token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_receipt_view_url_golden() {
        assert_eq!(
            build_receipt_view_url("123", "45", "6789"),
            "https://check.ofd.ru/rec/123/45/6789"
        );
    }

    #[test]
    fn test_token_fingerprint_stable_and_short() {
        let fp = token_fingerprint("secret-token");
        assert_eq!(fp, token_fingerprint("secret-token"));
        assert_eq!(fp.len(), 16);
        assert_ne!(fp, token_fingerprint("other-token"));
    }

    #[test]
    fn test_classify_empty_body_not_ready() {
        let lookup = classify_receipt_body(ReceiptStatusBody::default());
        assert_eq!(lookup, ReceiptLookup::NotReady);
    }

    #[test]
    fn test_classify_id_only_registered() {
        let lookup = classify_receipt_body(ReceiptStatusBody {
            id: Some("rc-1".to_string()),
            ..Default::default()
        });
        assert_eq!(
            lookup,
            ReceiptLookup::Registered {
                receipt_id: "rc-1".to_string()
            }
        );
    }

    #[test]
    fn test_classify_partial_triple_not_fiscalized() {
        // fn and fd without fp is not enough to build a URL
        let lookup = classify_receipt_body(ReceiptStatusBody {
            id: Some("rc-1".to_string()),
            fiscal_number: Some("123".to_string()),
            fiscal_doc: Some("45".to_string()),
            ..Default::default()
        });
        assert_eq!(
            lookup,
            ReceiptLookup::Registered {
                receipt_id: "rc-1".to_string()
            }
        );
    }

    #[test]
    fn test_classify_full_triple_builds_url() {
        let lookup = classify_receipt_body(ReceiptStatusBody {
            id: Some("rc-1".to_string()),
            fiscal_number: Some("123".to_string()),
            fiscal_doc: Some("45".to_string()),
            fiscal_sign: Some("6789".to_string()),
            ..Default::default()
        });
        assert_eq!(
            lookup.resolved_url().as_deref(),
            Some("https://check.ofd.ru/rec/123/45/6789")
        );
    }

    #[test]
    fn test_classify_direct_url_wins() {
        let lookup = classify_receipt_body(ReceiptStatusBody {
            url: Some("https://provider.example/r/42".to_string()),
            fiscal_number: Some("123".to_string()),
            fiscal_doc: Some("45".to_string()),
            fiscal_sign: Some("6789".to_string()),
            ..Default::default()
        });
        assert_eq!(
            lookup.resolved_url().as_deref(),
            Some("https://provider.example/r/42")
        );
    }

    #[test]
    fn test_draft_serialization_skips_absent_offset() {
        let draft = ReceiptDraft {
            invoice_id: "inv-1".to_string(),
            amount_minor: 150_00,
            description: "Consulting".to_string(),
            offset_of: None,
        };
        let json = serde_json::to_string(&draft).unwrap();
        assert!(json.contains("inv-1"));
        assert!(!json.contains("offset_of"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ReceiptClientError::Unavailable { status: 502 }.is_retryable());
        assert!(!ReceiptClientError::Unauthorized.is_retryable());
        assert!(!ReceiptClientError::Rejected {
            status: 422,
            body: "bad amount".to_string()
        }
        .is_retryable());
        assert!(!ReceiptClientError::Malformed("truncated".to_string()).is_retryable());
    }
}
