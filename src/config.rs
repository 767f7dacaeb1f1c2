//! Environment-based Configuration for the Paydesk Backend
//!
//! All sensitive values (provider credentials) MUST come from environment
//! variables, never from hardcoded values.
//!
//! # Environment Variables
//!
//! ## Deployment
//! - `PAYDESK_PROFILE` - "production", "staging", or "development" (default: "development")
//! - `PAYDESK_STORAGE_DIR` - Root directory of the shared storage backend
//! - `PAYDESK_SINGLE_INSTANCE` - "1" to elect the leader in-process instead of
//!   through storage; required when the storage backend has no atomic
//!   conditional write and only one instance runs
//!
//! ## Fiscal provider
//! - `PAYDESK_FISCAL_URL` - Receipt provider API base URL
//! - `PAYDESK_FISCAL_LOGIN` / `PAYDESK_FISCAL_PASSWORD` - Provider credentials
//!
//! ## Payout provider
//! - `PAYDESK_PAYOUT_URL` - Payout API base URL
//! - `PAYDESK_PAYOUT_LOGIN` / `PAYDESK_PAYOUT_KEY` - Payout API credentials
//!
//! ## Workers
//! - `PAYDESK_REPAIR_INTERVAL_SECS` - Repair pass interval (default: 60)
//! - `PAYDESK_SCHEDULE_INTERVAL_SECS` - Schedule pass interval (default: 120)
//! - `PAYDESK_LEASE_TTL_SECS` - Leader lease TTL (default: 300)
//! - `PAYDESK_PASS_CONCURRENCY` - Max concurrent provider calls per pass (default: 4)
//! - `PAYDESK_HTTP_TIMEOUT_SECS` - Timeout for outbound provider calls (default: 10)
//! - `PAYDESK_OFFSET_DELAY_SECS` - Default prepay-to-offset delay (default: 86400)
//!
//! ## Logging
//! - `PAYDESK_LOG_LEVEL` - Logging level (debug, info, warn, error)

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Margin the lease TTL must keep above the slowest worker interval so a
/// renewal always lands before expiry.
pub const LEASE_RENEWAL_MARGIN_SECS: u64 = 60;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Deployment profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Production,
    Staging,
    Development,
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Profile::Production),
            "staging" | "stage" => Ok(Profile::Staging),
            "development" | "dev" => Ok(Profile::Development),
            _ => Err(ConfigError::InvalidValue(
                "PAYDESK_PROFILE".to_string(),
                format!("unknown profile: {}", s),
            )),
        }
    }
}

impl Profile {
    /// Get default fiscal provider API for this profile
    pub fn default_fiscal_url(&self) -> Option<&'static str> {
        match self {
            Profile::Production => None,
            Profile::Staging | Profile::Development => {
                Some("https://check-sandbox.ofd.ru/api")
            }
        }
    }

    /// Get default payout API for this profile
    pub fn default_payout_url(&self) -> Option<&'static str> {
        match self {
            Profile::Production => None,
            Profile::Staging | Profile::Development => {
                Some("https://api-sandbox.jump.finance")
            }
        }
    }

    /// JSON logs on production, pretty print elsewhere
    pub fn json_logs(&self) -> bool {
        matches!(self, Profile::Production)
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment profile
    pub profile: Profile,

    /// Root directory of the shared storage backend
    pub storage_dir: String,

    /// Use the in-process lease instead of the storage-backed one; only
    /// valid when a single instance runs
    pub single_instance: bool,

    /// Fiscal provider API base URL
    pub fiscal_url: String,

    /// Fiscal provider login
    pub fiscal_login: String,

    /// Fiscal provider password
    pub fiscal_password: String,

    /// Payout API base URL
    pub payout_url: String,

    /// Payout API login
    pub payout_login: String,

    /// Payout API key
    pub payout_key: String,

    /// Repair worker pass interval in seconds
    pub repair_interval_secs: u64,

    /// Schedule worker pass interval in seconds
    pub schedule_interval_secs: u64,

    /// Leader lease TTL in seconds
    pub lease_ttl_secs: u64,

    /// Max concurrent provider calls within one worker pass
    pub pass_concurrency: usize,

    /// Timeout for outbound provider calls in seconds
    pub http_timeout_secs: u64,

    /// Default delay between a resolved prepay and its offset step
    pub offset_delay_secs: u64,

    /// Log level
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let profile: Profile = env::var("PAYDESK_PROFILE")
            .unwrap_or_else(|_| "development".to_string())
            .parse()?;

        let storage_dir =
            env::var("PAYDESK_STORAGE_DIR").unwrap_or_else(|_| "data".to_string());
        let single_instance = env::var("PAYDESK_SINGLE_INSTANCE")
            .map(|v| v == "1")
            .unwrap_or(false);

        let fiscal_url = required_or_profile_default(
            "PAYDESK_FISCAL_URL",
            profile.default_fiscal_url(),
        )?;
        let fiscal_login = required_or_dev_default("PAYDESK_FISCAL_LOGIN", profile)?;
        let fiscal_password = required_or_dev_default("PAYDESK_FISCAL_PASSWORD", profile)?;

        let payout_url = required_or_profile_default(
            "PAYDESK_PAYOUT_URL",
            profile.default_payout_url(),
        )?;
        let payout_login = required_or_dev_default("PAYDESK_PAYOUT_LOGIN", profile)?;
        let payout_key = required_or_dev_default("PAYDESK_PAYOUT_KEY", profile)?;

        let repair_interval_secs = parse_env_or("PAYDESK_REPAIR_INTERVAL_SECS", 60)?;
        let schedule_interval_secs = parse_env_or("PAYDESK_SCHEDULE_INTERVAL_SECS", 120)?;
        let lease_ttl_secs = parse_env_or("PAYDESK_LEASE_TTL_SECS", 300)?;
        let pass_concurrency = parse_env_or("PAYDESK_PASS_CONCURRENCY", 4)?;
        let http_timeout_secs = parse_env_or("PAYDESK_HTTP_TIMEOUT_SECS", 10)?;
        let offset_delay_secs = parse_env_or("PAYDESK_OFFSET_DELAY_SECS", 86_400)?;

        let log_level = env::var("PAYDESK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let config = Self {
            profile,
            storage_dir,
            single_instance,
            fiscal_url,
            fiscal_login,
            fiscal_password,
            payout_url,
            payout_login,
            payout_key,
            repair_interval_secs,
            schedule_interval_secs,
            lease_ttl_secs,
            pass_concurrency: pass_concurrency as usize,
            http_timeout_secs,
            offset_delay_secs,
            log_level,
        };
        config.validate()?;

        Ok(config)
    }

    /// Validate the interval/TTL relation.
    ///
    /// The lease TTL must exceed the slowest worker interval plus a renewal
    /// margin, otherwise a lease could expire between two renewals and be
    /// believed held by two instances during a single pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let slowest = self.repair_interval_secs.max(self.schedule_interval_secs);
        if self.lease_ttl_secs < slowest + LEASE_RENEWAL_MARGIN_SECS {
            return Err(ConfigError::InvalidValue(
                "PAYDESK_LEASE_TTL_SECS".to_string(),
                format!(
                    "must be at least {} (slowest worker interval {} + {}s margin)",
                    slowest + LEASE_RENEWAL_MARGIN_SECS,
                    slowest,
                    LEASE_RENEWAL_MARGIN_SECS
                ),
            ));
        }

        if self.pass_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYDESK_PASS_CONCURRENCY".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration suitable for tests: in-repo temp storage, sandbox
    /// providers, short intervals.
    pub fn for_tests(storage_dir: impl Into<String>) -> Self {
        Self {
            profile: Profile::Development,
            storage_dir: storage_dir.into(),
            single_instance: false,
            fiscal_url: "https://check-sandbox.ofd.ru/api".to_string(),
            fiscal_login: "sandbox".to_string(),
            fiscal_password: "sandbox".to_string(),
            payout_url: "https://api-sandbox.jump.finance".to_string(),
            payout_login: "sandbox".to_string(),
            payout_key: "sandbox".to_string(),
            repair_interval_secs: 1,
            schedule_interval_secs: 1,
            lease_ttl_secs: 61,
            pass_concurrency: 2,
            http_timeout_secs: 2,
            offset_delay_secs: 3600,
            log_level: "debug".to_string(),
        }
    }
}

/// Get required env var, or use the profile's built-in default if it has one
fn required_or_profile_default(
    var_name: &str,
    default: Option<&str>,
) -> Result<String, ConfigError> {
    match env::var(var_name) {
        Ok(value) => Ok(value),
        Err(_) => default
            .map(|d| d.to_string())
            .ok_or_else(|| ConfigError::MissingEnvVar(var_name.to_string())),
    }
}

/// Get required env var, or a placeholder credential outside production
fn required_or_dev_default(var_name: &str, profile: Profile) -> Result<String, ConfigError> {
    match env::var(var_name) {
        Ok(value) => Ok(value),
        Err(_) => {
            if profile == Profile::Production {
                Err(ConfigError::MissingEnvVar(var_name.to_string()))
            } else {
                Ok("sandbox".to_string())
            }
        }
    }
}

fn parse_env_or(var_name: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(var_name) {
        Ok(value) => value.parse().map_err(|_| {
            ConfigError::InvalidValue(var_name.to_string(), "must be a number".to_string())
        }),
        Err(_) => Ok(default),
    }
}
