//! Environment-driven configuration for webhook delivery.

use std::env::VarError;
use std::str::FromStr;
use std::time::Duration;

/// Default HTTP timeout for a single delivery attempt.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default lifetime of a tenant's cached subscription list.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;

/// Default response body capture limit for delivery logs.
pub const DEFAULT_RESPONSE_BODY_LIMIT: usize = 1024;

/// Configuration for the webhook delivery subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Per-attempt HTTP timeout.
    pub http_timeout_secs: u64,
    /// TTL for the per-tenant subscription cache.
    pub cache_ttl_secs: u64,
    /// Maximum number of tenants held in the subscription cache.
    pub cache_max_tenants: u64,
    /// Consecutive failures after which a subscription is auto-disabled.
    pub auto_disable_threshold: i32,
    /// Highest attempt index (0-based) that may be scheduled.
    pub max_attempt_index: u32,
    /// Response bodies are truncated to this many bytes before logging.
    pub response_body_limit: usize,
    /// Number of deliveries the job runner executes concurrently.
    pub worker_concurrency: usize,
    /// User-Agent sent with every delivery.
    pub user_agent: String,
    /// Whether retry delays get random jitter added.
    pub retry_jitter: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_max_tenants: 10_000,
            auto_disable_threshold: 50,
            max_attempt_index: 6,
            response_body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
            worker_concurrency: 16,
            user_agent: "crm-webhooks/1.0".to_string(),
            retry_jitter: true,
        }
    }
}

impl WebhookConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// Unset variables fall back to defaults; set but unparsable values are errors.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let defaults = Self::default();

        Ok(Self {
            http_timeout_secs: parse_var(
                &reader,
                "WEBHOOK_HTTP_TIMEOUT_SECS",
                defaults.http_timeout_secs,
            )?,
            cache_ttl_secs: parse_var(&reader, "WEBHOOK_CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
            cache_max_tenants: parse_var(
                &reader,
                "WEBHOOK_CACHE_MAX_TENANTS",
                defaults.cache_max_tenants,
            )?,
            auto_disable_threshold: parse_var(
                &reader,
                "WEBHOOK_AUTO_DISABLE_THRESHOLD",
                defaults.auto_disable_threshold,
            )?,
            max_attempt_index: parse_var(
                &reader,
                "WEBHOOK_MAX_ATTEMPT_INDEX",
                defaults.max_attempt_index,
            )?,
            response_body_limit: parse_var(
                &reader,
                "WEBHOOK_RESPONSE_BODY_LIMIT",
                defaults.response_body_limit,
            )?,
            worker_concurrency: parse_var(
                &reader,
                "WEBHOOK_WORKER_CONCURRENCY",
                defaults.worker_concurrency,
            )?,
            user_agent: reader("WEBHOOK_USER_AGENT").unwrap_or(defaults.user_agent),
            retry_jitter: parse_var(&reader, "WEBHOOK_RETRY_JITTER", defaults.retry_jitter)?,
        })
    }

    /// Per-attempt HTTP timeout as a `Duration`.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Subscription cache TTL as a `Duration`.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn parse_var<F, T>(reader: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match reader(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue(
            key.to_string(),
            "value is not valid unicode".to_string(),
        )),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}
