//! Error types for the webhook delivery subsystem.

use crate::config::ConfigError;

/// Webhook subsystem error variants.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("SSRF protection: {0}")]
    SsrfDetected(String),

    #[error("DNS resolution failed: {0}")]
    DnsResolution(String),

    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Job queue error: {0}")]
    Queue(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WebhookError {
    /// Returns true for destination errors that no retry can fix.
    ///
    /// Malformed URLs, non-HTTPS schemes, blocked address ranges and
    /// unresolvable hosts are terminal for a delivery attempt.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            WebhookError::InvalidUrl(_)
                | WebhookError::SsrfDetected(_)
                | WebhookError::DnsResolution(_)
        )
    }
}

pub type WebhookResult<T> = Result<T, WebhookError>;
