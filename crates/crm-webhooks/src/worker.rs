//! Webhook delivery execution.
//!
//! One call to [`DeliveryWorker::deliver`] is one attempt:
//!
//! ```text
//! load subscription -> SSRF check -> sign -> POST -> log
//!     -> success: reset counter
//!     -> failure: bump counter -> auto-disable | schedule retry | stop
//! ```
//!
//! The attempt index travels on the job, so each retry is a fresh job that
//! re-checks the subscription before doing anything.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::crypto;
use crate::error::{WebhookError, WebhookResult};
use crate::models::{auto_disable_reason, DeliveryJob, NewDeliveryLog, WebhookSubscription};
use crate::notifier::OwnerNotifier;
use crate::queue::{JobHandler, JobQueue, DELIVERY_QUEUE};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::WebhookStore;
use crate::validation::UrlGuard;

/// Header carrying `sha256=<hex>` over the body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Header carrying the per-attempt delivery id.
pub const DELIVERY_ID_HEADER: &str = "X-Webhook-Id";
/// Header carrying the send time in unix seconds.
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

/// Terminal state of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Subscription missing, inactive or disabled. Nothing was sent or logged.
    Skipped,
    /// 2xx response.
    Delivered,
    /// Failed; the next attempt is scheduled.
    RetryScheduled { next_attempt: u32, delay: Duration },
    /// Failed with no further attempt.
    PermanentlyFailed,
    /// Failed and the subscription is now disabled.
    AutoDisabled,
    /// A store or queue error interrupted the attempt.
    Aborted,
}

/// Raw result of the HTTP exchange.
struct AttemptResult {
    status: Option<u16>,
    response_body: Option<String>,
    error_message: Option<String>,
    duration_ms: i64,
}

impl AttemptResult {
    fn is_success(&self) -> bool {
        self.error_message.is_none()
    }
}

/// Executes delivery jobs.
#[derive(Clone)]
pub struct DeliveryWorker {
    store: Arc<dyn WebhookStore>,
    queue: Arc<dyn JobQueue>,
    guard: Arc<dyn UrlGuard>,
    notifier: Arc<dyn OwnerNotifier>,
    http_client: Client,
    policy: RetryPolicy,
    http_timeout: Duration,
    response_body_limit: usize,
}

impl DeliveryWorker {
    /// Create a worker with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(
        store: Arc<dyn WebhookStore>,
        queue: Arc<dyn JobQueue>,
        guard: Arc<dyn UrlGuard>,
        notifier: Arc<dyn OwnerNotifier>,
        config: &WebhookConfig,
    ) -> WebhookResult<Self> {
        let http_client = Client::builder()
            .timeout(config.http_timeout())
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            store,
            queue,
            guard,
            notifier,
            http_client,
            policy: RetryPolicy::from_config(config),
            http_timeout: config.http_timeout(),
            response_body_limit: config.response_body_limit,
        })
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run one delivery attempt. Never fails: errors are logged and reported
    /// as [`DeliveryOutcome::Aborted`].
    pub async fn deliver(&self, job: &DeliveryJob) -> DeliveryOutcome {
        match self.try_deliver(job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    subscription_id = %job.subscription_id,
                    tenant_id = %job.tenant_id,
                    event_type = %job.event_type,
                    attempt_number = job.attempt + 1,
                    error = %e,
                    "Webhook delivery attempt aborted"
                );
                DeliveryOutcome::Aborted
            }
        }
    }

    async fn try_deliver(&self, job: &DeliveryJob) -> WebhookResult<DeliveryOutcome> {
        let subscription = match self
            .store
            .get_subscription(job.tenant_id, job.subscription_id)
            .await?
        {
            Some(sub) if sub.is_deliverable() => sub,
            Some(_) | None => {
                // State changed after enqueue; not an error.
                tracing::debug!(
                    target: "webhook_delivery",
                    subscription_id = %job.subscription_id,
                    tenant_id = %job.tenant_id,
                    attempt_number = job.attempt + 1,
                    "Skipping delivery: subscription missing, inactive or disabled"
                );
                return Ok(DeliveryOutcome::Skipped);
            }
        };

        let delivery_id = Uuid::new_v4();

        if let Err(e) = self.guard.validate(&subscription.url).await {
            tracing::warn!(
                target: "webhook_delivery",
                delivery_id = %delivery_id,
                subscription_id = %subscription.id,
                tenant_id = %subscription.tenant_id,
                error = %e,
                "Webhook URL rejected"
            );

            let result = AttemptResult {
                status: None,
                response_body: None,
                error_message: Some(e.to_string()),
                duration_ms: 0,
            };
            self.write_log(delivery_id, job, &result).await;
            return self.handle_failure(&subscription, job, None, false).await;
        }

        let result = self.send(delivery_id, &subscription, job).await;
        self.write_log(delivery_id, job, &result).await;

        if result.is_success() {
            tracing::info!(
                target: "webhook_delivery",
                delivery_id = %delivery_id,
                subscription_id = %subscription.id,
                tenant_id = %subscription.tenant_id,
                event_type = %job.event_type,
                response_code = result.status,
                latency_ms = result.duration_ms,
                attempt_number = job.attempt + 1,
                "Webhook delivery succeeded"
            );

            self.store
                .record_delivery_success(subscription.tenant_id, subscription.id, Utc::now())
                .await?;
            return Ok(DeliveryOutcome::Delivered);
        }

        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery_id,
            subscription_id = %subscription.id,
            tenant_id = %subscription.tenant_id,
            event_type = %job.event_type,
            response_code = result.status,
            error = result.error_message.as_deref().unwrap_or_default(),
            attempt_number = job.attempt + 1,
            "Webhook delivery failed"
        );

        self.handle_failure(&subscription, job, result.status, true)
            .await
    }

    /// Sign and POST the payload, classifying the response.
    async fn send(
        &self,
        delivery_id: Uuid,
        subscription: &WebhookSubscription,
        job: &DeliveryJob,
    ) -> AttemptResult {
        let signature = crypto::compute_signature(&subscription.secret, job.payload.as_bytes());
        let timestamp = Utc::now().timestamp().to_string();

        let start = Instant::now();
        let result = self
            .http_client
            .post(&subscription.url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(DELIVERY_ID_HEADER, delivery_id.to_string())
            .header(TIMESTAMP_HEADER, timestamp)
            .body(job.payload.clone())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                let body = read_capped(response, self.response_body_limit)
                    .await
                    .map(|b| truncate_body(&b, self.response_body_limit))
                    .ok();
                let duration_ms = start.elapsed().as_millis() as i64;

                AttemptResult {
                    status: Some(status.as_u16()),
                    response_body: body,
                    error_message: (!status.is_success())
                        .then(|| format!("HTTP {}", status.as_u16())),
                    duration_ms,
                }
            }
            Err(e) => {
                let error_message = if e.is_timeout() {
                    format!("Request timeout ({}s)", self.http_timeout.as_secs())
                } else if e.is_connect() {
                    format!("Connection failed: {e}")
                } else {
                    format!("Request error: {e}")
                };

                AttemptResult {
                    status: None,
                    response_body: None,
                    error_message: Some(error_message),
                    duration_ms: start.elapsed().as_millis() as i64,
                }
            }
        }
    }

    /// Count the failure, then disable, retry or stop.
    ///
    /// `retryable_class` is false for URL rejections, which never retry.
    async fn handle_failure(
        &self,
        subscription: &WebhookSubscription,
        job: &DeliveryJob,
        status: Option<u16>,
        retryable_class: bool,
    ) -> WebhookResult<DeliveryOutcome> {
        let Some(failures) = self
            .store
            .record_delivery_failure(subscription.tenant_id, subscription.id, Utc::now())
            .await?
        else {
            return Ok(DeliveryOutcome::PermanentlyFailed);
        };

        if self.policy.should_disable(failures) {
            self.auto_disable(subscription, failures).await?;
            return Ok(DeliveryOutcome::AutoDisabled);
        }

        if !retryable_class {
            return Ok(DeliveryOutcome::PermanentlyFailed);
        }

        match self.policy.decide(job.attempt, status) {
            RetryDecision::Retry {
                next_attempt,
                delay,
            } => {
                self.queue
                    .schedule(DELIVERY_QUEUE, job.next_attempt(), delay)
                    .await?;

                tracing::info!(
                    target: "webhook_delivery",
                    subscription_id = %subscription.id,
                    tenant_id = %subscription.tenant_id,
                    next_attempt_number = next_attempt + 1,
                    delay_secs = delay.as_secs(),
                    "Scheduled webhook retry"
                );
                Ok(DeliveryOutcome::RetryScheduled {
                    next_attempt,
                    delay,
                })
            }
            RetryDecision::NotRetryable | RetryDecision::Exhausted => {
                tracing::info!(
                    target: "webhook_delivery",
                    subscription_id = %subscription.id,
                    tenant_id = %subscription.tenant_id,
                    attempt_number = job.attempt + 1,
                    consecutive_failures = failures,
                    "Webhook delivery abandoned"
                );
                Ok(DeliveryOutcome::PermanentlyFailed)
            }
        }
    }

    async fn auto_disable(
        &self,
        subscription: &WebhookSubscription,
        failures: i32,
    ) -> WebhookResult<()> {
        let reason = auto_disable_reason(self.policy.disable_threshold());

        let transitioned = self
            .store
            .auto_disable(subscription.tenant_id, subscription.id, &reason, Utc::now())
            .await?;

        if !transitioned {
            // Another attempt got there first and owns the notification.
            return Ok(());
        }

        tracing::warn!(
            target: "webhook_delivery",
            subscription_id = %subscription.id,
            tenant_id = %subscription.tenant_id,
            consecutive_failures = failures,
            threshold = self.policy.disable_threshold(),
            "Auto-disabled subscription due to consecutive failures"
        );

        if let Err(e) = self
            .notifier
            .subscription_auto_disabled(subscription, &reason)
            .await
        {
            tracing::error!(
                target: "webhook_delivery",
                subscription_id = %subscription.id,
                error = %e,
                "Failed to notify subscription owner"
            );
        }
        Ok(())
    }

    /// Append the attempt's log row. Failures are logged and swallowed.
    async fn write_log(&self, delivery_id: Uuid, job: &DeliveryJob, result: &AttemptResult) {
        let log = NewDeliveryLog {
            id: delivery_id,
            tenant_id: job.tenant_id,
            subscription_id: job.subscription_id,
            event_type: job.event_type.clone(),
            entity_id: job.entity_id.clone(),
            attempt_number: job.attempt as i32 + 1,
            success: result.is_success(),
            status_code: result.status.map(i32::from),
            response_body: result.response_body.clone(),
            error_message: result.error_message.clone(),
            request_payload: job.payload.clone(),
            duration_ms: result.duration_ms,
        };

        if let Err(e) = self.store.create_delivery_log(log).await {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %delivery_id,
                subscription_id = %job.subscription_id,
                error = %e,
                "Failed to write delivery log"
            );
        }
    }
}

#[async_trait]
impl JobHandler for DeliveryWorker {
    async fn handle(&self, job: DeliveryJob) {
        self.deliver(&job).await;
    }
}

/// Read at most `limit` bytes of the response body; the rest is never buffered.
async fn read_capped(mut response: reqwest::Response, limit: usize) -> reqwest::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit.min(8 * 1024));
    while buf.len() < limit {
        let Some(chunk) = response.chunk().await? else {
            break;
        };
        let take = chunk.len().min(limit - buf.len());
        buf.extend_from_slice(&chunk[..take]);
    }
    Ok(buf)
}

/// Decode a response body lossily and cut it to at most `limit` bytes on a
/// character boundary. NUL is replaced since Postgres `TEXT` rejects it.
fn truncate_body(body: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(body).replace('\0', "\u{fffd}");
    if text.len() <= limit {
        return text;
    }

    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
