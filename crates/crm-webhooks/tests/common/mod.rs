//! Common test utilities for crm-webhooks integration tests.
//!
//! Provides wiremock responders, recording collaborators and fixtures for
//! exercising matching and delivery without a real database or job backend.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::{Request, Respond, ResponseTemplate};

use crm_webhooks::event::{DomainEvent, EntitySnapshot, FieldChange};
use crm_webhooks::models::{
    DeliveryJob, DeliveryLog, DeliveryLogQuery, NewDeliveryLog, NewWebhookSubscription,
    UpdateWebhookSubscription, WebhookSubscription,
};
use crm_webhooks::{
    DeliveryWorker, InMemoryWebhookStore, JobQueue, OwnerNotifier, UrlGuard, WebhookConfig,
    WebhookError, WebhookResult, WebhookStore,
};

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

/// Standard test tenant IDs
pub const TENANT_A: Uuid = Uuid::from_bytes([
    0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11,
]);

pub const TENANT_B: Uuid = Uuid::from_bytes([
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x22,
]);

/// Standard test user ID (subscription owner)
pub const USER_1: Uuid = Uuid::from_bytes([
    0xaa, 0xaa, 0x11, 0x11, 0xaa, 0xaa, 0x11, 0x11, 0xaa, 0xaa, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11,
]);

/// Standard test secret
pub const SECRET_1: &str = "whsec_test_secret_key_12345";

static TRACING: Once = Once::new();

/// Install a fmt subscriber once per test binary. Honours `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Config for worker tests: short timeout, defaults otherwise.
pub fn test_config() -> WebhookConfig {
    WebhookConfig {
        http_timeout_secs: 5,
        ..WebhookConfig::default()
    }
}

pub fn new_subscription(tenant_id: Uuid, url: &str, event_keys: &[&str]) -> NewWebhookSubscription {
    NewWebhookSubscription {
        tenant_id,
        name: "CRM sync".to_string(),
        url: url.to_string(),
        secret: Some(SECRET_1.to_string()),
        event_keys: event_keys.iter().map(|k| (*k).to_string()).collect(),
        include_custom_fields: false,
        created_by: Some(USER_1),
    }
}

/// Create a `Contact.Created` subscription in the store.
pub async fn create_subscription(store: &dyn WebhookStore, url: &str) -> WebhookSubscription {
    store
        .create_subscription(new_subscription(TENANT_A, url, &["Contact.Created"]))
        .await
        .unwrap()
}

/// Push a subscription's failure counter to `count`.
pub async fn set_failure_count(store: &dyn WebhookStore, sub: &WebhookSubscription, count: i32) {
    for _ in 0..count {
        store
            .record_delivery_failure(sub.tenant_id, sub.id, Utc::now())
            .await
            .unwrap();
    }
}

pub async fn reload(store: &dyn WebhookStore, sub: &WebhookSubscription) -> WebhookSubscription {
    store
        .get_subscription(sub.tenant_id, sub.id)
        .await
        .unwrap()
        .expect("subscription exists")
}

pub async fn logs_for(store: &dyn WebhookStore, sub: &WebhookSubscription) -> Vec<DeliveryLog> {
    store
        .list_delivery_logs(DeliveryLogQuery::for_subscription(sub.tenant_id, sub.id).page(100, 0))
        .await
        .unwrap()
}

pub fn contact_snapshot(id: &str) -> EntitySnapshot {
    EntitySnapshot::new("Contact", id)
        .scalar("id", id)
        .scalar("first_name", "Ada")
        .scalar("last_name", "Lovelace")
        .scalar("email", "ada@example.com")
        .scalar("internal_notes", "never exported")
        .navigation("company", json!({"id": "co-1"}))
        .custom_field("tier", "gold")
}

pub fn contact_created(id: &str) -> DomainEvent {
    DomainEvent::created(contact_snapshot(id))
}

pub fn contact_email_updated(id: &str) -> DomainEvent {
    let mut changes = BTreeMap::new();
    changes.insert(
        "email".to_string(),
        FieldChange {
            old: json!("old@example.com"),
            new: json!("ada@example.com"),
        },
    );
    DomainEvent::updated(contact_snapshot(id), changes)
}

/// A delivery job for `sub` carrying `payload`.
pub fn job_for(sub: &WebhookSubscription, payload: &str, attempt: u32) -> DeliveryJob {
    DeliveryJob {
        subscription_id: sub.id,
        tenant_id: sub.tenant_id,
        event_type: "contact.created".to_string(),
        entity_id: "c-1".to_string(),
        payload: payload.to_string(),
        attempt,
    }
}

pub const SAMPLE_PAYLOAD: &str = r#"{"data":{"id":"c-1"},"event":"contact.created","version":"1"}"#;

// ---------------------------------------------------------------------------
// CapturedRequest - for inspecting webhook requests
// ---------------------------------------------------------------------------

/// A captured HTTP request with body and headers.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub received_at: DateTime<Utc>,
}

impl CapturedRequest {
    /// Parse the body as JSON.
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// CaptureResponder - captures requests and returns a fixed response
// ---------------------------------------------------------------------------

/// A wiremock responder that captures incoming requests.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
    response_body: Option<String>,
}

impl CaptureResponder {
    /// Capture responder that returns 200 OK.
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Capture responder that returns a custom status code.
    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
            response_body: None,
        }
    }

    /// Capture responder that returns a custom status and body.
    pub fn with_body(status: u16, body: impl Into<String>) -> Self {
        Self {
            response_body: Some(body.into()),
            ..Self::with_status(status)
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for CaptureResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
            received_at: Utc::now(),
        };
        self.requests.lock().unwrap().push(captured);

        let template = ResponseTemplate::new(self.response_code);
        match &self.response_body {
            Some(body) => template.set_body_string(body.clone()),
            None => template,
        }
    }
}

// ---------------------------------------------------------------------------
// FailingResponder - fails N times then succeeds
// ---------------------------------------------------------------------------

/// A wiremock responder that fails a specified number of times before succeeding.
#[derive(Clone)]
pub struct FailingResponder {
    attempt_count: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_code: u16,
}

impl FailingResponder {
    /// Fail `n` times with `failure_code`, then return 200.
    pub fn fail_with_status(n: u32, failure_code: u16) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_code,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(self.failure_code)
        } else {
            ResponseTemplate::new(200)
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// URL guard that accepts any parseable URL, so plain-http wiremock servers
/// on loopback are reachable.
pub struct AllowAllGuard;

#[async_trait]
impl UrlGuard for AllowAllGuard {
    async fn validate(&self, url: &str) -> Result<(), WebhookError> {
        url::Url::parse(url)
            .map(|_| ())
            .map_err(|e| WebhookError::InvalidUrl(e.to_string()))
    }
}

/// A job placed on the [`RecordingQueue`].
#[derive(Debug, Clone)]
pub struct RecordedJob {
    pub queue: String,
    pub job: DeliveryJob,
    /// `None` for immediate enqueues.
    pub delay: Option<Duration>,
}

/// Job queue that records instead of running anything.
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<RecordedJob>>,
    /// Subscription whose enqueues fail, for isolation tests.
    fail_for: Mutex<Option<Uuid>>,
}

impl RecordingQueue {
    pub fn jobs(&self) -> Vec<RecordedJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn scheduled(&self) -> Vec<RecordedJob> {
        self.jobs()
            .into_iter()
            .filter(|j| j.delay.is_some())
            .collect()
    }

    pub fn fail_enqueues_for(&self, subscription_id: Uuid) {
        *self.fail_for.lock().unwrap() = Some(subscription_id);
    }

    fn record(&self, queue: &str, job: DeliveryJob, delay: Option<Duration>) -> WebhookResult<()> {
        if *self.fail_for.lock().unwrap() == Some(job.subscription_id) {
            return Err(WebhookError::Queue("queue unavailable".to_string()));
        }
        self.jobs.lock().unwrap().push(RecordedJob {
            queue: queue.to_string(),
            job,
            delay,
        });
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, queue: &str, job: DeliveryJob) -> WebhookResult<()> {
        self.record(queue, job, None)
    }

    async fn schedule(&self, queue: &str, job: DeliveryJob, delay: Duration) -> WebhookResult<()> {
        self.record(queue, job, Some(delay))
    }
}

/// Owner notifier that records calls and can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(Uuid, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(Uuid, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OwnerNotifier for RecordingNotifier {
    async fn subscription_auto_disabled(
        &self,
        subscription: &WebhookSubscription,
        reason: &str,
    ) -> WebhookResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((subscription.id, reason.to_string()));
        if self.fail {
            return Err(WebhookError::Internal("mail server down".to_string()));
        }
        Ok(())
    }
}

/// Store whose delivery-log writes always fail; everything else delegates.
pub struct FailingLogStore {
    pub inner: InMemoryWebhookStore,
}

#[async_trait]
impl WebhookStore for FailingLogStore {
    async fn create_subscription(
        &self,
        input: NewWebhookSubscription,
    ) -> WebhookResult<WebhookSubscription> {
        self.inner.create_subscription(input).await
    }

    async fn get_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> WebhookResult<Option<WebhookSubscription>> {
        self.inner.get_subscription(tenant_id, id).await
    }

    async fn list_subscriptions(&self, tenant_id: Uuid) -> WebhookResult<Vec<WebhookSubscription>> {
        self.inner.list_subscriptions(tenant_id).await
    }

    async fn list_active_subscriptions(
        &self,
        tenant_id: Uuid,
    ) -> WebhookResult<Vec<WebhookSubscription>> {
        self.inner.list_active_subscriptions(tenant_id).await
    }

    async fn update_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        update: UpdateWebhookSubscription,
    ) -> WebhookResult<Option<WebhookSubscription>> {
        self.inner.update_subscription(tenant_id, id, update).await
    }

    async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> WebhookResult<bool> {
        self.inner.delete_subscription(tenant_id, id).await
    }

    async fn regenerate_secret(&self, tenant_id: Uuid, id: Uuid) -> WebhookResult<Option<String>> {
        self.inner.regenerate_secret(tenant_id, id).await
    }

    async fn record_delivery_success(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> WebhookResult<()> {
        self.inner.record_delivery_success(tenant_id, id, at).await
    }

    async fn record_delivery_failure(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> WebhookResult<Option<i32>> {
        self.inner.record_delivery_failure(tenant_id, id, at).await
    }

    async fn auto_disable(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> WebhookResult<bool> {
        self.inner.auto_disable(tenant_id, id, reason, at).await
    }

    async fn create_delivery_log(&self, _log: NewDeliveryLog) -> WebhookResult<DeliveryLog> {
        Err(WebhookError::Internal("log table unavailable".to_string()))
    }

    async fn list_delivery_logs(&self, query: DeliveryLogQuery) -> WebhookResult<Vec<DeliveryLog>> {
        self.inner.list_delivery_logs(query).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A worker wired to in-memory collaborators.
pub struct Harness {
    pub store: Arc<InMemoryWebhookStore>,
    pub queue: Arc<RecordingQueue>,
    pub notifier: Arc<RecordingNotifier>,
    pub worker: DeliveryWorker,
}

impl Harness {
    /// Worker that can reach loopback wiremock servers.
    pub fn new() -> Self {
        Self::build(Arc::new(AllowAllGuard), RecordingNotifier::default(), test_config())
    }

    pub fn with_guard(guard: Arc<dyn UrlGuard>) -> Self {
        Self::build(guard, RecordingNotifier::default(), test_config())
    }

    pub fn with_config(config: WebhookConfig) -> Self {
        Self::build(Arc::new(AllowAllGuard), RecordingNotifier::default(), config)
    }

    pub fn with_notifier(notifier: RecordingNotifier) -> Self {
        Self::build(Arc::new(AllowAllGuard), notifier, test_config())
    }

    fn build(guard: Arc<dyn UrlGuard>, notifier: RecordingNotifier, config: WebhookConfig) -> Self {
        init_tracing();

        let store = Arc::new(InMemoryWebhookStore::new());
        let queue = Arc::new(RecordingQueue::default());
        let notifier = Arc::new(notifier);
        let worker = DeliveryWorker::new(
            store.clone(),
            queue.clone(),
            guard,
            notifier.clone(),
            &config,
        )
        .unwrap();

        Self {
            store,
            queue,
            notifier,
            worker,
        }
    }
}
