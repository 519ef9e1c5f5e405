//! Webhook delivery for CRM domain events.
//!
//! Domain-change events are matched against tenant subscriptions, rendered
//! into canonical JSON payloads and delivered asynchronously with HMAC-SHA256
//! signatures, SSRF checks at delivery time, exponential backoff with jitter,
//! and automatic disabling of endpoints that keep failing.

pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod event;
pub mod matcher;
pub mod models;
pub mod notifier;
pub mod payload;
pub mod queue;
pub mod retry;
pub mod store;
pub mod validation;
pub mod worker;

pub use cache::{MokaSubscriptionCache, SubscriptionCache};
pub use config::{ConfigError, WebhookConfig};
pub use error::{WebhookError, WebhookResult};
pub use event::{DomainEvent, EntitySnapshot, EventKind, FieldChange, FieldKind, SnapshotField};
pub use matcher::{EventMatcher, TenantAccessor};
pub use models::{
    DeliveryJob, DeliveryLog, DeliveryLogQuery, NewDeliveryLog, NewWebhookSubscription,
    UpdateWebhookSubscription, WebhookSubscription,
};
pub use notifier::{LogNotifier, OwnerNotifier};
pub use payload::{PayloadBuilder, ProjectorRegistry};
pub use queue::{JobHandler, JobQueue, JobReceiver, JobRunner, TokioJobQueue, DELIVERY_QUEUE};
pub use retry::{RetryDecision, RetryPolicy};
pub use store::{InMemoryWebhookStore, PgWebhookStore, WebhookStore};
pub use validation::{SsrfValidator, UrlGuard};
pub use worker::{DeliveryOutcome, DeliveryWorker};
