//! Persistence contract for subscriptions and delivery logs.
//!
//! Every operation is scoped by `tenant_id`. Counter updates are atomic at the
//! store level so concurrent deliveries for one subscription never lose an
//! increment.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryWebhookStore;
pub use postgres::PgWebhookStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::WebhookResult;
use crate::models::{
    DeliveryLog, DeliveryLogQuery, NewDeliveryLog, NewWebhookSubscription,
    UpdateWebhookSubscription, WebhookSubscription,
};

#[async_trait]
pub trait WebhookStore: Send + Sync {
    // --- subscription CRUD ---

    /// Create a subscription. A `whsec_` secret is generated when none is given.
    async fn create_subscription(
        &self,
        input: NewWebhookSubscription,
    ) -> WebhookResult<WebhookSubscription>;

    async fn get_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> WebhookResult<Option<WebhookSubscription>>;

    /// All subscriptions of a tenant, oldest first.
    async fn list_subscriptions(&self, tenant_id: Uuid) -> WebhookResult<Vec<WebhookSubscription>>;

    /// Subscriptions that are active and not disabled.
    async fn list_active_subscriptions(
        &self,
        tenant_id: Uuid,
    ) -> WebhookResult<Vec<WebhookSubscription>>;

    /// Apply a partial update. Returns `None` if the subscription does not exist.
    async fn update_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        update: UpdateWebhookSubscription,
    ) -> WebhookResult<Option<WebhookSubscription>>;

    /// Returns `true` if a row was deleted.
    async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> WebhookResult<bool>;

    /// Replace the signing secret and return the new one.
    async fn regenerate_secret(&self, tenant_id: Uuid, id: Uuid) -> WebhookResult<Option<String>>;

    // --- delivery state ---

    /// Reset the failure counter and stamp `last_delivery_at`.
    async fn record_delivery_success(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> WebhookResult<()>;

    /// Atomically increment the failure counter and stamp `last_delivery_at`.
    ///
    /// Returns the new counter value, or `None` if the subscription is gone.
    async fn record_delivery_failure(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> WebhookResult<Option<i32>>;

    /// Disable a subscription that is still enabled.
    ///
    /// Returns `true` only if this call performed the transition.
    async fn auto_disable(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> WebhookResult<bool>;

    // --- delivery logs ---

    async fn create_delivery_log(&self, log: NewDeliveryLog) -> WebhookResult<DeliveryLog>;

    /// Newest first, paginated. Limits are clamped to 1..=100.
    async fn list_delivery_logs(&self, query: DeliveryLogQuery) -> WebhookResult<Vec<DeliveryLog>>;
}
