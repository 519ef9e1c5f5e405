//! Matching domain events to subscriptions and enqueueing deliveries.
//!
//! Runs inline with the mutation path: the only awaits are the cache lookup
//! (which touches the store on a miss) and the enqueue. No network I/O.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::cache::SubscriptionCache;
use crate::error::WebhookResult;
use crate::event::DomainEvent;
use crate::models::{DeliveryJob, WebhookSubscription};
use crate::payload::PayloadBuilder;
use crate::queue::{JobQueue, DELIVERY_QUEUE};
use crate::store::WebhookStore;

/// Entity types that produce webhook events unless overridden.
pub const DEFAULT_ELIGIBLE_ENTITIES: [&str; 5] = ["Contact", "Company", "Deal", "Lead", "Activity"];

/// Resolves the tenant of the current request/unit of work.
pub trait TenantAccessor: Send + Sync {
    fn current_tenant(&self) -> Option<Uuid>;
}

impl<F> TenantAccessor for F
where
    F: Fn() -> Option<Uuid> + Send + Sync,
{
    fn current_tenant(&self) -> Option<Uuid> {
        self()
    }
}

/// Turns domain events into delivery jobs.
pub struct EventMatcher {
    store: Arc<dyn WebhookStore>,
    cache: Arc<dyn SubscriptionCache>,
    queue: Arc<dyn JobQueue>,
    tenants: Arc<dyn TenantAccessor>,
    payloads: PayloadBuilder,
    eligible: HashSet<String>,
}

impl EventMatcher {
    pub fn new(
        store: Arc<dyn WebhookStore>,
        cache: Arc<dyn SubscriptionCache>,
        queue: Arc<dyn JobQueue>,
        tenants: Arc<dyn TenantAccessor>,
    ) -> Self {
        Self {
            store,
            cache,
            queue,
            tenants,
            payloads: PayloadBuilder::default(),
            eligible: DEFAULT_ELIGIBLE_ENTITIES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    #[must_use]
    pub fn with_payload_builder(mut self, payloads: PayloadBuilder) -> Self {
        self.payloads = payloads;
        self
    }

    /// Replace the set of entity types that produce webhook events.
    #[must_use]
    pub fn with_eligible_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.eligible = entities.into_iter().map(Into::into).collect();
        self
    }

    /// Match one event and enqueue a delivery per subscriber.
    ///
    /// Returns the number of jobs enqueued. A failure for one subscription is
    /// logged and does not stop the others.
    pub async fn on_event(&self, event: &DomainEvent) -> usize {
        if !self.eligible.contains(event.entity_name()) {
            return 0;
        }

        let Some(tenant_id) = self.tenants.current_tenant() else {
            tracing::debug!(
                target: "webhook_matcher",
                entity = %event.entity_name(),
                "No tenant in context; skipping webhook matching"
            );
            return 0;
        };

        let subscriptions = match self
            .cache
            .get_or_populate(tenant_id, self.store.as_ref())
            .await
        {
            Ok(subs) => subs,
            Err(e) => {
                tracing::error!(
                    target: "webhook_matcher",
                    tenant_id = %tenant_id,
                    error = %e,
                    "Failed to load webhook subscriptions"
                );
                return 0;
            }
        };

        let event_key = event.event_key();
        let mut enqueued = 0;

        for subscription in subscriptions
            .iter()
            .filter(|s| s.is_deliverable() && s.subscribes_to(&event_key))
        {
            match self.enqueue_for(event, subscription, tenant_id).await {
                Ok(()) => enqueued += 1,
                Err(e) => {
                    tracing::error!(
                        target: "webhook_matcher",
                        tenant_id = %tenant_id,
                        subscription_id = %subscription.id,
                        event_key = %event_key,
                        error = %e,
                        "Failed to enqueue webhook delivery"
                    );
                }
            }
        }

        if enqueued > 0 {
            tracing::debug!(
                target: "webhook_matcher",
                tenant_id = %tenant_id,
                event_key = %event_key,
                entity_id = %event.snapshot.entity_id,
                enqueued,
                "Enqueued webhook deliveries"
            );
        }

        enqueued
    }

    /// Match a batch of events, e.g. everything one unit of work persisted.
    pub async fn on_events(&self, events: &[DomainEvent]) -> usize {
        let mut total = 0;
        for event in events {
            total += self.on_event(event).await;
        }
        total
    }

    /// Drop the cached subscriptions of a tenant after a subscription write.
    pub async fn invalidate_cache(&self, tenant_id: Uuid) {
        self.cache.invalidate(tenant_id).await;
    }

    async fn enqueue_for(
        &self,
        event: &DomainEvent,
        subscription: &WebhookSubscription,
        tenant_id: Uuid,
    ) -> WebhookResult<()> {
        let payload = self.payloads.build(event, subscription, tenant_id)?;

        let job = DeliveryJob {
            subscription_id: subscription.id,
            tenant_id,
            event_type: event.event_type(),
            entity_id: event.snapshot.entity_id.clone(),
            payload,
            attempt: 0,
        };

        self.queue.enqueue(DELIVERY_QUEUE, job).await
    }
}
