//! In-process [`WebhookStore`] for tests and single-node embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::WebhookStore;
use crate::crypto;
use crate::error::WebhookResult;
use crate::models::{
    DeliveryLog, DeliveryLogQuery, NewDeliveryLog, NewWebhookSubscription,
    UpdateWebhookSubscription, WebhookSubscription, MANUAL_DISABLE_REASON,
};

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<Uuid, WebhookSubscription>,
    logs: Vec<DeliveryLog>,
}

impl Inner {
    fn subscription_mut(&mut self, tenant_id: Uuid, id: Uuid) -> Option<&mut WebhookSubscription> {
        self.subscriptions
            .get_mut(&id)
            .filter(|s| s.tenant_id == tenant_id)
    }
}

/// Subscriptions and logs held in memory behind a single lock.
#[derive(Default)]
pub struct InMemoryWebhookStore {
    inner: RwLock<Inner>,
}

impl InMemoryWebhookStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookStore for InMemoryWebhookStore {
    async fn create_subscription(
        &self,
        input: NewWebhookSubscription,
    ) -> WebhookResult<WebhookSubscription> {
        let now = Utc::now();
        let subscription = WebhookSubscription {
            id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            name: input.name,
            url: input.url,
            secret: input.secret.unwrap_or_else(crypto::generate_secret),
            event_keys: input.event_keys,
            include_custom_fields: input.include_custom_fields,
            is_active: true,
            is_disabled: false,
            consecutive_failure_count: 0,
            last_delivery_at: None,
            disabled_at: None,
            disabled_reason: None,
            created_by: input.created_by,
            created_at: now,
            updated_at: now,
        };

        self.inner
            .write()
            .await
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn get_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> WebhookResult<Option<WebhookSubscription>> {
        let inner = self.inner.read().await;
        Ok(inner
            .subscriptions
            .get(&id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_subscriptions(&self, tenant_id: Uuid) -> WebhookResult<Vec<WebhookSubscription>> {
        let inner = self.inner.read().await;
        let mut subs: Vec<_> = inner
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.created_at);
        Ok(subs)
    }

    async fn list_active_subscriptions(
        &self,
        tenant_id: Uuid,
    ) -> WebhookResult<Vec<WebhookSubscription>> {
        let mut subs = self.list_subscriptions(tenant_id).await?;
        subs.retain(WebhookSubscription::is_deliverable);
        Ok(subs)
    }

    async fn update_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        update: UpdateWebhookSubscription,
    ) -> WebhookResult<Option<WebhookSubscription>> {
        let mut inner = self.inner.write().await;
        let Some(sub) = inner.subscription_mut(tenant_id, id) else {
            return Ok(None);
        };

        let now = Utc::now();
        if let Some(name) = update.name {
            sub.name = name;
        }
        if let Some(url) = update.url {
            sub.url = url;
        }
        if let Some(event_keys) = update.event_keys {
            sub.event_keys = event_keys;
        }
        if let Some(include) = update.include_custom_fields {
            sub.include_custom_fields = include;
        }
        if let Some(active) = update.is_active {
            sub.is_active = active;
        }
        match update.is_disabled {
            Some(true) if !sub.is_disabled => {
                sub.is_disabled = true;
                sub.disabled_at = Some(now);
                sub.disabled_reason = Some(MANUAL_DISABLE_REASON.to_string());
            }
            Some(false) => {
                sub.is_disabled = false;
                sub.disabled_at = None;
                sub.disabled_reason = None;
                sub.consecutive_failure_count = 0;
            }
            _ => {}
        }
        sub.updated_at = now;

        Ok(Some(sub.clone()))
    }

    async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> WebhookResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.subscription_mut(tenant_id, id).is_none() {
            return Ok(false);
        }
        inner.subscriptions.remove(&id);
        Ok(true)
    }

    async fn regenerate_secret(&self, tenant_id: Uuid, id: Uuid) -> WebhookResult<Option<String>> {
        let mut inner = self.inner.write().await;
        Ok(inner.subscription_mut(tenant_id, id).map(|sub| {
            sub.secret = crypto::generate_secret();
            sub.updated_at = Utc::now();
            sub.secret.clone()
        }))
    }

    async fn record_delivery_success(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> WebhookResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(sub) = inner.subscription_mut(tenant_id, id) {
            sub.consecutive_failure_count = 0;
            sub.last_delivery_at = Some(at);
            sub.updated_at = at;
        }
        Ok(())
    }

    async fn record_delivery_failure(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> WebhookResult<Option<i32>> {
        let mut inner = self.inner.write().await;
        Ok(inner.subscription_mut(tenant_id, id).map(|sub| {
            sub.consecutive_failure_count += 1;
            sub.last_delivery_at = Some(at);
            sub.updated_at = at;
            sub.consecutive_failure_count
        }))
    }

    async fn auto_disable(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> WebhookResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.subscription_mut(tenant_id, id) {
            Some(sub) if !sub.is_disabled => {
                sub.is_disabled = true;
                sub.disabled_at = Some(at);
                sub.disabled_reason = Some(reason.to_string());
                sub.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_delivery_log(&self, log: NewDeliveryLog) -> WebhookResult<DeliveryLog> {
        let row = DeliveryLog {
            id: log.id,
            tenant_id: log.tenant_id,
            subscription_id: log.subscription_id,
            event_type: log.event_type,
            entity_id: log.entity_id,
            attempt_number: log.attempt_number,
            success: log.success,
            status_code: log.status_code,
            response_body: log.response_body,
            error_message: log.error_message,
            request_payload: log.request_payload,
            duration_ms: log.duration_ms,
            created_at: Utc::now(),
        };
        self.inner.write().await.logs.push(row.clone());
        Ok(row)
    }

    async fn list_delivery_logs(&self, query: DeliveryLogQuery) -> WebhookResult<Vec<DeliveryLog>> {
        let query = query.clamped();
        let inner = self.inner.read().await;

        // Insertion order is creation order; walk it backwards for newest first.
        Ok(inner
            .logs
            .iter()
            .rev()
            .filter(|l| l.tenant_id == query.tenant_id)
            .filter(|l| query.subscription_id.map_or(true, |id| l.subscription_id == id))
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }
}
