//! Per-tenant cache of deliverable subscriptions.
//!
//! Staleness after a subscription write is bounded by the TTL; writers that
//! want the change visible immediately call [`SubscriptionCache::invalidate`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::error::WebhookResult;
use crate::models::WebhookSubscription;
use crate::store::WebhookStore;

/// Read-through cache keyed by tenant id.
#[async_trait]
pub trait SubscriptionCache: Send + Sync {
    /// Deliverable subscriptions for a tenant, loading from `store` on a miss.
    async fn get_or_populate(
        &self,
        tenant_id: Uuid,
        store: &dyn WebhookStore,
    ) -> WebhookResult<Arc<Vec<WebhookSubscription>>>;

    /// Drop the cached entry for a tenant.
    async fn invalidate(&self, tenant_id: Uuid);
}

/// In-process [`SubscriptionCache`] backed by `moka`.
pub struct MokaSubscriptionCache {
    cache: Cache<Uuid, Arc<Vec<WebhookSubscription>>>,
}

impl MokaSubscriptionCache {
    /// Create a cache with the given TTL and tenant capacity.
    #[must_use]
    pub fn new(ttl: Duration, max_tenants: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_tenants)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    #[must_use]
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self::new(config.cache_ttl(), config.cache_max_tenants)
    }

    /// Invalidate all tenants.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl SubscriptionCache for MokaSubscriptionCache {
    async fn get_or_populate(
        &self,
        tenant_id: Uuid,
        store: &dyn WebhookStore,
    ) -> WebhookResult<Arc<Vec<WebhookSubscription>>> {
        if let Some(cached) = self.cache.get(&tenant_id).await {
            return Ok(cached);
        }

        // Cache miss: load from the store
        let subs = store.list_active_subscriptions(tenant_id).await?;

        tracing::debug!(
            target: "webhook_cache",
            tenant_id = %tenant_id,
            subscription_count = subs.len(),
            "Populated subscription cache"
        );

        let subs = Arc::new(subs);
        self.cache.insert(tenant_id, Arc::clone(&subs)).await;
        Ok(subs)
    }

    async fn invalidate(&self, tenant_id: Uuid) {
        self.cache.invalidate(&tenant_id).await;

        tracing::debug!(
            target: "webhook_cache",
            tenant_id = %tenant_id,
            "Invalidated subscription cache"
        );
    }
}
