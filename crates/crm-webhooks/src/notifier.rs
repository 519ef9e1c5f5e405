//! Owner notification when a subscription is auto-disabled.

use async_trait::async_trait;

use crate::error::WebhookResult;
use crate::models::WebhookSubscription;

/// Tells a subscription's creator that it stopped receiving deliveries.
///
/// Called at most once per disable transition. Failures are logged by the
/// caller and never affect delivery state.
#[async_trait]
pub trait OwnerNotifier: Send + Sync {
    async fn subscription_auto_disabled(
        &self,
        subscription: &WebhookSubscription,
        reason: &str,
    ) -> WebhookResult<()>;
}

/// Notifier that only emits a structured warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl OwnerNotifier for LogNotifier {
    async fn subscription_auto_disabled(
        &self,
        subscription: &WebhookSubscription,
        reason: &str,
    ) -> WebhookResult<()> {
        let owner = subscription
            .created_by
            .map_or_else(|| "unknown".to_string(), |id| id.to_string());

        tracing::warn!(
            target: "webhook_delivery",
            subscription_id = %subscription.id,
            tenant_id = %subscription.tenant_id,
            owner_id = %owner,
            subscription_name = %subscription.name,
            reason,
            "Webhook subscription auto-disabled; owner notified"
        );
        Ok(())
    }
}
