//! Persistent webhook records and the delivery job argument.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Reason recorded when the failure threshold disables a subscription.
pub fn auto_disable_reason(threshold: i32) -> String {
    format!("Auto-disabled after {threshold} consecutive delivery failures")
}

/// A tenant's registration of an HTTPS endpoint and the events pushed to it.
#[derive(Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub url: String,
    /// Signing secret (`whsec_...`). Never logged.
    #[serde(skip_serializing)]
    pub secret: String,
    /// Subscribed event keys of the form `Entity.Kind`, e.g. `Contact.Created`.
    pub event_keys: Vec<String>,
    pub include_custom_fields: bool,
    pub is_active: bool,
    pub is_disabled: bool,
    pub consecutive_failure_count: i32,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub disabled_reason: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscription {
    /// Whether new deliveries may be enqueued or executed for this subscription.
    #[must_use]
    pub fn is_deliverable(&self) -> bool {
        self.is_active && !self.is_disabled
    }

    /// Whether this subscription wants events with the given key.
    #[must_use]
    pub fn subscribes_to(&self, event_key: &str) -> bool {
        self.event_keys.iter().any(|k| k == event_key)
    }
}

impl fmt::Debug for WebhookSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSubscription")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("secret", &"[redacted]")
            .field("event_keys", &self.event_keys)
            .field("include_custom_fields", &self.include_custom_fields)
            .field("is_active", &self.is_active)
            .field("is_disabled", &self.is_disabled)
            .field("consecutive_failure_count", &self.consecutive_failure_count)
            .field("last_delivery_at", &self.last_delivery_at)
            .field("disabled_at", &self.disabled_at)
            .field("disabled_reason", &self.disabled_reason)
            .field("created_by", &self.created_by)
            .finish_non_exhaustive()
    }
}

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct NewWebhookSubscription {
    pub tenant_id: Uuid,
    pub name: String,
    pub url: String,
    /// Explicit secret; a fresh one is generated when `None`.
    pub secret: Option<String>,
    pub event_keys: Vec<String>,
    pub include_custom_fields: bool,
    pub created_by: Option<Uuid>,
}

/// Partial update of a subscription. `None` fields are left unchanged.
///
/// Setting `is_disabled` to `Some(false)` re-enables the subscription and
/// clears its failure counter and disable metadata.
#[derive(Debug, Clone, Default)]
pub struct UpdateWebhookSubscription {
    pub name: Option<String>,
    pub url: Option<String>,
    pub event_keys: Option<Vec<String>>,
    pub include_custom_fields: Option<bool>,
    pub is_active: Option<bool>,
    pub is_disabled: Option<bool>,
}

/// Reason recorded when an administrator disables a subscription by hand.
pub const MANUAL_DISABLE_REASON: &str = "Disabled by administrator";

/// One row per delivery attempt. Immutable once written.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    pub entity_id: String,
    /// 1-based attempt number.
    pub attempt_number: i32,
    pub success: bool,
    pub status_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    /// Exact bytes that were (or would have been) sent.
    pub request_payload: String,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a delivery log row.
#[derive(Debug, Clone)]
pub struct NewDeliveryLog {
    /// Also sent as `X-Webhook-Id`.
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub event_type: String,
    pub entity_id: String,
    pub attempt_number: i32,
    pub success: bool,
    pub status_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub request_payload: String,
    pub duration_ms: i64,
}

/// Paginated delivery log listing, by tenant and optionally by subscription.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryLogQuery {
    pub tenant_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}

impl DeliveryLogQuery {
    /// All logs for a tenant, first page.
    #[must_use]
    pub fn for_tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            subscription_id: None,
            limit: 50,
            offset: 0,
        }
    }

    /// All logs for one subscription, first page.
    #[must_use]
    pub fn for_subscription(tenant_id: Uuid, subscription_id: Uuid) -> Self {
        Self {
            subscription_id: Some(subscription_id),
            ..Self::for_tenant(tenant_id)
        }
    }

    #[must_use]
    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Limit clamped to 1..=100 and a non-negative offset.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            limit: self.limit.clamp(1, 100),
            offset: self.offset.max(0),
            ..self
        }
    }
}

/// Argument of a delivery job. The attempt index travels with the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub subscription_id: Uuid,
    pub tenant_id: Uuid,
    /// Lowercase `entity.kind`, as in the payload envelope.
    pub event_type: String,
    pub entity_id: String,
    /// Canonical payload text. Signed and sent byte-for-byte.
    pub payload: String,
    /// 0-based attempt index.
    pub attempt: u32,
}

impl DeliveryJob {
    /// The same delivery, one attempt later.
    #[must_use]
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription() -> WebhookSubscription {
        let now = Utc::now();
        WebhookSubscription {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "crm sync".to_string(),
            url: "https://hooks.example.com/crm".to_string(),
            secret: "whsec_supersecret".to_string(),
            event_keys: vec!["Contact.Created".to_string(), "Deal.Updated".to_string()],
            include_custom_fields: false,
            is_active: true,
            is_disabled: false,
            consecutive_failure_count: 0,
            last_delivery_at: None,
            disabled_at: None,
            disabled_reason: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_deliverable_requires_active_and_enabled() {
        let mut sub = subscription();
        assert!(sub.is_deliverable());

        sub.is_disabled = true;
        assert!(!sub.is_deliverable());

        sub.is_disabled = false;
        sub.is_active = false;
        assert!(!sub.is_deliverable());
    }

    #[test]
    fn test_subscribes_to_exact_key() {
        let sub = subscription();
        assert!(sub.subscribes_to("Contact.Created"));
        assert!(!sub.subscribes_to("Contact.Deleted"));
        assert!(!sub.subscribes_to("contact.created"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", subscription());
        assert!(!rendered.contains("supersecret"));
        assert!(rendered.contains("[redacted]"));
    }

    #[test]
    fn test_log_query_clamping() {
        let tenant = Uuid::new_v4();
        let q = DeliveryLogQuery::for_tenant(tenant).page(500, -3).clamped();
        assert_eq!(q.limit, 100);
        assert_eq!(q.offset, 0);

        let q = DeliveryLogQuery::for_tenant(tenant).page(0, 10).clamped();
        assert_eq!(q.limit, 1);
        assert_eq!(q.offset, 10);
    }

    #[test]
    fn test_next_attempt_only_bumps_index() {
        let job = DeliveryJob {
            subscription_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            event_type: "contact.created".to_string(),
            entity_id: "42".to_string(),
            payload: "{}".to_string(),
            attempt: 2,
        };
        let next = job.next_attempt();
        assert_eq!(next.attempt, 3);
        assert_eq!(next.payload, job.payload);
        assert_eq!(next.subscription_id, job.subscription_id);
    }

    #[test]
    fn test_auto_disable_reason_text() {
        assert_eq!(
            auto_disable_reason(50),
            "Auto-disabled after 50 consecutive delivery failures"
        );
    }
}
