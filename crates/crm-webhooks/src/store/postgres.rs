//! PostgreSQL-backed [`WebhookStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::WebhookStore;
use crate::crypto;
use crate::error::{WebhookError, WebhookResult};
use crate::models::{
    DeliveryLog, DeliveryLogQuery, NewDeliveryLog, NewWebhookSubscription,
    UpdateWebhookSubscription, WebhookSubscription, MANUAL_DISABLE_REASON,
};

/// Store over a `sqlx` connection pool. Every query is scoped by `tenant_id`.
#[derive(Clone)]
pub struct PgWebhookStore {
    pool: PgPool,
}

impl PgWebhookStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations from `migrations/`.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if a migration fails to apply.
    pub async fn run_migrations(&self) -> WebhookResult<()> {
        tracing::info!(target: "webhook_delivery", "Running webhook migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| WebhookError::Internal(format!("Migration failed: {e}")))?;

        tracing::info!(target: "webhook_delivery", "Webhook migrations complete");
        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WebhookStore for PgWebhookStore {
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    async fn create_subscription(
        &self,
        input: NewWebhookSubscription,
    ) -> WebhookResult<WebhookSubscription> {
        let secret = input.secret.unwrap_or_else(crypto::generate_secret);

        let sub = sqlx::query_as(
            r#"
            INSERT INTO webhook_subscriptions (
                tenant_id, name, url, secret, event_keys,
                include_custom_fields, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(&input.url)
        .bind(&secret)
        .bind(&input.event_keys)
        .bind(input.include_custom_fields)
        .bind(input.created_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(sub)
    }

    #[instrument(skip(self))]
    async fn get_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> WebhookResult<Option<WebhookSubscription>> {
        let sub = sqlx::query_as(
            r#"
            SELECT * FROM webhook_subscriptions
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sub)
    }

    #[instrument(skip(self))]
    async fn list_subscriptions(&self, tenant_id: Uuid) -> WebhookResult<Vec<WebhookSubscription>> {
        let subs = sqlx::query_as(
            r#"
            SELECT * FROM webhook_subscriptions
            WHERE tenant_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(subs)
    }

    #[instrument(skip(self))]
    async fn list_active_subscriptions(
        &self,
        tenant_id: Uuid,
    ) -> WebhookResult<Vec<WebhookSubscription>> {
        let subs = sqlx::query_as(
            r#"
            SELECT * FROM webhook_subscriptions
            WHERE tenant_id = $1 AND is_active = TRUE AND is_disabled = FALSE
            ORDER BY created_at
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(subs)
    }

    #[instrument(skip(self, update))]
    async fn update_subscription(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        update: UpdateWebhookSubscription,
    ) -> WebhookResult<Option<WebhookSubscription>> {
        let mut updates = vec!["updated_at = NOW()".to_string()];
        // $1=id, $2=tenant_id; binds below follow the same order.
        let mut param_idx = 3;
        let mut next_param = || {
            let placeholder = format!("${param_idx}");
            param_idx += 1;
            placeholder
        };

        if update.name.is_some() {
            updates.push(format!("name = {}", next_param()));
        }
        if update.url.is_some() {
            updates.push(format!("url = {}", next_param()));
        }
        if update.event_keys.is_some() {
            updates.push(format!("event_keys = {}", next_param()));
        }
        if update.include_custom_fields.is_some() {
            updates.push(format!("include_custom_fields = {}", next_param()));
        }
        if update.is_active.is_some() {
            updates.push(format!("is_active = {}", next_param()));
        }
        match update.is_disabled {
            Some(true) => {
                // Keep the original timestamp and reason if already disabled.
                updates.push("disabled_at = COALESCE(disabled_at, NOW())".to_string());
                updates.push(format!(
                    "disabled_reason = COALESCE(disabled_reason, {})",
                    next_param()
                ));
                updates.push("is_disabled = TRUE".to_string());
            }
            Some(false) => {
                updates.push("is_disabled = FALSE".to_string());
                updates.push("disabled_at = NULL".to_string());
                updates.push("disabled_reason = NULL".to_string());
                updates.push("consecutive_failure_count = 0".to_string());
            }
            None => {}
        }

        let query = format!(
            "UPDATE webhook_subscriptions SET {} WHERE id = $1 AND tenant_id = $2 RETURNING *",
            updates.join(", ")
        );

        let mut q = sqlx::query_as::<_, WebhookSubscription>(&query)
            .bind(id)
            .bind(tenant_id);

        if let Some(name) = update.name {
            q = q.bind(name);
        }
        if let Some(url) = update.url {
            q = q.bind(url);
        }
        if let Some(event_keys) = update.event_keys {
            q = q.bind(event_keys);
        }
        if let Some(include) = update.include_custom_fields {
            q = q.bind(include);
        }
        if let Some(active) = update.is_active {
            q = q.bind(active);
        }
        if update.is_disabled == Some(true) {
            q = q.bind(MANUAL_DISABLE_REASON);
        }

        Ok(q.fetch_optional(&self.pool).await?)
    }

    #[instrument(skip(self))]
    async fn delete_subscription(&self, tenant_id: Uuid, id: Uuid) -> WebhookResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_subscriptions
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn regenerate_secret(&self, tenant_id: Uuid, id: Uuid) -> WebhookResult<Option<String>> {
        let secret = crypto::generate_secret();

        let result = sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET secret = $3, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(&secret)
        .execute(&self.pool)
        .await?;

        Ok((result.rows_affected() > 0).then_some(secret))
    }

    #[instrument(skip(self))]
    async fn record_delivery_success(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> WebhookResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET consecutive_failure_count = 0, last_delivery_at = $3, updated_at = $3
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn record_delivery_failure(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> WebhookResult<Option<i32>> {
        let count: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE webhook_subscriptions
            SET consecutive_failure_count = consecutive_failure_count + 1,
                last_delivery_at = $3,
                updated_at = $3
            WHERE id = $1 AND tenant_id = $2
            RETURNING consecutive_failure_count
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(count.map(|(c,)| c))
    }

    #[instrument(skip(self))]
    async fn auto_disable(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> WebhookResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET is_disabled = TRUE, disabled_at = $3, disabled_reason = $4, updated_at = $3
            WHERE id = $1 AND tenant_id = $2 AND is_disabled = FALSE
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(at)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, log), fields(delivery_id = %log.id, subscription_id = %log.subscription_id))]
    async fn create_delivery_log(&self, log: NewDeliveryLog) -> WebhookResult<DeliveryLog> {
        let row = sqlx::query_as(
            r#"
            INSERT INTO webhook_delivery_logs (
                id, tenant_id, subscription_id, event_type, entity_id,
                attempt_number, success, status_code, response_body,
                error_message, request_payload, duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(log.id)
        .bind(log.tenant_id)
        .bind(log.subscription_id)
        .bind(&log.event_type)
        .bind(&log.entity_id)
        .bind(log.attempt_number)
        .bind(log.success)
        .bind(log.status_code)
        .bind(&log.response_body)
        .bind(&log.error_message)
        .bind(&log.request_payload)
        .bind(log.duration_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    #[instrument(skip(self))]
    async fn list_delivery_logs(&self, query: DeliveryLogQuery) -> WebhookResult<Vec<DeliveryLog>> {
        let query = query.clamped();

        let mut sql = String::from(
            r#"
            SELECT * FROM webhook_delivery_logs
            WHERE tenant_id = $1
            "#,
        );
        let mut param_count = 1;

        if query.subscription_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND subscription_id = ${param_count}"));
        }

        sql.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        ));

        let mut q = sqlx::query_as::<_, DeliveryLog>(&sql).bind(query.tenant_id);
        if let Some(subscription_id) = query.subscription_id {
            q = q.bind(subscription_id);
        }

        Ok(q.bind(query.limit).bind(query.offset).fetch_all(&self.pool).await?)
    }
}
