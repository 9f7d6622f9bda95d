use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::webhook::ProcessedWebhookRepo,
    domain::entities::payment_provider::PaymentProvider,
};

#[async_trait]
impl ProcessedWebhookRepo for PostgresPersistence {
    async fn is_processed(&self, provider: PaymentProvider, event_id: &str) -> AppResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM processed_webhook_events
                WHERE provider = $1 AND provider_event_id = $2
            ) AS found
            "#,
        )
        .bind(provider)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.get("found"))
    }

    async fn mark_processed(
        &self,
        provider: PaymentProvider,
        event_id: &str,
        event_type: &str,
        processed_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_webhook_events (provider, provider_event_id, event_type, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider, provider_event_id) DO NOTHING
            "#,
        )
        .bind(provider)
        .bind(event_id)
        .bind(event_type)
        .bind(processed_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }
}
