use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::{
        ports::notifier::NoticeTemplate, use_cases::reconciliation::NotificationLogRepo,
    },
};

#[async_trait]
impl NotificationLogRepo for PostgresPersistence {
    async fn claim(
        &self,
        subscription_id: Uuid,
        template: NoticeTemplate,
        sent_on: NaiveDate,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_log (subscription_id, template, sent_on)
            VALUES ($1, $2, $3)
            ON CONFLICT (subscription_id, template, sent_on) DO NOTHING
            "#,
        )
        .bind(subscription_id)
        .bind(template.as_ref())
        .bind(sent_on)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(
        &self,
        subscription_id: Uuid,
        template: NoticeTemplate,
        sent_on: NaiveDate,
    ) -> AppResult<()> {
        sqlx::query(
            "DELETE FROM notification_log WHERE subscription_id = $1 AND template = $2 AND sent_on = $3",
        )
        .bind(subscription_id)
        .bind(template.as_ref())
        .bind(sent_on)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }
}
