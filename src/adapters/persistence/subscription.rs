use async_trait::async_trait;
use sqlx::{PgExecutor, Row};
use uuid::Uuid;

use crate::{
    adapters::persistence::{PostgresPersistence, payment_record::insert_payment},
    app_error::{AppError, AppResult},
    application::use_cases::subscription::{SubscriptionRepo, SubscriptionWrite},
    domain::entities::{
        payment_provider::PaymentProvider,
        payment_record::PaymentRecord,
        subscription::{Subscription, SubscriptionStatus},
    },
};

fn row_to_subscription(row: &sqlx::postgres::PgRow) -> Subscription {
    Subscription {
        id: row.get("id"),
        user_id: row.get("user_id"),
        user_email: row.get("user_email"),
        plan_id: row.get("plan_id"),
        provider: row.get::<Option<PaymentProvider>, _>("provider"),
        status: row.get("status"),
        current_period_start: row.get("current_period_start"),
        current_period_end: row.get("current_period_end"),
        trial_start: row.get("trial_start"),
        trial_end: row.get("trial_end"),
        cancel_at_period_end: row.get("cancel_at_period_end"),
        provider_customer_id: row.get("provider_customer_id"),
        provider_subscription_id: row.get("provider_subscription_id"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, user_id, user_email, plan_id, provider, status,
    current_period_start, current_period_end, trial_start, trial_end,
    cancel_at_period_end, provider_customer_id, provider_subscription_id,
    version, created_at, updated_at
"#;

fn status_names(statuses: &[SubscriptionStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.to_string()).collect()
}

async fn insert_subscription<'e, E: PgExecutor<'e>>(
    executor: E,
    s: &Subscription,
) -> AppResult<Subscription> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO subscriptions (
            id, user_id, user_email, plan_id, provider, status,
            current_period_start, current_period_end, trial_start, trial_end,
            cancel_at_period_end, provider_customer_id, provider_subscription_id,
            version, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 0, $14, $15)
        RETURNING {}
        "#,
        SELECT_COLS
    ))
    .bind(s.id)
    .bind(s.user_id)
    .bind(&s.user_email)
    .bind(s.plan_id)
    .bind(s.provider)
    .bind(s.status)
    .bind(s.current_period_start)
    .bind(s.current_period_end)
    .bind(s.trial_start)
    .bind(s.trial_end)
    .bind(s.cancel_at_period_end)
    .bind(&s.provider_customer_id)
    .bind(&s.provider_subscription_id)
    .bind(s.created_at)
    .bind(s.updated_at)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)?;
    Ok(row_to_subscription(&row))
}

/// Compare-and-set on `version`; zero rows means someone else wrote first.
async fn update_subscription<'e, E: PgExecutor<'e>>(
    executor: E,
    s: &Subscription,
    expected_version: i64,
) -> AppResult<Subscription> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE subscriptions
        SET user_email = $3,
            plan_id = $4,
            provider = $5,
            status = $6,
            current_period_start = $7,
            current_period_end = $8,
            trial_start = $9,
            trial_end = $10,
            cancel_at_period_end = $11,
            provider_customer_id = $12,
            provider_subscription_id = $13,
            updated_at = $14,
            version = version + 1
        WHERE id = $1 AND version = $2
        RETURNING {}
        "#,
        SELECT_COLS
    ))
    .bind(s.id)
    .bind(expected_version)
    .bind(&s.user_email)
    .bind(s.plan_id)
    .bind(s.provider)
    .bind(s.status)
    .bind(s.current_period_start)
    .bind(s.current_period_end)
    .bind(s.trial_start)
    .bind(s.trial_end)
    .bind(s.cancel_at_period_end)
    .bind(&s.provider_customer_id)
    .bind(&s.provider_subscription_id)
    .bind(s.updated_at)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)?;

    match row {
        Some(row) => Ok(row_to_subscription(&row)),
        None => {
            tracing::warn!(subscription_id = %s.id, expected_version, "Version check failed");
            Err(AppError::ConcurrentModification)
        }
    }
}

#[async_trait]
impl SubscriptionRepo for PostgresPersistence {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1",
            SELECT_COLS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_subscription))
    }

    async fn get_latest_for_user(&self, user_id: Uuid) -> AppResult<Option<Subscription>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE user_id = $1
            ORDER BY (status IN ('trialing', 'active', 'past_due')) DESC, created_at DESC
            LIMIT 1
            "#,
            SELECT_COLS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_subscription))
    }

    async fn get_by_provider_subscription_id(
        &self,
        provider: PaymentProvider,
        provider_subscription_id: &str,
    ) -> AppResult<Option<Subscription>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE provider = $1 AND provider_subscription_id = $2
            ORDER BY (status IN ('trialing', 'active', 'past_due')) DESC, created_at DESC
            LIMIT 1
            "#,
            SELECT_COLS
        ))
        .bind(provider)
        .bind(provider_subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_subscription))
    }

    async fn list_by_status(&self, statuses: &[SubscriptionStatus]) -> AppResult<Vec<Subscription>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE status::text = ANY($1)
            ORDER BY current_period_end ASC
            "#,
            SELECT_COLS
        ))
        .bind(status_names(statuses))
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_subscription).collect())
    }

    async fn count_by_status(&self) -> AppResult<Vec<(SubscriptionStatus, i64)>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM subscriptions GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(rows
            .iter()
            .map(|row| (row.get("status"), row.get("count")))
            .collect())
    }

    async fn insert(&self, subscription: &Subscription) -> AppResult<Subscription> {
        insert_subscription(&self.pool, subscription).await
    }

    async fn update(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> AppResult<Subscription> {
        update_subscription(&self.pool, subscription, expected_version).await
    }

    async fn write_with_payment(
        &self,
        write: SubscriptionWrite,
        payment: &PaymentRecord,
    ) -> AppResult<Subscription> {
        let mut tx = self.pool.begin().await.map_err(AppError::from)?;

        let saved = match &write {
            SubscriptionWrite::Insert(subscription) => {
                insert_subscription(&mut *tx, subscription).await?
            }
            SubscriptionWrite::Update {
                subscription,
                expected_version,
            } => update_subscription(&mut *tx, subscription, *expected_version).await?,
        };
        insert_payment(&mut *tx, payment).await?;

        tx.commit().await.map_err(AppError::from)?;
        Ok(saved)
    }
}
