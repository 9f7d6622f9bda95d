use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, Row};
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::subscription::PaymentRecordRepo,
    domain::entities::payment_record::PaymentRecord,
};

fn row_to_payment(row: &sqlx::postgres::PgRow) -> PaymentRecord {
    PaymentRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        subscription_id: row.get("subscription_id"),
        provider: row.get("provider"),
        provider_payment_id: row.get("provider_payment_id"),
        amount_minor_units: row.get("amount_minor_units"),
        currency: row.get("currency"),
        status: row.get("status"),
        method: row.get("method"),
        created_at: row.get("created_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, user_id, subscription_id, provider, provider_payment_id,
    amount_minor_units, currency, status, method, created_at
"#;

/// Ledger rows are append-only; there is no update path.
pub(super) async fn insert_payment<'e, E: PgExecutor<'e>>(
    executor: E,
    p: &PaymentRecord,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO payment_records (
            id, user_id, subscription_id, provider, provider_payment_id,
            amount_minor_units, currency, status, method, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(p.id)
    .bind(p.user_id)
    .bind(p.subscription_id)
    .bind(p.provider)
    .bind(&p.provider_payment_id)
    .bind(p.amount_minor_units)
    .bind(&p.currency)
    .bind(p.status)
    .bind(&p.method)
    .bind(p.created_at)
    .execute(executor)
    .await
    .map_err(AppError::from)?;
    Ok(())
}

#[async_trait]
impl PaymentRecordRepo for PostgresPersistence {
    async fn get_by_provider_payment_id(
        &self,
        provider_payment_id: &str,
    ) -> AppResult<Option<PaymentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payment_records WHERE provider_payment_id = $1",
            SELECT_COLS
        ))
        .bind(provider_payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_payment))
    }

    async fn list_by_user(&self, user_id: Uuid) -> AppResult<Vec<PaymentRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payment_records WHERE user_id = $1 ORDER BY created_at DESC",
            SELECT_COLS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_payment).collect())
    }

    async fn has_succeeded_since(
        &self,
        subscription_id: Uuid,
        since: DateTime<Utc>,
    ) -> AppResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM payment_records
                WHERE subscription_id = $1 AND status = 'succeeded' AND created_at > $2
            ) AS found
            "#,
        )
        .bind(subscription_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.get("found"))
    }

    async fn list_since(&self, since: DateTime<Utc>) -> AppResult<Vec<PaymentRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payment_records WHERE created_at >= $1 ORDER BY created_at ASC",
            SELECT_COLS
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_payment).collect())
    }
}
