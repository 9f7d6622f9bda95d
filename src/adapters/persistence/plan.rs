use async_trait::async_trait;
use sqlx::{Row, types::Json};
use uuid::Uuid;

use crate::{
    adapters::persistence::{PostgresPersistence, parse_json_with_fallback},
    app_error::{AppError, AppResult},
    application::use_cases::plan_catalog::PlanRepo,
    domain::entities::plan::{FeatureSet, NewPlan, Plan},
};

fn row_to_plan(row: &sqlx::postgres::PgRow) -> Plan {
    let id: Uuid = row.get("id");
    let feature_json: serde_json::Value = row.get("feature_set");
    let feature_set: FeatureSet =
        parse_json_with_fallback(&feature_json, "feature_set", "plan", &id.to_string());

    Plan {
        id,
        name: row.get("name"),
        display_name: row.get("display_name"),
        price_minor_units: row.get("price_minor_units"),
        currency: row.get("currency"),
        duration_days: row.get("duration_days"),
        trial_days: row.get("trial_days"),
        is_recurring: row.get("is_recurring"),
        feature_set,
        provider_price_id: row.get("provider_price_id"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, name, display_name, price_minor_units, currency, duration_days, trial_days,
    is_recurring, feature_set, provider_price_id, is_active, created_at, updated_at
"#;

#[async_trait]
impl PlanRepo for PostgresPersistence {
    async fn list_active(&self) -> AppResult<Vec<Plan>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM plans WHERE is_active ORDER BY price_minor_units ASC, name ASC",
            SELECT_COLS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_plan).collect())
    }

    async fn list_all(&self) -> AppResult<Vec<Plan>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM plans ORDER BY price_minor_units ASC, name ASC",
            SELECT_COLS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_plan).collect())
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Plan>> {
        let row = sqlx::query(&format!("SELECT {} FROM plans WHERE id = $1", SELECT_COLS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_plan))
    }

    async fn upsert_by_name(&self, plan: &NewPlan) -> AppResult<Plan> {
        // Existing plans keep their commercial terms; subscribers bought those.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO plans (
                id, name, display_name, price_minor_units, currency, duration_days,
                trial_days, is_recurring, feature_set, provider_price_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (name) DO UPDATE
                SET provider_price_id = EXCLUDED.provider_price_id,
                    updated_at = NOW()
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(Uuid::new_v4())
        .bind(&plan.name)
        .bind(&plan.display_name)
        .bind(plan.price_minor_units)
        .bind(plan.currency.to_lowercase())
        .bind(plan.duration_days)
        .bind(plan.trial_days)
        .bind(plan.is_recurring)
        .bind(Json(&plan.feature_set))
        .bind(&plan.provider_price_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row_to_plan(&row))
    }

    async fn set_active(&self, id: Uuid, active: bool) -> AppResult<Option<Plan>> {
        let row = sqlx::query(&format!(
            "UPDATE plans SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            SELECT_COLS
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_plan))
    }
}
