use axum::{
    Json, Router,
    extract::{Path, State},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    adapters::http::{app_state::AppState, middleware::require_admin_token},
    app_error::AppResult,
};

pub fn router(app_state: AppState) -> Router<AppState> {
    Router::new()
        .route("/analytics", get(get_analytics))
        .route("/plans", get(list_all_plans))
        .route("/plans/{plan_id}/active", post(set_plan_active))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            require_admin_token,
        ))
}

/// GET /api/admin/analytics
/// Latest weekly snapshot; computed on demand before the first sweep has run.
async fn get_analytics(State(app_state): State<AppState>) -> AppResult<impl IntoResponse> {
    let snapshot = match app_state.reconciliation.latest_analytics()? {
        Some(snapshot) => snapshot,
        None => {
            app_state
                .reconciliation
                .analytics_sweep(app_state.clock.now())
                .await?
        }
    };
    Ok(Json(snapshot))
}

/// GET /api/admin/plans
/// Every plan, including deactivated ones.
async fn list_all_plans(State(app_state): State<AppState>) -> AppResult<impl IntoResponse> {
    let plans = app_state.plan_catalog.list_all_plans().await?;
    Ok(Json(plans))
}

#[derive(Deserialize)]
struct SetActivePayload {
    active: bool,
}

/// POST /api/admin/plans/{plan_id}/active
async fn set_plan_active(
    State(app_state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    Json(payload): Json<SetActivePayload>,
) -> AppResult<impl IntoResponse> {
    let plan = app_state
        .plan_catalog
        .set_plan_active(plan_id, payload.active)
        .await?;
    tracing::info!(plan = %plan.name, active = plan.is_active, "Plan availability changed");
    Ok(Json(plan))
}
