use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};

use crate::{adapters::http::app_state::AppState, app_error::AppResult};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_plans))
}

/// GET /api/plans
/// Purchasable plans, cheapest first. Public.
async fn list_plans(State(app_state): State<AppState>) -> AppResult<impl IntoResponse> {
    let plans = app_state.plan_catalog.list_plans().await?;
    Ok(Json(plans))
}
