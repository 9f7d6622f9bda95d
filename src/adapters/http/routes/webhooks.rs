//! Provider webhook intake. The body is taken as raw bytes so the signature is checked
//! over exactly what the provider sent.

use std::str::FromStr;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use serde_json::json;

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult},
    domain::entities::payment_provider::PaymentProvider,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/{provider}", post(handle_webhook))
}

/// POST /api/webhooks/{provider}
///
/// 200 once the event is applied, recognised as a duplicate, or deliberately skipped.
/// Retryable failures surface as 5xx so the provider redelivers.
async fn handle_webhook(
    State(app_state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let provider = PaymentProvider::from_str(&provider).map_err(|_| AppError::NotFound)?;

    let signature = headers
        .get(provider.signature_header())
        .and_then(|v| v.to_str().ok());

    match app_state.webhooks.handle(provider, &body, signature).await {
        Ok(outcome) => Ok((
            StatusCode::OK,
            Json(json!({ "received": true, "outcome": outcome })),
        )),
        Err(e) if e.is_retryable() => {
            tracing::error!(
                %provider,
                error = %e,
                retryable = true,
                "Webhook processing failed, returning 5xx for redelivery"
            );
            Err(e)
        }
        Err(e) => Err(e),
    }
}
