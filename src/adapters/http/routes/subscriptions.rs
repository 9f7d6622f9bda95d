use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    adapters::http::{app_state::AppState, extractors::AuthUser},
    app_error::{AppError, AppResult},
    application::{
        ports::payment_gateway::CheckoutUrls,
        use_cases::billing::{CheckoutOutcome, PaymentConfirmation},
    },
    domain::entities::{plan::Plan, subscription::Subscription},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/current", get(get_current))
        .route("/payments", get(list_payments))
        .route("/checkout", post(checkout))
        .route("/verify-payment", post(verify_payment))
        .route("/cancel", post(cancel))
        .route("/change", post(change_plan))
}

#[derive(Serialize)]
struct CurrentSubscriptionResponse {
    subscription: Option<Subscription>,
    plan: Option<Plan>,
}

/// GET /api/subscriptions/current
async fn get_current(
    State(app_state): State<AppState>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    let Some(subscription) = app_state
        .subscriptions
        .current_for_user(user.user_id)
        .await?
    else {
        return Ok(Json(CurrentSubscriptionResponse {
            subscription: None,
            plan: None,
        }));
    };

    let plan = app_state.plan_catalog.get_plan(subscription.plan_id).await?;
    Ok(Json(CurrentSubscriptionResponse {
        subscription: Some(subscription),
        plan: Some(plan),
    }))
}

/// GET /api/subscriptions/payments
async fn list_payments(
    State(app_state): State<AppState>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    let payments = app_state
        .subscriptions
        .payments_for_user(user.user_id)
        .await?;
    Ok(Json(payments))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutPayload {
    plan_id: Uuid,
    success_url: Option<String>,
    cancel_url: Option<String>,
}

/// POST /api/subscriptions/checkout
/// Trial plans start immediately; paid plans return what the client needs to pay.
async fn checkout(
    State(app_state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CheckoutPayload>,
) -> AppResult<impl IntoResponse> {
    let origin = app_state.config.app_origin.as_str().trim_end_matches('/');
    let urls = CheckoutUrls {
        success_url: payload
            .success_url
            .unwrap_or_else(|| format!("{origin}/billing/success")),
        cancel_url: payload
            .cancel_url
            .unwrap_or_else(|| format!("{origin}/billing")),
    };

    let outcome = app_state
        .billing
        .checkout(user.customer(), payload.plan_id, urls)
        .await?;

    let body = match outcome {
        CheckoutOutcome::Trial { subscription } => {
            json!({ "kind": "trial", "subscription": subscription })
        }
        CheckoutOutcome::Payment { provider, checkout } => {
            let mut body = serde_json::to_value(&checkout)
                .map_err(|e| AppError::Internal(format!("Failed to encode checkout: {e}")))?;
            body["provider"] = json!(provider);
            body
        }
    };
    Ok(Json(body))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPaymentPayload {
    payment_id: String,
    order_id: String,
    signature: String,
    plan_id: Uuid,
}

/// POST /api/subscriptions/verify-payment
async fn verify_payment(
    State(app_state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<VerifyPaymentPayload>,
) -> AppResult<impl IntoResponse> {
    if payload.payment_id.trim().is_empty() || payload.order_id.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "paymentId and orderId are required".into(),
        ));
    }

    let subscription = app_state
        .billing
        .verify_payment(
            user.customer(),
            PaymentConfirmation {
                plan_id: payload.plan_id,
                order_id: payload.order_id,
                payment_id: payload.payment_id,
                signature: payload.signature,
            },
        )
        .await?;
    Ok(Json(subscription))
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelPayload {
    #[serde(default = "default_true")]
    cancel_at_period_end: bool,
}

/// POST /api/subscriptions/cancel
async fn cancel(
    State(app_state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CancelPayload>,
) -> AppResult<impl IntoResponse> {
    let subscription = app_state
        .billing
        .cancel(user.user_id, payload.cancel_at_period_end)
        .await?;
    Ok(Json(subscription))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePlanPayload {
    new_plan_id: Uuid,
}

/// POST /api/subscriptions/change
async fn change_plan(
    State(app_state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ChangePlanPayload>,
) -> AppResult<impl IntoResponse> {
    let subscription = app_state
        .billing
        .change_plan(user.user_id, payload.new_plan_id)
        .await?;
    Ok(Json(subscription))
}
