use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{
    app_error::{AppError, AppResult},
    domain::entities::payment_provider::PaymentProvider,
    infra::http_client,
};

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Signed webhooks older (or newer) than this are rejected.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
}

impl StripeClient {
    pub fn new(secret_key: SecretString, request_timeout: Duration) -> Self {
        Self {
            client: http_client::build_client_with_timeout(request_timeout),
            secret_key,
        }
    }

    fn auth_header(&self) -> String {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:", self.secret_key.expose_secret()));
        format!("Basic {}", encoded)
    }

    // ========================================================================
    // Customers
    // ========================================================================

    pub async fn get_or_create_customer(
        &self,
        email: &str,
        metadata: &HashMap<String, String>,
    ) -> AppResult<StripeCustomer> {
        let operation = "get_or_create_customer";
        let response = self
            .client
            .get(format!("{}/customers", STRIPE_API_BASE))
            .header("Authorization", self.auth_header())
            .query(&[("email", email), ("limit", "1")])
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        let list: StripeCustomerList = handle_response(operation, response).await?;
        if let Some(customer) = list.data.into_iter().next() {
            return Ok(customer);
        }

        let mut params: Vec<(String, String)> = vec![("email".to_string(), email.to_string())];
        for (key, value) in metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
        }

        let response = self
            .client
            .post(format!("{}/customers", STRIPE_API_BASE))
            .header("Authorization", self.auth_header())
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        handle_response(operation, response).await
    }

    // ========================================================================
    // Checkout Sessions
    // ========================================================================

    /// Hosted checkout for a subscription. `metadata` is copied onto the subscription so
    /// that its invoices identify the buyer and plan.
    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        success_url: &str,
        cancel_url: &str,
        client_reference_id: &str,
        metadata: &HashMap<String, String>,
    ) -> AppResult<StripeCheckoutSession> {
        let operation = "create_checkout_session";
        let mut params: Vec<(String, String)> = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("mode".to_string(), "subscription".to_string()),
            ("line_items[0][price]".to_string(), price_id.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), success_url.to_string()),
            ("cancel_url".to_string(), cancel_url.to_string()),
            (
                "client_reference_id".to_string(),
                client_reference_id.to_string(),
            ),
        ];
        for (key, value) in metadata {
            params.push((format!("subscription_data[metadata][{}]", key), value.clone()));
        }

        let response = self
            .client
            .post(format!("{}/checkout/sessions", STRIPE_API_BASE))
            .header("Authorization", self.auth_header())
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        handle_response(operation, response).await
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub async fn get_subscription(&self, subscription_id: &str) -> AppResult<StripeSubscription> {
        let operation = "get_subscription";
        let response = self
            .client
            .get(format!("{}/subscriptions/{}", STRIPE_API_BASE, subscription_id))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        handle_response(operation, response).await
    }

    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> AppResult<StripeSubscription> {
        let operation = "cancel_subscription";
        let request = if at_period_end {
            self.client
                .post(format!("{}/subscriptions/{}", STRIPE_API_BASE, subscription_id))
                .form(&[("cancel_at_period_end", "true")])
        } else {
            self.client
                .delete(format!("{}/subscriptions/{}", STRIPE_API_BASE, subscription_id))
        };

        let response = request
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        handle_response(operation, response).await
    }

    /// Swaps the subscription's single item onto `new_price_id`; Stripe prorates.
    pub async fn update_subscription_price(
        &self,
        subscription_id: &str,
        item_id: &str,
        new_price_id: &str,
    ) -> AppResult<StripeSubscription> {
        let operation = "update_subscription_price";
        let params = [
            ("items[0][id]", item_id),
            ("items[0][price]", new_price_id),
            ("proration_behavior", "create_prorations"),
        ];

        let response = self
            .client
            .post(format!("{}/subscriptions/{}", STRIPE_API_BASE, subscription_id))
            .header("Authorization", self.auth_header())
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        handle_response(operation, response).await
    }

    // ========================================================================
    // Webhook Signature Verification
    // ========================================================================

    /// Checks a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against the raw
    /// body. `now_unix` is injected so tolerance can be tested.
    pub fn verify_webhook_signature(
        payload: &[u8],
        signature_header: &str,
        webhook_secret: &str,
        now_unix: i64,
    ) -> AppResult<()> {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = Some(value),
                "v1" => signatures.push(value),
                _ => {}
            }
        }

        let Some(timestamp) = timestamp else {
            return Err(AppError::SignatureInvalid);
        };
        if signatures.is_empty() {
            return Err(AppError::SignatureInvalid);
        }

        let mut mac = Hmac::<Sha256>::new_from_slice(webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal("HMAC error".into()))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        if !signatures
            .iter()
            .any(|sig| constant_time_compare(sig, &expected))
        {
            return Err(AppError::SignatureInvalid);
        }

        let ts: i64 = timestamp.parse().map_err(|_| AppError::SignatureInvalid)?;
        if (now_unix - ts).abs() > WEBHOOK_TOLERANCE_SECS {
            tracing::warn!(timestamp = ts, now = now_unix, "Stripe webhook outside tolerance");
            return Err(AppError::SignatureInvalid);
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn transport_error(operation: &'static str, e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::ProviderTimeout {
            provider: PaymentProvider::Stripe,
            operation,
        }
    } else {
        AppError::Provider {
            provider: PaymentProvider::Stripe,
            operation,
            code: "network_error".to_string(),
            message: e.to_string(),
        }
    }
}

async fn handle_response<T: for<'de> Deserialize<'de>>(
    operation: &'static str,
    response: reqwest::Response,
) -> AppResult<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(operation, e))?;

    if !status.is_success() {
        tracing::error!(status = %status, operation, body = %body, "Stripe API error");

        let (code, message) = match serde_json::from_str::<StripeErrorResponse>(&body) {
            Ok(error) => (
                error.error.code.unwrap_or(error.error.error_type),
                error.error.message.unwrap_or_default(),
            ),
            Err(_) => (status.as_u16().to_string(), body),
        };
        return Err(AppError::Provider {
            provider: PaymentProvider::Stripe,
            operation,
            code,
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| {
        tracing::error!(body = %body, error = %e, "Failed to parse Stripe response");
        AppError::Internal(format!("Failed to parse Stripe response: {}", e))
    })
}

pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

// ============================================================================
// Stripe Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomerList {
    pub data: Vec<StripeCustomer>,
}

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    pub items: StripeSubscriptionItems,
}

impl StripeSubscription {
    pub fn first_item_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.id.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionItems {
    pub data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct StripeErrorResponse {
    pub error: StripeError,
}

#[derive(Debug, Deserialize)]
pub struct StripeError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: Option<String>,
    pub code: Option<String>,
}

// ============================================================================
// Webhook Event Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeWebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEventData {
    pub object: serde_json::Value,
}

impl StripeWebhookEvent {
    pub fn invoice(&self) -> Option<StripeInvoice> {
        serde_json::from_value(self.data.object.clone()).ok()
    }

    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub customer: Option<String>,
    pub customer_email: Option<String>,
    pub subscription: Option<String>,
    pub billing_reason: Option<String>,
    pub amount_paid: i64,
    pub currency: String,
    #[serde(default)]
    pub subscription_details: Option<StripeSubscriptionDetails>,
    pub lines: StripeInvoiceLines,
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeSubscriptionDetails {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoiceLines {
    pub data: Vec<StripeInvoiceLine>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoiceLine {
    pub period: StripePeriod,
}

#[derive(Debug, Deserialize)]
pub struct StripePeriod {
    pub start: i64,
    pub end: i64,
}
