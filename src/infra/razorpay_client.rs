use std::collections::HashMap;
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{
    app_error::{AppError, AppResult},
    domain::entities::payment_provider::PaymentProvider,
    infra::{http_client, stripe_client::constant_time_compare},
};

const RAZORPAY_API_BASE: &str = "https://api.razorpay.com/v1";

#[derive(Clone)]
pub struct RazorpayClient {
    client: Client,
    key_id: String,
    key_secret: SecretString,
}

impl RazorpayClient {
    pub fn new(key_id: String, key_secret: SecretString, request_timeout: Duration) -> Self {
        Self {
            client: http_client::build_client_with_timeout(request_timeout),
            key_id,
            key_secret,
        }
    }

    /// Public key the browser checkout needs alongside the order id.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    // ========================================================================
    // Orders
    // ========================================================================

    pub async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
        notes: &HashMap<String, String>,
    ) -> AppResult<RazorpayOrder> {
        let operation = "create_order";
        let body = CreateOrderReq {
            amount,
            currency: currency.to_uppercase(),
            receipt,
            notes,
        };

        let response = self
            .client
            .post(format!("{}/orders", RAZORPAY_API_BASE))
            .basic_auth(&self.key_id, Some(self.key_secret.expose_secret()))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        handle_response(operation, response).await
    }

    // ========================================================================
    // Payments
    // ========================================================================

    pub async fn fetch_payment(&self, payment_id: &str) -> AppResult<RazorpayPayment> {
        let operation = "fetch_payment";
        let response = self
            .client
            .get(format!("{}/payments/{}", RAZORPAY_API_BASE, payment_id))
            .basic_auth(&self.key_id, Some(self.key_secret.expose_secret()))
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        handle_response(operation, response).await
    }

    // ========================================================================
    // Signatures
    // ========================================================================

    /// Client-side checkout signature: hex HMAC-SHA256 of `order_id|payment_id` keyed
    /// with the API secret.
    pub fn verify_payment_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> AppResult<bool> {
        let expected = hmac_hex(
            self.key_secret.expose_secret(),
            format!("{order_id}|{payment_id}").as_bytes(),
        )?;
        Ok(constant_time_compare(signature, &expected))
    }

    /// Webhook signature: hex HMAC-SHA256 of the raw body keyed with the webhook secret.
    pub fn verify_webhook_signature(
        payload: &[u8],
        signature: &str,
        webhook_secret: &str,
    ) -> AppResult<()> {
        let expected = hmac_hex(webhook_secret, payload)?;
        if constant_time_compare(signature.trim(), &expected) {
            Ok(())
        } else {
            Err(AppError::SignatureInvalid)
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn hmac_hex(secret: &str, message: &[u8]) -> AppResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("HMAC error".into()))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn transport_error(operation: &'static str, e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::ProviderTimeout {
            provider: PaymentProvider::Razorpay,
            operation,
        }
    } else {
        AppError::Provider {
            provider: PaymentProvider::Razorpay,
            operation,
            code: "NETWORK_ERROR".to_string(),
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
        tracing::error!(status = %status, operation, body = %body, "Razorpay API error");

        let (code, message) = match serde_json::from_str::<RazorpayErrorResponse>(&body) {
            Ok(error) => (error.error.code, error.error.description.unwrap_or_default()),
            Err(_) => (status.as_u16().to_string(), body),
        };
        return Err(AppError::Provider {
            provider: PaymentProvider::Razorpay,
            operation,
            code,
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| {
        tracing::error!(body = %body, error = %e, "Failed to parse Razorpay response");
        AppError::Internal(format!("Failed to parse Razorpay response: {}", e))
    })
}

// ============================================================================
// Razorpay Types
// ============================================================================

#[derive(Serialize)]
struct CreateOrderReq<'a> {
    amount: i64,
    currency: String,
    receipt: &'a str,
    notes: &'a HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct RazorpayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

/// `notes` is an object when set and an empty array when not.
fn notes_or_empty<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
            .collect(),
        _ => HashMap::new(),
    })
}

#[derive(Debug, Deserialize)]
pub struct RazorpayPayment {
    pub id: String,
    pub order_id: Option<String>,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub method: Option<String>,
    #[serde(default)]
    pub captured: bool,
    pub email: Option<String>,
    #[serde(default, deserialize_with = "notes_or_empty")]
    pub notes: HashMap<String, String>,
}

impl RazorpayPayment {
    pub fn is_captured(&self) -> bool {
        self.captured || self.status == "captured"
    }
}

#[derive(Debug, Deserialize)]
pub struct RazorpaySubscription {
    pub id: String,
    pub customer_id: Option<String>,
    pub status: String,
    pub current_start: Option<i64>,
    pub current_end: Option<i64>,
    #[serde(default, deserialize_with = "notes_or_empty")]
    pub notes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct RazorpayErrorResponse {
    pub error: RazorpayError,
}

#[derive(Debug, Deserialize)]
pub struct RazorpayError {
    pub code: String,
    pub description: Option<String>,
}

// ============================================================================
// Webhook Event Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RazorpayWebhookEvent {
    pub event: String,
    pub created_at: i64,
    #[serde(default)]
    pub payload: RazorpayWebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct RazorpayWebhookPayload {
    pub payment: Option<RazorpayEntity<RazorpayPayment>>,
    pub subscription: Option<RazorpayEntity<RazorpaySubscription>>,
}

#[derive(Debug, Deserialize)]
pub struct RazorpayEntity<T> {
    pub entity: T,
}
