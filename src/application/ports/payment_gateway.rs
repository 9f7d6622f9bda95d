use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    domain::entities::{
        billing_event::WebhookEnvelope, payment_provider::PaymentProvider, plan::Plan,
    },
};

// ============================================================================
// Port Types - Provider-agnostic domain types
// ============================================================================

/// The authenticated user starting a checkout.
#[derive(Debug, Clone)]
pub struct CheckoutCustomer {
    pub user_id: Uuid,
    pub email: String,
}

/// URLs for checkout redirects
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

/// What the client needs to complete payment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CheckoutHandle {
    /// Hosted checkout page (recurring plans).
    #[serde(rename_all = "camelCase")]
    Redirect { url: String, session_id: String },
    /// Provider order the client pays inline, then confirms with a signature.
    #[serde(rename_all = "camelCase")]
    Order {
        order_id: String,
        amount: i64,
        currency: String,
        key_id: String,
    },
}

/// Settlement state of a payment as reported by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDetails {
    pub payment_id: String,
    pub order_id: Option<String>,
    pub captured: bool,
    pub amount_minor_units: i64,
    pub currency: String,
    pub method: Option<String>,
}

// ============================================================================
// Port Trait
// ============================================================================

/// Uniform interface over payment providers. The state machine never branches on
/// provider identity; new providers implement this trait.
#[async_trait]
pub trait PaymentGatewayPort: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Start a checkout for `plan`. Recurring providers return a redirect, order-based
    /// providers an order handle.
    async fn create_checkout(
        &self,
        customer: &CheckoutCustomer,
        plan: &Plan,
        urls: &CheckoutUrls,
    ) -> AppResult<CheckoutHandle>;

    /// Check the client-side confirmation signature for an order payment.
    fn verify_payment(&self, payment_id: &str, order_id: &str, signature: &str) -> AppResult<bool>;

    async fn fetch_payment(&self, payment_id: &str) -> AppResult<PaymentDetails>;

    async fn cancel_recurring(&self, provider_subscription_id: &str, at_period_end: bool)
    -> AppResult<()>;

    /// Move a provider subscription to another price; proration is the provider's call.
    async fn change_recurring_plan(
        &self,
        provider_subscription_id: &str,
        new_price_id: &str,
    ) -> AppResult<()>;

    /// Authenticate a webhook over the raw, unparsed request body.
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> AppResult<()>;

    /// Map a verified webhook onto the internal event set.
    fn parse_webhook(&self, payload: &[u8]) -> AppResult<WebhookEnvelope>;
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Clone, Default)]
pub struct PaymentGateways {
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGatewayPort>>,
}

impl PaymentGateways {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGatewayPort>) -> Self {
        self.gateways.insert(gateway.provider(), gateway);
        self
    }

    pub fn get(&self, provider: PaymentProvider) -> AppResult<Arc<dyn PaymentGatewayPort>> {
        self.gateways.get(&provider).cloned().ok_or_else(|| {
            AppError::InvalidInput(format!("{} is not configured", provider.display_name()))
        })
    }

    /// Gateway billing `plan`, or `None` for locally issued trials.
    pub fn for_plan(&self, plan: &Plan) -> AppResult<Option<Arc<dyn PaymentGatewayPort>>> {
        plan.billing_provider().map(|p| self.get(p)).transpose()
    }
}
