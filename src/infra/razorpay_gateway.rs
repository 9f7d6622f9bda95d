use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::payment_gateway::{
        CheckoutCustomer, CheckoutHandle, CheckoutUrls, PaymentDetails, PaymentGatewayPort,
    },
    domain::entities::{
        billing_event::{BillingEvent, OneTimePayment, RecurringCharge, WebhookEnvelope},
        payment_provider::PaymentProvider,
        payment_record::PaymentFacts,
        plan::Plan,
    },
    infra::razorpay_client::{
        RazorpayClient, RazorpayPayment, RazorpaySubscription, RazorpayWebhookEvent,
    },
};

/// Razorpay bills the fixed-term plans with an order the browser pays inline. The
/// buyer and plan ride along in the order notes.
pub struct RazorpayGateway {
    client: RazorpayClient,
    webhook_secret: SecretString,
}

impl RazorpayGateway {
    pub fn new(client: RazorpayClient, webhook_secret: SecretString) -> Self {
        Self {
            client,
            webhook_secret,
        }
    }
}

fn note_uuid(notes: &HashMap<String, String>, key: &str) -> Option<Uuid> {
    notes.get(key).and_then(|v| Uuid::parse_str(v).ok())
}

fn payment_facts(payment: &RazorpayPayment) -> PaymentFacts {
    PaymentFacts {
        provider: PaymentProvider::Razorpay,
        provider_payment_id: payment.id.clone(),
        amount_minor_units: payment.amount,
        currency: payment.currency.clone(),
        method: payment.method.clone(),
    }
}

fn one_time_payment(payment: &RazorpayPayment) -> Option<OneTimePayment> {
    let (Some(user_id), Some(plan_id)) = (
        note_uuid(&payment.notes, "user_id"),
        note_uuid(&payment.notes, "plan_id"),
    ) else {
        tracing::warn!(payment_id = %payment.id, "Razorpay payment without user/plan notes");
        return None;
    };

    Some(OneTimePayment {
        user_id,
        plan_id,
        user_email: payment
            .notes
            .get("email")
            .cloned()
            .or_else(|| payment.email.clone()),
        order_id: payment.order_id.clone(),
        payment: payment_facts(payment),
    })
}

fn recurring_charge(
    subscription: &RazorpaySubscription,
    payment: &RazorpayPayment,
) -> Option<RecurringCharge> {
    let period_start = DateTime::<Utc>::from_timestamp(subscription.current_start?, 0)?;
    let period_end = DateTime::<Utc>::from_timestamp(subscription.current_end?, 0)?;

    Some(RecurringCharge {
        provider_subscription_id: subscription.id.clone(),
        provider_customer_id: subscription.customer_id.clone(),
        user_id: note_uuid(&subscription.notes, "user_id"),
        plan_id: note_uuid(&subscription.notes, "plan_id"),
        user_email: payment.email.clone(),
        period_start,
        period_end,
        payment: payment_facts(payment),
    })
}

/// Razorpay sends the event id only as a header, so the id is derived from the entities
/// the event is about. Redeliveries carry identical entities.
fn derive_event_id(event: &RazorpayWebhookEvent) -> String {
    let payment_id = event.payload.payment.as_ref().map(|p| p.entity.id.as_str());
    let subscription_id = event
        .payload
        .subscription
        .as_ref()
        .map(|s| s.entity.id.as_str());

    match (subscription_id, payment_id) {
        (Some(sub), Some(pay)) => format!("{}:{}:{}", event.event, sub, pay),
        (Some(sub), None) => format!("{}:{}:{}", event.event, sub, event.created_at),
        (None, Some(pay)) => format!("{}:{}", event.event, pay),
        (None, None) => format!("{}:{}", event.event, event.created_at),
    }
}

fn map_event(event: &RazorpayWebhookEvent) -> Option<BillingEvent> {
    let payment = event.payload.payment.as_ref().map(|p| &p.entity);
    let subscription = event.payload.subscription.as_ref().map(|s| &s.entity);

    match event.event.as_str() {
        "payment.captured" => one_time_payment(payment?).map(BillingEvent::PaymentSucceeded),
        "payment.failed" => one_time_payment(payment?).map(BillingEvent::PaymentFailed),
        "subscription.charged" => {
            recurring_charge(subscription?, payment?).map(BillingEvent::SubscriptionRenewed)
        }
        "subscription.pending" | "subscription.halted" => {
            Some(BillingEvent::SubscriptionPastDue {
                provider_subscription_id: subscription?.id.clone(),
            })
        }
        "subscription.cancelled" => Some(BillingEvent::SubscriptionCancelled {
            provider_subscription_id: subscription?.id.clone(),
        }),
        _ => None,
    }
}

#[async_trait]
impl PaymentGatewayPort for RazorpayGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Razorpay
    }

    async fn create_checkout(
        &self,
        customer: &CheckoutCustomer,
        plan: &Plan,
        _urls: &CheckoutUrls,
    ) -> AppResult<CheckoutHandle> {
        let notes = HashMap::from([
            ("user_id".to_string(), customer.user_id.to_string()),
            ("plan_id".to_string(), plan.id.to_string()),
            ("email".to_string(), customer.email.clone()),
        ]);
        let receipt = format!("rcpt_{}", Uuid::new_v4().simple());

        let order = self
            .client
            .create_order(plan.price_minor_units, &plan.currency, &receipt, &notes)
            .await?;

        tracing::info!(order_id = %order.id, status = %order.status, "Razorpay order created");
        Ok(CheckoutHandle::Order {
            order_id: order.id,
            amount: order.amount,
            currency: order.currency,
            key_id: self.client.key_id().to_string(),
        })
    }

    fn verify_payment(&self, payment_id: &str, order_id: &str, signature: &str) -> AppResult<bool> {
        self.client
            .verify_payment_signature(order_id, payment_id, signature)
    }

    async fn fetch_payment(&self, payment_id: &str) -> AppResult<PaymentDetails> {
        let payment = self.client.fetch_payment(payment_id).await?;
        Ok(PaymentDetails {
            captured: payment.is_captured(),
            payment_id: payment.id,
            order_id: payment.order_id,
            amount_minor_units: payment.amount,
            currency: payment.currency,
            method: payment.method,
        })
    }

    async fn cancel_recurring(
        &self,
        _provider_subscription_id: &str,
        _at_period_end: bool,
    ) -> AppResult<()> {
        Err(AppError::InvalidInput(
            "Razorpay plans are fixed-term and do not renew".into(),
        ))
    }

    async fn change_recurring_plan(
        &self,
        _provider_subscription_id: &str,
        _new_price_id: &str,
    ) -> AppResult<()> {
        Err(AppError::InvalidInput(
            "Razorpay plans are fixed-term and cannot be changed in place".into(),
        ))
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> AppResult<()> {
        RazorpayClient::verify_webhook_signature(
            payload,
            signature,
            self.webhook_secret.expose_secret(),
        )
    }

    fn parse_webhook(&self, payload: &[u8]) -> AppResult<WebhookEnvelope> {
        let event: RazorpayWebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| AppError::InvalidInput(format!("Invalid webhook payload: {e}")))?;

        Ok(WebhookEnvelope {
            event_id: derive_event_id(&event),
            event: map_event(&event),
            event_type: event.event,
        })
    }
}
