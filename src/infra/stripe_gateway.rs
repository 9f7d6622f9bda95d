use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        clock::Clock,
        ports::payment_gateway::{
            CheckoutCustomer, CheckoutHandle, CheckoutUrls, PaymentDetails, PaymentGatewayPort,
        },
    },
    domain::entities::{
        billing_event::{BillingEvent, RecurringCharge, WebhookEnvelope},
        payment_provider::PaymentProvider,
        payment_record::PaymentFacts,
        plan::Plan,
    },
    infra::stripe_client::{StripeClient, StripeInvoice, StripeWebhookEvent},
};

/// Stripe bills the auto-renewing plans: hosted checkout creates a customer-side
/// subscription, and its invoices drive activation and renewal through webhooks.
pub struct StripeGateway {
    client: StripeClient,
    webhook_secret: SecretString,
    clock: Arc<dyn Clock>,
}

impl StripeGateway {
    pub fn new(client: StripeClient, webhook_secret: SecretString, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            webhook_secret,
            clock,
        }
    }

    fn unsupported(operation: &str) -> AppError {
        AppError::InvalidInput(format!(
            "Stripe payments are confirmed by webhook; {operation} is not supported"
        ))
    }
}

fn timestamp_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts, 0)
}

fn metadata_uuid(metadata: &HashMap<String, String>, key: &str) -> Option<Uuid> {
    metadata.get(key).and_then(|v| Uuid::parse_str(v).ok())
}

fn recurring_charge(invoice: StripeInvoice) -> Option<RecurringCharge> {
    let provider_subscription_id = invoice.subscription?;
    let period = &invoice.lines.data.first()?.period;
    let period_start = timestamp_to_datetime(period.start)?;
    let period_end = timestamp_to_datetime(period.end)?;
    let metadata = invoice
        .subscription_details
        .map(|d| d.metadata)
        .unwrap_or_default();

    Some(RecurringCharge {
        provider_subscription_id,
        provider_customer_id: invoice.customer,
        user_id: metadata_uuid(&metadata, "user_id"),
        plan_id: metadata_uuid(&metadata, "plan_id"),
        user_email: invoice.customer_email,
        period_start,
        period_end,
        payment: PaymentFacts {
            provider: PaymentProvider::Stripe,
            provider_payment_id: invoice.id,
            amount_minor_units: invoice.amount_paid,
            currency: invoice.currency,
            method: Some("card".to_string()),
        },
    })
}

/// Maps a Stripe event onto the internal event set. `None` for types we do not act on.
fn map_event(event: &StripeWebhookEvent) -> Option<BillingEvent> {
    match event.event_type.as_str() {
        // Both names fire for the same invoice; the invoice id dedupes them downstream.
        "invoice.paid" | "invoice.payment_succeeded" => {
            let invoice = event.invoice()?;
            let reason = invoice.billing_reason.clone();
            let charge = recurring_charge(invoice)?;
            match reason.as_deref() {
                Some("subscription_create") => Some(BillingEvent::SubscriptionActivated(charge)),
                Some("subscription_cycle") => Some(BillingEvent::SubscriptionRenewed(charge)),
                _ => None,
            }
        }
        "invoice.payment_failed" => {
            let invoice = event.invoice()?;
            Some(BillingEvent::SubscriptionPastDue {
                provider_subscription_id: invoice.subscription?,
            })
        }
        "customer.subscription.deleted" => Some(BillingEvent::SubscriptionCancelled {
            provider_subscription_id: event.object_id()?.to_string(),
        }),
        _ => None,
    }
}

#[async_trait]
impl PaymentGatewayPort for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    async fn create_checkout(
        &self,
        customer: &CheckoutCustomer,
        plan: &Plan,
        urls: &CheckoutUrls,
    ) -> AppResult<CheckoutHandle> {
        let price_id = plan.provider_price_id.as_deref().ok_or_else(|| {
            AppError::Internal(format!("Recurring plan '{}' has no Stripe price", plan.name))
        })?;

        let metadata = HashMap::from([
            ("user_id".to_string(), customer.user_id.to_string()),
            ("plan_id".to_string(), plan.id.to_string()),
        ]);

        let stripe_customer = self
            .client
            .get_or_create_customer(&customer.email, &metadata)
            .await?;

        let session = self
            .client
            .create_checkout_session(
                &stripe_customer.id,
                price_id,
                &urls.success_url,
                &urls.cancel_url,
                &customer.user_id.to_string(),
                &metadata,
            )
            .await?;

        let url = session.url.ok_or_else(|| AppError::Provider {
            provider: PaymentProvider::Stripe,
            operation: "create_checkout_session",
            code: "missing_url".to_string(),
            message: "Checkout session has no URL".to_string(),
        })?;

        Ok(CheckoutHandle::Redirect {
            url,
            session_id: session.id,
        })
    }

    fn verify_payment(&self, _payment_id: &str, _order_id: &str, _signature: &str) -> AppResult<bool> {
        Err(Self::unsupported("client-side confirmation"))
    }

    async fn fetch_payment(&self, _payment_id: &str) -> AppResult<PaymentDetails> {
        Err(Self::unsupported("payment lookup"))
    }

    async fn cancel_recurring(
        &self,
        provider_subscription_id: &str,
        at_period_end: bool,
    ) -> AppResult<()> {
        let subscription = self
            .client
            .cancel_subscription(provider_subscription_id, at_period_end)
            .await?;
        tracing::info!(
            subscription = %subscription.id,
            status = %subscription.status,
            at_period_end,
            "Stripe subscription cancelled"
        );
        Ok(())
    }

    async fn change_recurring_plan(
        &self,
        provider_subscription_id: &str,
        new_price_id: &str,
    ) -> AppResult<()> {
        let subscription = self.client.get_subscription(provider_subscription_id).await?;
        let item_id = subscription.first_item_id().ok_or_else(|| AppError::Provider {
            provider: PaymentProvider::Stripe,
            operation: "change_recurring_plan",
            code: "no_items".to_string(),
            message: format!("Subscription {} has no items", subscription.id),
        })?;

        self.client
            .update_subscription_price(provider_subscription_id, item_id, new_price_id)
            .await?;
        Ok(())
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> AppResult<()> {
        StripeClient::verify_webhook_signature(
            payload,
            signature,
            self.webhook_secret.expose_secret(),
            self.clock.now().timestamp(),
        )
    }

    fn parse_webhook(&self, payload: &[u8]) -> AppResult<WebhookEnvelope> {
        let event: StripeWebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| AppError::InvalidInput(format!("Invalid webhook payload: {e}")))?;

        let mapped = map_event(&event);
        if mapped.is_none() {
            tracing::debug!(event_type = %event.event_type, event_id = %event.id, "Stripe event not mapped");
        }

        Ok(WebhookEnvelope {
            event_id: event.id,
            event_type: event.event_type,
            event: mapped,
        })
    }
}
