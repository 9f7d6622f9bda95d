//! Internal billing events. Every provider webhook is mapped onto one of these six
//! kinds (or ignored) before it reaches the state machine.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::payment_record::PaymentFacts;

/// One-time payment outcome, carrying the identifiers stamped on the order at checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct OneTimePayment {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub user_email: Option<String>,
    pub order_id: Option<String>,
    pub payment: PaymentFacts,
}

/// Charge on a provider-side subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurringCharge {
    pub provider_subscription_id: String,
    pub provider_customer_id: Option<String>,
    /// Present on the first charge, copied from checkout metadata.
    pub user_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub payment: PaymentFacts,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    PaymentSucceeded(OneTimePayment),
    PaymentFailed(OneTimePayment),
    SubscriptionActivated(RecurringCharge),
    SubscriptionRenewed(RecurringCharge),
    SubscriptionCancelled { provider_subscription_id: String },
    SubscriptionPastDue { provider_subscription_id: String },
}

impl BillingEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BillingEvent::PaymentSucceeded(_) => "payment_succeeded",
            BillingEvent::PaymentFailed(_) => "payment_failed",
            BillingEvent::SubscriptionActivated(_) => "subscription_activated",
            BillingEvent::SubscriptionRenewed(_) => "subscription_renewed",
            BillingEvent::SubscriptionCancelled { .. } => "subscription_cancelled",
            BillingEvent::SubscriptionPastDue { .. } => "subscription_past_due",
        }
    }
}

/// Verified, parsed webhook. `event` is `None` for provider event types we do not act on.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub event: Option<BillingEvent>,
}
