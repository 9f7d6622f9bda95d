//! Webhook verification and dispatch.
//!
//! A delivery is verified over the raw body, mapped onto a [`BillingEvent`], serialized
//! per provider event id and applied through the state machine. The event is recorded as
//! processed only after the state machine succeeded, so a retryable failure leaves it
//! eligible for redelivery.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    app_error::{AppError, AppResult},
    application::{
        clock::Clock,
        locks::{KeyedLocks, LockKey},
        ports::{notifier::NoticeTemplate, payment_gateway::PaymentGateways},
        use_cases::{
            notices::SubscriptionNotices,
            plan_catalog::PlanCatalogUseCases,
            subscription::{ActivationInput, FailedPaymentInput, SubscriptionUseCases},
        },
    },
    domain::entities::{
        billing_event::{BillingEvent, OneTimePayment, RecurringCharge},
        payment_provider::PaymentProvider,
        subscription::{Subscription, SubscriptionStatus},
    },
};

#[async_trait]
pub trait ProcessedWebhookRepo: Send + Sync {
    async fn is_processed(&self, provider: PaymentProvider, event_id: &str) -> AppResult<bool>;
    /// Recording an event twice is a no-op.
    async fn mark_processed(
        &self,
        provider: PaymentProvider,
        event_id: &str,
        event_type: &str,
        processed_at: DateTime<Utc>,
    ) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    /// Event id already recorded; nothing was applied.
    Duplicate,
    /// Provider event type we do not act on.
    Ignored,
    /// Rejected by the state machine for a reason a redelivery cannot fix.
    Skipped,
}

pub struct WebhookUseCases {
    gateways: PaymentGateways,
    plans: Arc<PlanCatalogUseCases>,
    subscriptions: Arc<SubscriptionUseCases>,
    processed: Arc<dyn ProcessedWebhookRepo>,
    notices: Arc<SubscriptionNotices>,
    locks: Arc<KeyedLocks>,
    clock: Arc<dyn Clock>,
}

impl WebhookUseCases {
    pub fn new(
        gateways: PaymentGateways,
        plans: Arc<PlanCatalogUseCases>,
        subscriptions: Arc<SubscriptionUseCases>,
        processed: Arc<dyn ProcessedWebhookRepo>,
        notices: Arc<SubscriptionNotices>,
        locks: Arc<KeyedLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateways,
            plans,
            subscriptions,
            processed,
            notices,
            locks,
            clock,
        }
    }

    #[instrument(skip(self, payload, signature), fields(bytes = payload.len()))]
    pub async fn handle(
        &self,
        provider: PaymentProvider,
        payload: &[u8],
        signature: Option<&str>,
    ) -> AppResult<WebhookOutcome> {
        let gateway = self.gateways.get(provider)?;

        let Some(signature) = signature.filter(|s| !s.is_empty()) else {
            warn!(%provider, "Webhook rejected: missing signature header");
            return Err(AppError::SignatureInvalid);
        };
        if let Err(e) = gateway.verify_webhook(payload, signature) {
            warn!(%provider, error = %e, "Webhook rejected: signature verification failed");
            return Err(AppError::SignatureInvalid);
        }

        let envelope = gateway.parse_webhook(payload)?;
        let _guard = self
            .locks
            .acquire(LockKey::WebhookEvent(provider, envelope.event_id.clone()))
            .await?;

        if self
            .processed
            .is_processed(provider, &envelope.event_id)
            .await?
        {
            info!(event_id = %envelope.event_id, "Duplicate webhook delivery ignored");
            return Ok(WebhookOutcome::Duplicate);
        }

        let Some(event) = envelope.event else {
            debug!(event_id = %envelope.event_id, event_type = %envelope.event_type, "Unhandled webhook event type");
            self.mark_processed(provider, &envelope.event_id, &envelope.event_type)
                .await?;
            return Ok(WebhookOutcome::Ignored);
        };

        let kind = event.kind();
        match self.dispatch(provider, event).await {
            Ok(notice) => {
                self.mark_processed(provider, &envelope.event_id, &envelope.event_type)
                    .await?;
                info!(event_id = %envelope.event_id, kind, "Webhook processed");
                if let Some((subscription, template)) = notice {
                    self.notices.send_best_effort(&subscription, template).await;
                }
                Ok(WebhookOutcome::Processed)
            }
            Err(e) if e.is_retryable() => {
                error!(event_id = %envelope.event_id, kind, error = %e, "Webhook processing failed, awaiting redelivery");
                Err(e)
            }
            Err(e) => {
                warn!(event_id = %envelope.event_id, kind, error = %e, "Webhook skipped");
                Ok(WebhookOutcome::Skipped)
            }
        }
    }

    async fn mark_processed(
        &self,
        provider: PaymentProvider,
        event_id: &str,
        event_type: &str,
    ) -> AppResult<()> {
        self.processed
            .mark_processed(provider, event_id, event_type, self.clock.now())
            .await
    }

    /// Applies the event and returns the notice to send once it is recorded.
    async fn dispatch(
        &self,
        provider: PaymentProvider,
        event: BillingEvent,
    ) -> AppResult<Option<(Subscription, NoticeTemplate)>> {
        match event {
            BillingEvent::PaymentSucceeded(payment) => {
                let subscription = self.activate_one_time(payment).await?;
                Ok(Some((subscription, NoticeTemplate::SubscriptionActivated)))
            }
            BillingEvent::PaymentFailed(payment) => {
                let subscription = self
                    .subscriptions
                    .record_failed_payment(FailedPaymentInput {
                        user_id: payment.user_id,
                        user_email: payment.user_email,
                        plan_id: payment.plan_id,
                        payment: payment.payment,
                    })
                    .await?;
                Ok(Some((subscription, NoticeTemplate::PaymentFailed)))
            }
            BillingEvent::SubscriptionActivated(charge) => {
                let subscription = self.activate_recurring(charge).await?;
                Ok(Some((subscription, NoticeTemplate::SubscriptionActivated)))
            }
            BillingEvent::SubscriptionRenewed(charge) => {
                let existing = match self
                    .subscriptions
                    .find_by_provider_subscription(provider, &charge.provider_subscription_id)
                    .await
                {
                    Ok(existing) => existing,
                    // Renewal for a subscription we never saw activate.
                    Err(AppError::NotFound) if charge.user_id.is_some() => {
                        let subscription = self.activate_recurring(charge).await?;
                        return Ok(Some((subscription, NoticeTemplate::SubscriptionActivated)));
                    }
                    Err(e) => return Err(e),
                };
                // The sweep ended the record before the charge arrived; the payment
                // reopens access on a new record.
                if existing.status.is_terminal() {
                    info!(subscription_id = %existing.id, status = %existing.status, "Renewal after subscription ended, reactivating");
                    let mut charge = charge;
                    charge.user_id.get_or_insert(existing.user_id);
                    charge.plan_id.get_or_insert(existing.plan_id);
                    if charge.user_email.is_none() {
                        charge.user_email = existing.user_email;
                    }
                    let subscription = self.activate_recurring(charge).await?;
                    return Ok(Some((subscription, NoticeTemplate::SubscriptionActivated)));
                }
                let subscription = self
                    .subscriptions
                    .apply_recurring_renewal(existing.id, charge.period_end, charge.payment)
                    .await?;
                Ok(Some((subscription, NoticeTemplate::SubscriptionRenewed)))
            }
            BillingEvent::SubscriptionCancelled {
                provider_subscription_id,
            } => {
                let existing = self
                    .subscriptions
                    .find_by_provider_subscription(provider, &provider_subscription_id)
                    .await?;
                if existing.status.is_terminal() {
                    debug!(subscription_id = %existing.id, status = %existing.status, "Already ended");
                    return Ok(None);
                }
                let subscription = self
                    .subscriptions
                    .request_cancellation(existing.id, false)
                    .await?;
                Ok(Some((subscription, NoticeTemplate::SubscriptionCancelled)))
            }
            BillingEvent::SubscriptionPastDue {
                provider_subscription_id,
            } => {
                let existing = self
                    .subscriptions
                    .find_by_provider_subscription(provider, &provider_subscription_id)
                    .await?;
                if existing.status == SubscriptionStatus::PastDue {
                    return Ok(None);
                }
                let subscription = self.subscriptions.mark_past_due(existing.id).await?;
                Ok(Some((subscription, NoticeTemplate::SubscriptionPastDue)))
            }
        }
    }

    async fn activate_one_time(&self, payment: OneTimePayment) -> AppResult<Subscription> {
        let plan = self.plans.get_plan(payment.plan_id).await?;
        let now = self.clock.now();
        self.subscriptions
            .activate_from_payment(ActivationInput {
                user_id: payment.user_id,
                user_email: payment.user_email,
                plan_id: plan.id,
                payment: payment.payment,
                period_start: now,
                period_end: plan.period_end_from(now),
                provider_customer_id: None,
                provider_subscription_id: None,
            })
            .await
    }

    async fn activate_recurring(&self, charge: RecurringCharge) -> AppResult<Subscription> {
        let (Some(user_id), Some(plan_id)) = (charge.user_id, charge.plan_id) else {
            return Err(AppError::InvalidInput(
                "Recurring charge is missing checkout metadata".into(),
            ));
        };
        self.subscriptions
            .activate_from_payment(ActivationInput {
                user_id,
                user_email: charge.user_email,
                plan_id,
                payment: charge.payment,
                period_start: charge.period_start,
                period_end: charge.period_end,
                provider_customer_id: charge.provider_customer_id,
                provider_subscription_id: Some(charge.provider_subscription_id),
            })
            .await
    }
}
