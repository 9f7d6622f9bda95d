//! Client-facing billing flows: checkout, client-side payment confirmation, cancellation
//! and plan changes. Provider calls happen outside any subscription lock and are bounded
//! by the provider timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        clock::Clock,
        ports::{
            notifier::NoticeTemplate,
            payment_gateway::{CheckoutCustomer, CheckoutHandle, CheckoutUrls, PaymentGateways},
        },
        use_cases::{
            notices::SubscriptionNotices,
            plan_catalog::PlanCatalogUseCases,
            subscription::{ActivationInput, SubscriptionUseCases},
        },
        validators::is_valid_redirect_url,
    },
    domain::entities::{
        payment_provider::PaymentProvider,
        payment_record::PaymentFacts,
        subscription::{Subscription, SubscriptionOperation, SubscriptionStatus},
    },
};

#[derive(Debug, Clone)]
pub enum CheckoutOutcome {
    /// Trial plans are issued immediately, no payment involved.
    Trial { subscription: Subscription },
    Payment {
        provider: PaymentProvider,
        checkout: CheckoutHandle,
    },
}

/// Client-side confirmation of an order payment.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub plan_id: Uuid,
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

pub struct BillingUseCases {
    plans: Arc<PlanCatalogUseCases>,
    subscriptions: Arc<SubscriptionUseCases>,
    gateways: PaymentGateways,
    notices: Arc<SubscriptionNotices>,
    clock: Arc<dyn Clock>,
    provider_timeout: Duration,
}

impl BillingUseCases {
    pub fn new(
        plans: Arc<PlanCatalogUseCases>,
        subscriptions: Arc<SubscriptionUseCases>,
        gateways: PaymentGateways,
        notices: Arc<SubscriptionNotices>,
        clock: Arc<dyn Clock>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            plans,
            subscriptions,
            gateways,
            notices,
            clock,
            provider_timeout,
        }
    }

    #[instrument(skip(self, customer, urls), fields(user_id = %customer.user_id))]
    pub async fn checkout(
        &self,
        customer: CheckoutCustomer,
        plan_id: Uuid,
        urls: CheckoutUrls,
    ) -> AppResult<CheckoutOutcome> {
        let plan = self.plans.get_purchasable_plan(plan_id).await?;

        let current = self.subscriptions.current_for_user(customer.user_id).await?;
        if current.as_ref().is_some_and(|s| {
            matches!(
                s.status,
                SubscriptionStatus::Active | SubscriptionStatus::PastDue
            )
        }) {
            return Err(AppError::Conflict(
                "User already has an active subscription".into(),
            ));
        }

        let Some(gateway) = self.gateways.for_plan(&plan)? else {
            let subscription = self
                .subscriptions
                .start_trial(customer.user_id, Some(customer.email.clone()), plan.id)
                .await?;
            self.notices
                .send_best_effort(&subscription, NoticeTemplate::TrialStarted)
                .await;
            return Ok(CheckoutOutcome::Trial { subscription });
        };

        if !is_valid_redirect_url(&urls.success_url) || !is_valid_redirect_url(&urls.cancel_url) {
            return Err(AppError::InvalidInput(
                "Return URLs must be absolute http(s) URLs".into(),
            ));
        }

        let provider = gateway.provider();
        let checkout = self
            .call_provider(
                provider,
                "create_checkout",
                gateway.create_checkout(&customer, &plan, &urls),
            )
            .await?;

        info!(%provider, plan = %plan.name, "Checkout created");
        Ok(CheckoutOutcome::Payment { provider, checkout })
    }

    /// Confirms an order payment the client completed inline and activates the plan.
    #[instrument(skip(self, customer, confirmation), fields(user_id = %customer.user_id, payment_id = %confirmation.payment_id))]
    pub async fn verify_payment(
        &self,
        customer: CheckoutCustomer,
        confirmation: PaymentConfirmation,
    ) -> AppResult<Subscription> {
        let plan = self.plans.get_plan(confirmation.plan_id).await?;
        let gateway = self
            .gateways
            .for_plan(&plan)?
            .ok_or_else(|| AppError::InvalidInput("Trial plans need no payment".into()))?;
        let provider = gateway.provider();

        if !gateway.verify_payment(
            &confirmation.payment_id,
            &confirmation.order_id,
            &confirmation.signature,
        )? {
            warn!(%provider, "Payment confirmation signature mismatch");
            return Err(AppError::SignatureInvalid);
        }

        let details = self
            .call_provider(
                provider,
                "fetch_payment",
                gateway.fetch_payment(&confirmation.payment_id),
            )
            .await?;

        if details
            .order_id
            .as_deref()
            .is_some_and(|order_id| order_id != confirmation.order_id)
        {
            return Err(AppError::InvalidInput(
                "Payment belongs to a different order".into(),
            ));
        }
        if !details.captured {
            return Err(AppError::InvalidInput("Payment has not been captured".into()));
        }

        let now = self.clock.now();
        let subscription = self
            .subscriptions
            .activate_from_payment(ActivationInput {
                user_id: customer.user_id,
                user_email: Some(customer.email),
                plan_id: plan.id,
                payment: PaymentFacts {
                    provider,
                    provider_payment_id: details.payment_id,
                    amount_minor_units: details.amount_minor_units,
                    currency: details.currency,
                    method: details.method,
                },
                period_start: now,
                period_end: plan.period_end_from(now),
                provider_customer_id: None,
                provider_subscription_id: None,
            })
            .await?;

        self.notices
            .send_best_effort(&subscription, NoticeTemplate::SubscriptionActivated)
            .await;
        Ok(subscription)
    }

    /// Cancels the caller's live subscription, at the provider first when it bills one.
    #[instrument(skip(self))]
    pub async fn cancel(&self, user_id: Uuid, at_period_end: bool) -> AppResult<Subscription> {
        let current = self
            .subscriptions
            .current_for_user(user_id)
            .await?
            .ok_or(AppError::NotFound)?;
        current.ensure(SubscriptionOperation::RequestCancellation)?;

        if let (Some(provider), Some(provider_subscription_id)) =
            (current.provider, current.provider_subscription_id.as_deref())
        {
            let gateway = self.gateways.get(provider)?;
            self.call_provider(
                provider,
                "cancel_recurring",
                gateway.cancel_recurring(provider_subscription_id, at_period_end),
            )
            .await?;
        }

        let subscription = self
            .subscriptions
            .request_cancellation(current.id, at_period_end)
            .await?;

        if subscription.status == SubscriptionStatus::Cancelled {
            self.notices
                .send_best_effort(&subscription, NoticeTemplate::SubscriptionCancelled)
                .await;
        }
        Ok(subscription)
    }

    #[instrument(skip(self))]
    pub async fn change_plan(&self, user_id: Uuid, new_plan_id: Uuid) -> AppResult<Subscription> {
        let current = self
            .subscriptions
            .current_for_user(user_id)
            .await?
            .ok_or(AppError::NotFound)?;
        current.ensure(SubscriptionOperation::ChangePlan)?;

        let new_plan = self.plans.get_purchasable_plan(new_plan_id).await?;
        let current_plan = self.plans.get_plan(current.plan_id).await?;
        if !current_plan.is_recurring || !new_plan.is_recurring {
            return Err(AppError::InvalidInput(
                "Only recurring plans can be changed in place; purchase the new plan instead"
                    .into(),
            ));
        }
        if current.plan_id == new_plan.id {
            return Err(AppError::InvalidInput("Already on this plan".into()));
        }

        let (Some(provider), Some(provider_subscription_id), Some(price_id)) = (
            current.provider,
            current.provider_subscription_id.as_deref(),
            new_plan.provider_price_id.as_deref(),
        ) else {
            return Err(AppError::InvalidInput(
                "Subscription is not billed by a recurring provider".into(),
            ));
        };

        let gateway = self.gateways.get(provider)?;
        self.call_provider(
            provider,
            "change_recurring_plan",
            gateway.change_recurring_plan(provider_subscription_id, price_id),
        )
        .await?;

        self.subscriptions.change_plan(current.id, new_plan.id).await
    }

    async fn call_provider<T, F>(
        &self,
        provider: PaymentProvider,
        operation: &'static str,
        call: F,
    ) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    %provider,
                    operation,
                    timeout_ms = self.provider_timeout.as_millis() as u64,
                    "Provider call timed out"
                );
                Err(AppError::ProviderTimeout {
                    provider,
                    operation,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{GatewayBehavior, TestBilling};

    fn customer(user_id: Uuid) -> CheckoutCustomer {
        CheckoutCustomer {
            user_id,
            email: "dev@example.com".into(),
        }
    }

    fn urls() -> CheckoutUrls {
        CheckoutUrls {
            success_url: "https://app.example.com/billing/success".into(),
            cancel_url: "https://app.example.com/billing".into(),
        }
    }

    #[tokio::test]
    async fn trial_checkout_starts_trial_and_notifies() {
        let t = TestBilling::new().await;
        let outcome = t
            .billing
            .checkout(customer(Uuid::new_v4()), t.plan("free-trial").id, urls())
            .await
            .unwrap();

        let CheckoutOutcome::Trial { subscription } = outcome else {
            panic!("expected trial");
        };
        assert_eq!(subscription.status, SubscriptionStatus::Trialing);
        assert_eq!(t.notifier.templates(), vec![NoticeTemplate::TrialStarted]);
    }

    #[tokio::test]
    async fn fixed_term_checkout_creates_razorpay_order() {
        let t = TestBilling::new().await;
        let outcome = t
            .billing
            .checkout(customer(Uuid::new_v4()), t.plan("monthly").id, urls())
            .await
            .unwrap();

        let CheckoutOutcome::Payment { provider, checkout } = outcome else {
            panic!("expected payment");
        };
        assert_eq!(provider, PaymentProvider::Razorpay);
        assert!(matches!(checkout, CheckoutHandle::Order { amount: 49_900, .. }));
    }

    #[tokio::test]
    async fn checkout_with_active_subscription_conflicts() {
        let t = TestBilling::new().await;
        let user = Uuid::new_v4();
        t.active_recurring(user, "sub_x").await;

        let result = t
            .billing
            .checkout(customer(user), t.plan("monthly").id, urls())
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn slow_provider_maps_to_timeout() {
        let t = TestBilling::new().await;
        t.razorpay.set_behavior(GatewayBehavior::Hang);

        let result = t
            .billing
            .checkout(customer(Uuid::new_v4()), t.plan("monthly").id, urls())
            .await;
        assert!(matches!(
            result,
            Err(AppError::ProviderTimeout {
                provider: PaymentProvider::Razorpay,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn verify_payment_activates_plan() {
        let t = TestBilling::new().await;
        let user = Uuid::new_v4();
        t.razorpay.add_payment("pay_ok", "order_1", true, 49_900, "INR");

        let subscription = t
            .billing
            .verify_payment(
                customer(user),
                PaymentConfirmation {
                    plan_id: t.plan("monthly").id,
                    order_id: "order_1".into(),
                    payment_id: "pay_ok".into(),
                    signature: "valid".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(
            subscription.current_period_end,
            t.clock.now() + chrono::Duration::days(30)
        );
        assert_eq!(t.payments.records.lock().unwrap()[0].currency, "inr");
        assert_eq!(t.notifier.templates(), vec![NoticeTemplate::SubscriptionActivated]);
    }

    #[tokio::test]
    async fn verify_payment_bad_signature_is_rejected() {
        let t = TestBilling::new().await;
        t.razorpay.add_payment("pay_ok", "order_1", true, 49_900, "inr");

        let result = t
            .billing
            .verify_payment(
                customer(Uuid::new_v4()),
                PaymentConfirmation {
                    plan_id: t.plan("monthly").id,
                    order_id: "order_1".into(),
                    payment_id: "pay_ok".into(),
                    signature: "forged".into(),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::SignatureInvalid)));
        assert!(t.payments.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn verify_payment_requires_capture() {
        let t = TestBilling::new().await;
        t.razorpay.add_payment("pay_auth", "order_2", false, 49_900, "inr");

        let result = t
            .billing
            .verify_payment(
                customer(Uuid::new_v4()),
                PaymentConfirmation {
                    plan_id: t.plan("monthly").id,
                    order_id: "order_2".into(),
                    payment_id: "pay_auth".into(),
                    signature: "valid".into(),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn cancel_recurring_calls_provider_first() {
        let t = TestBilling::new().await;
        let user = Uuid::new_v4();
        t.active_recurring(user, "sub_cancel").await;

        let subscription = t.billing.cancel(user, true).await.unwrap();

        assert!(subscription.cancel_at_period_end);
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(
            t.stripe.cancelled(),
            vec![("sub_cancel".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn provider_failure_leaves_subscription_untouched() {
        let t = TestBilling::new().await;
        let user = Uuid::new_v4();
        let sub = t.active_recurring(user, "sub_keep").await;
        t.stripe.set_behavior(GatewayBehavior::Fail);

        let result = t.billing.cancel(user, false).await;
        assert!(matches!(result, Err(AppError::Provider { .. })));
        assert_eq!(
            t.subscriptions.get(sub.id).await.unwrap().status,
            SubscriptionStatus::Active
        );
    }

    #[tokio::test]
    async fn cancel_without_subscription_is_not_found() {
        let t = TestBilling::new().await;
        assert!(matches!(
            t.billing.cancel(Uuid::new_v4(), true).await,
            Err(AppError::NotFound)
        ));
    }
}
