//! Subscription state machine: the only component that changes a subscription's status.
//!
//! Every mutation takes the per-subscription lock (creation paths take the per-user lock
//! first), re-reads the record under it, checks the transition table and persists with an
//! optimistic version check.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        clock::Clock,
        locks::{KeyedLockGuard, KeyedLocks, LockKey},
        use_cases::plan_catalog::PlanCatalogUseCases,
    },
    domain::entities::{
        payment_provider::PaymentProvider,
        payment_record::{PaymentFacts, PaymentRecord, PaymentStatus},
        subscription::{
            ExpiryDecision, PaidPeriod, Subscription, SubscriptionOperation, SubscriptionStatus,
            TransitionError, ensure_permitted,
        },
    },
};

// ============================================================================
// Repository Traits
// ============================================================================

/// Subscription change persisted in the same transaction as a ledger entry.
#[derive(Debug, Clone)]
pub enum SubscriptionWrite {
    Insert(Subscription),
    Update {
        subscription: Subscription,
        expected_version: i64,
    },
}

impl SubscriptionWrite {
    pub fn subscription(&self) -> &Subscription {
        match self {
            SubscriptionWrite::Insert(subscription) => subscription,
            SubscriptionWrite::Update { subscription, .. } => subscription,
        }
    }
}

#[async_trait]
pub trait SubscriptionRepo: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Subscription>>;
    /// The user's non-terminal subscription if any, otherwise the most recent one.
    async fn get_latest_for_user(&self, user_id: Uuid) -> AppResult<Option<Subscription>>;
    async fn get_by_provider_subscription_id(
        &self,
        provider: PaymentProvider,
        provider_subscription_id: &str,
    ) -> AppResult<Option<Subscription>>;
    async fn list_by_status(&self, statuses: &[SubscriptionStatus]) -> AppResult<Vec<Subscription>>;
    async fn count_by_status(&self) -> AppResult<Vec<(SubscriptionStatus, i64)>>;
    async fn insert(&self, subscription: &Subscription) -> AppResult<Subscription>;
    /// Stores `subscription` if the persisted version still equals `expected_version` and
    /// returns it with the bumped version. `ConcurrentModification` otherwise.
    async fn update(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> AppResult<Subscription>;
    /// Applies `write` and appends `payment` atomically.
    async fn write_with_payment(
        &self,
        write: SubscriptionWrite,
        payment: &PaymentRecord,
    ) -> AppResult<Subscription>;
}

#[async_trait]
pub trait PaymentRecordRepo: Send + Sync {
    async fn get_by_provider_payment_id(
        &self,
        provider_payment_id: &str,
    ) -> AppResult<Option<PaymentRecord>>;
    async fn list_by_user(&self, user_id: Uuid) -> AppResult<Vec<PaymentRecord>>;
    /// Whether a succeeded payment for the subscription was recorded after `since`.
    async fn has_succeeded_since(
        &self,
        subscription_id: Uuid,
        since: DateTime<Utc>,
    ) -> AppResult<bool>;
    async fn list_since(&self, since: DateTime<Utc>) -> AppResult<Vec<PaymentRecord>>;
}

// ============================================================================
// Inputs
// ============================================================================

#[derive(Debug, Clone)]
pub struct ActivationInput {
    pub user_id: Uuid,
    pub user_email: Option<String>,
    pub plan_id: Uuid,
    pub payment: PaymentFacts,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FailedPaymentInput {
    pub user_id: Uuid,
    pub user_email: Option<String>,
    pub plan_id: Uuid,
    pub payment: PaymentFacts,
}

#[derive(Debug, Clone)]
pub struct ExpiryOutcome {
    pub subscription: Subscription,
    pub decision: ExpiryDecision,
    /// False when the decision was `Keep`.
    pub changed: bool,
}

// ============================================================================
// Use Cases
// ============================================================================

pub struct SubscriptionUseCases {
    subscriptions: Arc<dyn SubscriptionRepo>,
    payments: Arc<dyn PaymentRecordRepo>,
    plans: Arc<PlanCatalogUseCases>,
    locks: Arc<KeyedLocks>,
    clock: Arc<dyn Clock>,
    past_due_grace: Duration,
}

impl SubscriptionUseCases {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepo>,
        payments: Arc<dyn PaymentRecordRepo>,
        plans: Arc<PlanCatalogUseCases>,
        locks: Arc<KeyedLocks>,
        clock: Arc<dyn Clock>,
        past_due_grace: Duration,
    ) -> Self {
        Self {
            subscriptions,
            payments,
            plans,
            locks,
            clock,
            past_due_grace,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get(&self, subscription_id: Uuid) -> AppResult<Subscription> {
        self.subscriptions
            .get_by_id(subscription_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// The user's trialing, active or past-due subscription.
    pub async fn current_for_user(&self, user_id: Uuid) -> AppResult<Option<Subscription>> {
        Ok(self
            .subscriptions
            .get_latest_for_user(user_id)
            .await?
            .filter(|s| !s.status.is_terminal()))
    }

    pub async fn find_by_provider_subscription(
        &self,
        provider: PaymentProvider,
        provider_subscription_id: &str,
    ) -> AppResult<Subscription> {
        self.subscriptions
            .get_by_provider_subscription_id(provider, provider_subscription_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn list_by_status(
        &self,
        statuses: &[SubscriptionStatus],
    ) -> AppResult<Vec<Subscription>> {
        self.subscriptions.list_by_status(statuses).await
    }

    pub async fn count_by_status(&self) -> AppResult<Vec<(SubscriptionStatus, i64)>> {
        self.subscriptions.count_by_status().await
    }

    pub async fn payments_for_user(&self, user_id: Uuid) -> AppResult<Vec<PaymentRecord>> {
        self.payments.list_by_user(user_id).await
    }

    pub async fn payments_since(&self, since: DateTime<Utc>) -> AppResult<Vec<PaymentRecord>> {
        self.payments.list_since(since).await
    }

    // ========================================================================
    // Creation
    // ========================================================================

    #[instrument(skip(self, user_email))]
    pub async fn start_trial(
        &self,
        user_id: Uuid,
        user_email: Option<String>,
        plan_id: Uuid,
    ) -> AppResult<Subscription> {
        let plan = self.plans.get_purchasable_plan(plan_id).await?;
        if !plan.is_trial() {
            return Err(AppError::InvalidInput("Plan has no trial window".into()));
        }

        let _user_guard = self.locks.acquire(LockKey::User(user_id)).await?;

        let current = self.subscriptions.get_latest_for_user(user_id).await?;
        ensure_permitted(
            SubscriptionOperation::StartTrial,
            current.as_ref().map(|s| s.status),
        )
        .map_err(|e| rejected(current.as_ref(), user_id, e))?;

        let trial = Subscription::new_trial(user_id, user_email, &plan, self.clock.now());
        let saved = self.subscriptions.insert(&trial).await?;

        info!(
            subscription_id = %saved.id,
            plan = %plan.name,
            trial_end = ?saved.trial_end,
            "Trial started"
        );
        Ok(saved)
    }

    /// Activates (or converts a trial into) a paid subscription. Replaying the same
    /// provider payment id returns the subscription it already activated.
    #[instrument(skip(self, input), fields(user_id = %input.user_id, payment_id = %input.payment.provider_payment_id))]
    pub async fn activate_from_payment(&self, input: ActivationInput) -> AppResult<Subscription> {
        if input.period_end <= input.period_start {
            return Err(AppError::InvalidInput(
                "Billing period must end after it starts".into(),
            ));
        }

        let plan = self.plans.get_plan(input.plan_id).await?;
        if !plan.is_recurring {
            ensure_covers_price(&input.payment, plan.price_minor_units, &plan.currency)?;
        }

        let _user_guard = self.locks.acquire(LockKey::User(input.user_id)).await?;

        if let Some(replayed) = self.replayed_payment(&input.payment).await? {
            return Ok(replayed);
        }

        let current = self.subscriptions.get_latest_for_user(input.user_id).await?;
        ensure_permitted(
            SubscriptionOperation::ActivateFromPayment,
            current.as_ref().map(|s| s.status),
        )
        .map_err(|e| rejected(current.as_ref(), input.user_id, e))?;

        let now = self.clock.now();
        let period = PaidPeriod {
            plan_id: plan.id,
            provider: input.payment.provider,
            period_start: input.period_start,
            period_end: input.period_end,
            provider_customer_id: input.provider_customer_id.clone(),
            provider_subscription_id: input.provider_subscription_id.clone(),
        };

        let mut _subscription_guard: Option<KeyedLockGuard> = None;
        let write = match current {
            Some(trial) if trial.status == SubscriptionStatus::Trialing => {
                _subscription_guard = Some(
                    self.locks
                        .acquire(LockKey::Subscription(trial.id))
                        .await?,
                );
                let mut trial = self.get(trial.id).await?;
                let expected_version = trial.version;
                trial
                    .convert_trial(period, now)
                    .map_err(|e| rejected(Some(&trial), input.user_id, e))?;
                if input.user_email.is_some() {
                    trial.user_email = input.user_email.clone();
                }
                SubscriptionWrite::Update {
                    subscription: trial,
                    expected_version,
                }
            }
            _ => SubscriptionWrite::Insert(Subscription::new_paid(
                input.user_id,
                input.user_email.clone(),
                period,
                now,
            )),
        };

        let record = PaymentRecord::from_facts(
            &input.payment,
            input.user_id,
            write.subscription().id,
            PaymentStatus::Succeeded,
            now,
        );
        let saved = self.subscriptions.write_with_payment(write, &record).await?;

        info!(
            subscription_id = %saved.id,
            plan = %plan.name,
            period_end = %saved.current_period_end,
            amount = record.amount_minor_units,
            "Subscription activated from payment"
        );
        Ok(saved)
    }

    /// Records a failed one-time payment attempt as a terminal `failed` subscription.
    #[instrument(skip(self, input), fields(user_id = %input.user_id, payment_id = %input.payment.provider_payment_id))]
    pub async fn record_failed_payment(&self, input: FailedPaymentInput) -> AppResult<Subscription> {
        self.plans.get_plan(input.plan_id).await?;

        let _user_guard = self.locks.acquire(LockKey::User(input.user_id)).await?;

        if let Some(existing) = self
            .payments
            .get_by_provider_payment_id(&input.payment.provider_payment_id)
            .await?
        {
            return self.get(existing.subscription_id).await;
        }

        let now = self.clock.now();
        let failed = Subscription::new_failed(
            input.user_id,
            input.user_email,
            input.plan_id,
            input.payment.provider,
            now,
        );
        let record = PaymentRecord::from_facts(
            &input.payment,
            input.user_id,
            failed.id,
            PaymentStatus::Failed,
            now,
        );
        let saved = self
            .subscriptions
            .write_with_payment(SubscriptionWrite::Insert(failed), &record)
            .await?;

        warn!(subscription_id = %saved.id, "Payment attempt failed");
        Ok(saved)
    }

    // ========================================================================
    // Transitions on an existing subscription
    // ========================================================================

    #[instrument(skip(self, payment), fields(payment_id = %payment.provider_payment_id))]
    pub async fn apply_recurring_renewal(
        &self,
        subscription_id: Uuid,
        new_period_end: DateTime<Utc>,
        payment: PaymentFacts,
    ) -> AppResult<Subscription> {
        let _guard = self
            .locks
            .acquire(LockKey::Subscription(subscription_id))
            .await?;

        if let Some(replayed) = self.replayed_payment(&payment).await? {
            return Ok(replayed);
        }

        let mut subscription = self.get(subscription_id).await?;
        let expected_version = subscription.version;
        let now = self.clock.now();
        subscription
            .renew(new_period_end, now)
            .map_err(|e| rejected(Some(&subscription), subscription.user_id, e))?;

        let record = PaymentRecord::from_facts(
            &payment,
            subscription.user_id,
            subscription.id,
            PaymentStatus::Succeeded,
            now,
        );
        let saved = self
            .subscriptions
            .write_with_payment(
                SubscriptionWrite::Update {
                    subscription,
                    expected_version,
                },
                &record,
            )
            .await?;

        info!(period_end = %saved.current_period_end, "Subscription renewed");
        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn mark_past_due(&self, subscription_id: Uuid) -> AppResult<Subscription> {
        let saved = self
            .mutate(subscription_id, |s, now| s.mark_past_due(now))
            .await?;
        warn!("Subscription marked past due");
        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn request_cancellation(
        &self,
        subscription_id: Uuid,
        cancel_at_period_end: bool,
    ) -> AppResult<Subscription> {
        let saved = self
            .mutate(subscription_id, |s, now| {
                s.request_cancellation(cancel_at_period_end, now)
            })
            .await?;
        info!(status = %saved.status, cancel_at_period_end, "Cancellation recorded");
        Ok(saved)
    }

    /// Swaps the plan of an active subscription. Only recurring plans can be changed in
    /// place; fixed-term buyers purchase a new subscription instead.
    #[instrument(skip(self))]
    pub async fn change_plan(
        &self,
        subscription_id: Uuid,
        new_plan_id: Uuid,
    ) -> AppResult<Subscription> {
        let new_plan = self.plans.get_purchasable_plan(new_plan_id).await?;
        let current = self.get(subscription_id).await?;
        if current.plan_id == new_plan_id {
            return Err(AppError::InvalidInput("Already on this plan".into()));
        }
        let current_plan = self.plans.get_plan(current.plan_id).await?;
        if !current_plan.is_recurring || !new_plan.is_recurring {
            return Err(AppError::InvalidInput(
                "Only recurring plans can be changed in place; purchase the new plan instead"
                    .into(),
            ));
        }

        let saved = self
            .mutate(subscription_id, |s, now| s.change_plan(new_plan_id, now))
            .await?;
        info!(plan = %new_plan.name, "Plan changed");
        Ok(saved)
    }

    /// Applies the expiry rule at `now`. Only `active`, `trialing` and `past_due`
    /// subscriptions are eligible; anything else is an invalid transition.
    #[instrument(skip(self))]
    pub async fn expire_if_past_period(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<ExpiryOutcome> {
        let _guard = self
            .locks
            .acquire(LockKey::Subscription(subscription_id))
            .await?;

        let mut subscription = self.get(subscription_id).await?;
        subscription
            .ensure(SubscriptionOperation::ExpireIfPastPeriod)
            .map_err(|e| rejected(Some(&subscription), subscription.user_id, e))?;

        let renewal_recorded = subscription.current_period_end < now
            && self
                .payments
                .has_succeeded_since(subscription.id, subscription.current_period_end)
                .await?;
        if renewal_recorded {
            warn!("Renewal payment recorded but period was not extended");
        }

        let decision = subscription.expiry_decision(now, renewal_recorded, self.past_due_grace);
        let expected_version = subscription.version;
        let changed = subscription
            .apply_expiry(decision, now)
            .map_err(|e| rejected(Some(&subscription), subscription.user_id, e))?;

        if !changed {
            return Ok(ExpiryOutcome {
                subscription,
                decision,
                changed,
            });
        }

        let saved = self
            .subscriptions
            .update(&subscription, expected_version)
            .await?;
        info!(status = %saved.status, period_end = %saved.current_period_end, "Subscription ended by sweep");
        Ok(ExpiryOutcome {
            subscription: saved,
            decision,
            changed,
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn mutate<F>(&self, subscription_id: Uuid, apply: F) -> AppResult<Subscription>
    where
        F: FnOnce(&mut Subscription, DateTime<Utc>) -> Result<(), TransitionError>,
    {
        let _guard = self
            .locks
            .acquire(LockKey::Subscription(subscription_id))
            .await?;

        let mut subscription = self.get(subscription_id).await?;
        let expected_version = subscription.version;
        apply(&mut subscription, self.clock.now())
            .map_err(|e| rejected(Some(&subscription), subscription.user_id, e))?;

        self.subscriptions
            .update(&subscription, expected_version)
            .await
    }

    async fn replayed_payment(&self, payment: &PaymentFacts) -> AppResult<Option<Subscription>> {
        let Some(existing) = self
            .payments
            .get_by_provider_payment_id(&payment.provider_payment_id)
            .await?
        else {
            return Ok(None);
        };

        if existing.status == PaymentStatus::Failed {
            return Err(AppError::Conflict(
                "Payment was already recorded as failed".into(),
            ));
        }
        info!(
            subscription_id = %existing.subscription_id,
            "Payment already applied, returning existing subscription"
        );
        self.get(existing.subscription_id).await.map(Some)
    }
}

fn ensure_covers_price(payment: &PaymentFacts, price: i64, currency: &str) -> AppResult<()> {
    if !payment.currency.eq_ignore_ascii_case(currency) {
        return Err(AppError::InvalidInput(format!(
            "Payment currency {} does not match plan currency {}",
            payment.currency, currency
        )));
    }
    if payment.amount_minor_units < price {
        return Err(AppError::InvalidInput(
            "Payment amount does not cover the plan price".into(),
        ));
    }
    Ok(())
}

fn rejected(current: Option<&Subscription>, user_id: Uuid, err: TransitionError) -> AppError {
    warn!(
        %user_id,
        subscription_id = ?current.map(|s| s.id),
        status = ?current.map(|s| s.status),
        error = %err,
        "Subscription transition rejected"
    );
    err.into()
}
