use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

use super::{payment_provider::PaymentProvider, plan::Plan};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, AsRefStr, Display,
    EnumString,
)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Cancelled,
    Expired,
    /// Failed one-time payment attempt. Recurring charge failures go to `PastDue`.
    Failed,
}

impl SubscriptionStatus {
    /// Trialing or active. At most one such subscription exists per user.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Trialing | SubscriptionStatus::Active
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired | SubscriptionStatus::Failed
        )
    }

    pub fn all() -> &'static [SubscriptionStatus] {
        &[
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Expired,
            SubscriptionStatus::Failed,
        ]
    }
}

/// Every mutation the state machine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionOperation {
    StartTrial,
    ActivateFromPayment,
    ApplyRecurringRenewal,
    MarkPastDue,
    RequestCancellation,
    ChangePlan,
    ExpireIfPastPeriod,
}

impl SubscriptionOperation {
    pub fn all() -> &'static [SubscriptionOperation] {
        &[
            SubscriptionOperation::StartTrial,
            SubscriptionOperation::ActivateFromPayment,
            SubscriptionOperation::ApplyRecurringRenewal,
            SubscriptionOperation::MarkPastDue,
            SubscriptionOperation::RequestCancellation,
            SubscriptionOperation::ChangePlan,
            SubscriptionOperation::ExpireIfPastPeriod,
        ]
    }

    /// Whether the operation may run when the user's latest subscription is in `from`.
    /// `None` stands for "no subscription yet".
    ///
    /// Creation operations accept terminal states because they insert a fresh record and
    /// leave the old one untouched for history.
    pub fn permits(&self, from: Option<SubscriptionStatus>) -> bool {
        use SubscriptionStatus::*;

        match self {
            SubscriptionOperation::StartTrial => {
                matches!(from, None | Some(Cancelled | Expired | Failed))
            }
            SubscriptionOperation::ActivateFromPayment => {
                matches!(from, None | Some(Trialing | Cancelled | Expired | Failed))
            }
            SubscriptionOperation::ApplyRecurringRenewal => matches!(from, Some(Active | PastDue)),
            SubscriptionOperation::MarkPastDue => matches!(from, Some(Active)),
            SubscriptionOperation::RequestCancellation => {
                matches!(from, Some(Active | Trialing | PastDue))
            }
            SubscriptionOperation::ChangePlan => matches!(from, Some(Active)),
            SubscriptionOperation::ExpireIfPastPeriod => {
                matches!(from, Some(Active | Trialing | PastDue))
            }
        }
    }

    fn creates_record(&self) -> bool {
        matches!(
            self,
            SubscriptionOperation::StartTrial | SubscriptionOperation::ActivateFromPayment
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// A creation operation found a live subscription for the user.
    #[error("user already holds a {0} subscription")]
    AlreadySubscribed(SubscriptionStatus),

    #[error("cannot {operation} a {from} subscription")]
    NotAllowed {
        from: SubscriptionStatus,
        operation: SubscriptionOperation,
    },

    #[error("cannot {0} without a subscription")]
    NoSubscription(SubscriptionOperation),
}

/// Checks `operation` against the current state, distinguishing a conflict with a live
/// subscription from an illegal transition.
pub fn ensure_permitted(
    operation: SubscriptionOperation,
    from: Option<SubscriptionStatus>,
) -> Result<(), TransitionError> {
    if operation.permits(from) {
        return Ok(());
    }
    match from {
        Some(status) if operation.creates_record() && !status.is_terminal() => {
            Err(TransitionError::AlreadySubscribed(status))
        }
        Some(status) => Err(TransitionError::NotAllowed {
            from: status,
            operation,
        }),
        None => Err(TransitionError::NoSubscription(operation)),
    }
}

/// Outcome of evaluating a subscription against the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryDecision {
    Keep,
    Expire,
    Cancel,
}

/// Paid access window and provider identifiers attached on activation.
#[derive(Debug, Clone, PartialEq)]
pub struct PaidPeriod {
    pub plan_id: Uuid,
    pub provider: PaymentProvider,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub user_email: Option<String>,
    pub plan_id: Uuid,
    /// None for locally issued trials.
    pub provider: Option<PaymentProvider>,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub provider_customer_id: Option<String>,
    /// Absent for one-time plans.
    pub provider_subscription_id: Option<String>,
    #[serde(skip_serializing)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Fresh trial record running for the plan's `trial_days`.
    pub fn new_trial(
        user_id: Uuid,
        user_email: Option<String>,
        plan: &Plan,
        now: DateTime<Utc>,
    ) -> Self {
        let trial_end = now + Duration::days(i64::from(plan.trial_days));
        Self {
            id: Uuid::new_v4(),
            user_id,
            user_email,
            plan_id: plan.id,
            provider: None,
            status: SubscriptionStatus::Trialing,
            current_period_start: now,
            current_period_end: trial_end,
            trial_start: Some(now),
            trial_end: Some(trial_end),
            cancel_at_period_end: false,
            provider_customer_id: None,
            provider_subscription_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_paid(
        user_id: Uuid,
        user_email: Option<String>,
        period: PaidPeriod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            user_email,
            plan_id: period.plan_id,
            provider: Some(period.provider),
            status: SubscriptionStatus::Active,
            current_period_start: period.period_start,
            current_period_end: period.period_end,
            trial_start: None,
            trial_end: None,
            cancel_at_period_end: false,
            provider_customer_id: period.provider_customer_id,
            provider_subscription_id: period.provider_subscription_id,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Audit record of a one-time payment attempt that did not go through.
    pub fn new_failed(
        user_id: Uuid,
        user_email: Option<String>,
        plan_id: Uuid,
        provider: PaymentProvider,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            user_email,
            plan_id,
            provider: Some(provider),
            status: SubscriptionStatus::Failed,
            current_period_start: now,
            current_period_end: now,
            trial_start: None,
            trial_end: None,
            cancel_at_period_end: false,
            provider_customer_id: None,
            provider_subscription_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn ensure(&self, operation: SubscriptionOperation) -> Result<(), TransitionError> {
        ensure_permitted(operation, Some(self.status))
    }

    /// Live subscription that ends instead of renewing.
    pub fn is_cancelling(&self) -> bool {
        self.status.is_live() && self.cancel_at_period_end
    }

    /// Trial converted into a paid subscription in place.
    pub fn convert_trial(
        &mut self,
        period: PaidPeriod,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure(SubscriptionOperation::ActivateFromPayment)?;
        if self.status != SubscriptionStatus::Trialing {
            return Err(TransitionError::NotAllowed {
                from: self.status,
                operation: SubscriptionOperation::ActivateFromPayment,
            });
        }

        self.plan_id = period.plan_id;
        self.provider = Some(period.provider);
        self.status = SubscriptionStatus::Active;
        self.current_period_start = period.period_start;
        self.current_period_end = period.period_end;
        self.cancel_at_period_end = false;
        self.provider_customer_id = period.provider_customer_id.or(self.provider_customer_id.take());
        self.provider_subscription_id = period.provider_subscription_id;
        self.updated_at = now;
        Ok(())
    }

    pub fn renew(
        &mut self,
        new_period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure(SubscriptionOperation::ApplyRecurringRenewal)?;

        if new_period_end > self.current_period_end {
            self.current_period_start = self.current_period_end;
            self.current_period_end = new_period_end;
        }
        self.status = SubscriptionStatus::Active;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_past_due(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure(SubscriptionOperation::MarkPastDue)?;
        self.status = SubscriptionStatus::PastDue;
        self.updated_at = now;
        Ok(())
    }

    pub fn request_cancellation(
        &mut self,
        at_period_end: bool,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure(SubscriptionOperation::RequestCancellation)?;
        if at_period_end {
            self.cancel_at_period_end = true;
        } else {
            self.status = SubscriptionStatus::Cancelled;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn change_plan(&mut self, new_plan_id: Uuid, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure(SubscriptionOperation::ChangePlan)?;
        self.plan_id = new_plan_id;
        self.updated_at = now;
        Ok(())
    }

    /// Pure expiry rule. `renewal_recorded` is whether a succeeded payment landed after
    /// the current period end.
    pub fn expiry_decision(
        &self,
        now: DateTime<Utc>,
        renewal_recorded: bool,
        past_due_grace: Duration,
    ) -> ExpiryDecision {
        let period_ended = self.current_period_end < now;

        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::Trialing => {
                if !period_ended {
                    ExpiryDecision::Keep
                } else if self.cancel_at_period_end {
                    ExpiryDecision::Cancel
                } else if renewal_recorded {
                    ExpiryDecision::Keep
                } else {
                    ExpiryDecision::Expire
                }
            }
            SubscriptionStatus::PastDue => {
                if period_ended && self.cancel_at_period_end {
                    ExpiryDecision::Cancel
                } else if self.current_period_end + past_due_grace < now {
                    ExpiryDecision::Expire
                } else {
                    ExpiryDecision::Keep
                }
            }
            SubscriptionStatus::Cancelled
            | SubscriptionStatus::Expired
            | SubscriptionStatus::Failed => ExpiryDecision::Keep,
        }
    }

    /// Applies a decision from [`Subscription::expiry_decision`]. Returns whether the
    /// status changed.
    pub fn apply_expiry(
        &mut self,
        decision: ExpiryDecision,
        now: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        self.ensure(SubscriptionOperation::ExpireIfPastPeriod)?;
        let next = match decision {
            ExpiryDecision::Keep => return Ok(false),
            ExpiryDecision::Expire => SubscriptionStatus::Expired,
            ExpiryDecision::Cancel => SubscriptionStatus::Cancelled,
        };
        self.status = next;
        self.updated_at = now;
        Ok(true)
    }
}
