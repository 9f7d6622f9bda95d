//! In-memory mock implementations for billing repository traits.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::notifier::NoticeTemplate,
        use_cases::{
            plan_catalog::PlanRepo,
            reconciliation::NotificationLogRepo,
            subscription::{PaymentRecordRepo, SubscriptionRepo, SubscriptionWrite},
            webhook::ProcessedWebhookRepo,
        },
    },
    domain::entities::{
        payment_provider::PaymentProvider,
        payment_record::{PaymentRecord, PaymentStatus},
        plan::{NewPlan, Plan},
        subscription::{Subscription, SubscriptionStatus},
    },
    test_utils::test_datetime,
};

// ============================================================================
// InMemoryPlanRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryPlanRepo {
    pub plans: Mutex<HashMap<Uuid, Plan>>,
}

impl InMemoryPlanRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plans(plans: Vec<Plan>) -> Self {
        Self {
            plans: Mutex::new(plans.into_iter().map(|p| (p.id, p)).collect()),
        }
    }
}

fn sort_plans(plans: &mut [Plan]) {
    plans.sort_by(|a, b| {
        a.price_minor_units
            .cmp(&b.price_minor_units)
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[async_trait]
impl PlanRepo for InMemoryPlanRepo {
    async fn list_active(&self) -> AppResult<Vec<Plan>> {
        let mut plans: Vec<Plan> = self
            .plans
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        sort_plans(&mut plans);
        Ok(plans)
    }

    async fn list_all(&self) -> AppResult<Vec<Plan>> {
        let mut plans: Vec<Plan> = self.plans.lock().unwrap().values().cloned().collect();
        sort_plans(&mut plans);
        Ok(plans)
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Plan>> {
        Ok(self.plans.lock().unwrap().get(&id).cloned())
    }

    async fn upsert_by_name(&self, new_plan: &NewPlan) -> AppResult<Plan> {
        let mut plans = self.plans.lock().unwrap();

        if let Some(existing) = plans.values_mut().find(|p| p.name == new_plan.name) {
            existing.provider_price_id = new_plan.provider_price_id.clone();
            return Ok(existing.clone());
        }

        let plan = Plan {
            id: Uuid::new_v4(),
            name: new_plan.name.clone(),
            display_name: new_plan.display_name.clone(),
            price_minor_units: new_plan.price_minor_units,
            currency: new_plan.currency.clone(),
            duration_days: new_plan.duration_days,
            trial_days: new_plan.trial_days,
            is_recurring: new_plan.is_recurring,
            feature_set: new_plan.feature_set.clone(),
            provider_price_id: new_plan.provider_price_id.clone(),
            is_active: true,
            created_at: test_datetime(),
            updated_at: test_datetime(),
        };
        plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> AppResult<Option<Plan>> {
        let mut plans = self.plans.lock().unwrap();
        Ok(plans.get_mut(&id).map(|plan| {
            plan.is_active = active;
            plan.clone()
        }))
    }
}

// ============================================================================
// InMemoryPaymentRecordRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryPaymentRecordRepo {
    pub records: Mutex<Vec<PaymentRecord>>,
}

impl InMemoryPaymentRecordRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a succeeded payment outside the state machine.
    pub fn push_succeeded(&self, subscription: &Subscription, payment_id: &str, at: DateTime<Utc>) {
        self.records.lock().unwrap().push(PaymentRecord {
            id: Uuid::new_v4(),
            user_id: subscription.user_id,
            subscription_id: subscription.id,
            provider: subscription.provider.unwrap_or(PaymentProvider::Stripe),
            provider_payment_id: payment_id.to_string(),
            amount_minor_units: 1_999,
            currency: "usd".to_string(),
            status: PaymentStatus::Succeeded,
            method: None,
            created_at: at,
        });
    }
}

#[async_trait]
impl PaymentRecordRepo for InMemoryPaymentRecordRepo {
    async fn get_by_provider_payment_id(
        &self,
        provider_payment_id: &str,
    ) -> AppResult<Option<PaymentRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.provider_payment_id == provider_payment_id)
            .cloned())
    }

    async fn list_by_user(&self, user_id: Uuid) -> AppResult<Vec<PaymentRecord>> {
        let mut records: Vec<PaymentRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn has_succeeded_since(
        &self,
        subscription_id: Uuid,
        since: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(self.records.lock().unwrap().iter().any(|r| {
            r.subscription_id == subscription_id
                && r.status == PaymentStatus::Succeeded
                && r.created_at > since
        }))
    }

    async fn list_since(&self, since: DateTime<Utc>) -> AppResult<Vec<PaymentRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.created_at >= since)
            .cloned()
            .collect())
    }
}

// ============================================================================
// InMemorySubscriptionRepo
// ============================================================================

/// Mirrors the database constraints: one non-terminal subscription per user, one ledger
/// entry per provider payment id, optimistic versioning.
pub struct InMemorySubscriptionRepo {
    pub subscriptions: Mutex<HashMap<Uuid, Subscription>>,
    payments: Arc<InMemoryPaymentRecordRepo>,
    fail_writes: AtomicBool,
    failing_ids: Mutex<HashSet<Uuid>>,
}

impl InMemorySubscriptionRepo {
    pub fn new(payments: Arc<InMemoryPaymentRecordRepo>) -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            payments,
            fail_writes: AtomicBool::new(false),
            failing_ids: Mutex::new(HashSet::new()),
        }
    }

    /// Make every write fail with a database error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make writes to one subscription fail with a database error.
    pub fn fail_updates_for(&self, id: Uuid) {
        self.failing_ids.lock().unwrap().insert(id);
    }

    fn check_writable(&self, id: Uuid) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) || self.failing_ids.lock().unwrap().contains(&id)
        {
            return Err(AppError::Database("simulated write failure".into()));
        }
        Ok(())
    }

    fn insert_locked(
        subscriptions: &mut HashMap<Uuid, Subscription>,
        subscription: &Subscription,
    ) -> AppResult<Subscription> {
        let clashes = !subscription.status.is_terminal()
            && subscriptions.values().any(|s| {
                s.user_id == subscription.user_id && !s.status.is_terminal()
            });
        if clashes {
            return Err(AppError::Conflict(
                "User already has a live subscription".into(),
            ));
        }
        subscriptions.insert(subscription.id, subscription.clone());
        Ok(subscription.clone())
    }

    fn update_locked(
        subscriptions: &mut HashMap<Uuid, Subscription>,
        subscription: &Subscription,
        expected_version: i64,
    ) -> AppResult<Subscription> {
        let stored = subscriptions
            .get_mut(&subscription.id)
            .ok_or(AppError::NotFound)?;
        if stored.version != expected_version {
            return Err(AppError::ConcurrentModification);
        }
        let mut updated = subscription.clone();
        updated.version = expected_version + 1;
        *stored = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl SubscriptionRepo for InMemorySubscriptionRepo {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Subscription>> {
        Ok(self.subscriptions.lock().unwrap().get(&id).cloned())
    }

    async fn get_latest_for_user(&self, user_id: Uuid) -> AppResult<Option<Subscription>> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| (!s.status.is_terminal(), s.created_at))
            .cloned())
    }

    async fn get_by_provider_subscription_id(
        &self,
        provider: PaymentProvider,
        provider_subscription_id: &str,
    ) -> AppResult<Option<Subscription>> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| {
                s.provider == Some(provider)
                    && s.provider_subscription_id.as_deref() == Some(provider_subscription_id)
            })
            .max_by_key(|s| (!s.status.is_terminal(), s.created_at))
            .cloned())
    }

    async fn list_by_status(&self, statuses: &[SubscriptionStatus]) -> AppResult<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| statuses.contains(&s.status))
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| s.current_period_end);
        Ok(subscriptions)
    }

    async fn count_by_status(&self) -> AppResult<Vec<(SubscriptionStatus, i64)>> {
        let mut counts: HashMap<SubscriptionStatus, i64> = HashMap::new();
        for subscription in self.subscriptions.lock().unwrap().values() {
            *counts.entry(subscription.status).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn insert(&self, subscription: &Subscription) -> AppResult<Subscription> {
        self.check_writable(subscription.id)?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        Self::insert_locked(&mut subscriptions, subscription)
    }

    async fn update(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> AppResult<Subscription> {
        self.check_writable(subscription.id)?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        Self::update_locked(&mut subscriptions, subscription, expected_version)
    }

    async fn write_with_payment(
        &self,
        write: SubscriptionWrite,
        payment: &PaymentRecord,
    ) -> AppResult<Subscription> {
        self.check_writable(write.subscription().id)?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let mut records = self.payments.records.lock().unwrap();

        if records
            .iter()
            .any(|r| r.provider_payment_id == payment.provider_payment_id)
        {
            return Err(AppError::Conflict("Payment already recorded".into()));
        }

        let saved = match &write {
            SubscriptionWrite::Insert(subscription) => {
                Self::insert_locked(&mut subscriptions, subscription)?
            }
            SubscriptionWrite::Update {
                subscription,
                expected_version,
            } => Self::update_locked(&mut subscriptions, subscription, *expected_version)?,
        };
        records.push(payment.clone());
        Ok(saved)
    }
}

// ============================================================================
// InMemoryProcessedWebhookRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryProcessedWebhookRepo {
    pub events: Mutex<Vec<(PaymentProvider, String, String)>>,
}

impl InMemoryProcessedWebhookRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessedWebhookRepo for InMemoryProcessedWebhookRepo {
    async fn is_processed(&self, provider: PaymentProvider, event_id: &str) -> AppResult<bool> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|(p, id, _)| *p == provider && id == event_id))
    }

    async fn mark_processed(
        &self,
        provider: PaymentProvider,
        event_id: &str,
        event_type: &str,
        _processed_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut events = self.events.lock().unwrap();
        if !events
            .iter()
            .any(|(p, id, _)| *p == provider && id == event_id)
        {
            events.push((provider, event_id.to_string(), event_type.to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// InMemoryNotificationLogRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryNotificationLogRepo {
    pub claims: Mutex<HashSet<(Uuid, NoticeTemplate, NaiveDate)>>,
}

impl InMemoryNotificationLogRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationLogRepo for InMemoryNotificationLogRepo {
    async fn claim(
        &self,
        subscription_id: Uuid,
        template: NoticeTemplate,
        sent_on: NaiveDate,
    ) -> AppResult<bool> {
        Ok(self
            .claims
            .lock()
            .unwrap()
            .insert((subscription_id, template, sent_on)))
    }

    async fn release(
        &self,
        subscription_id: Uuid,
        template: NoticeTemplate,
        sent_on: NaiveDate,
    ) -> AppResult<()> {
        self.claims
            .lock()
            .unwrap()
            .remove(&(subscription_id, template, sent_on));
        Ok(())
    }
}
