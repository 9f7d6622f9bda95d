//! Test data factories for creating valid test fixtures.
//!
//! Each factory function creates a complete, valid object with sensible defaults.
//! Use the closure parameter to override specific fields as needed.

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::domain::entities::{
    payment_provider::PaymentProvider,
    payment_record::{PaymentFacts, PaymentRecord, PaymentStatus},
    plan::{FeatureValue, Plan},
    subscription::{Subscription, SubscriptionStatus},
};

/// Fixed instant so fixtures are reproducible.
pub fn test_datetime() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0)
        .single()
        .unwrap()
}

/// Create a test plan with sensible defaults (30-day fixed-term plan).
pub fn create_test_plan(overrides: impl FnOnce(&mut Plan)) -> Plan {
    let mut plan = Plan {
        id: Uuid::new_v4(),
        name: "monthly".to_string(),
        display_name: "Monthly".to_string(),
        price_minor_units: 49_900,
        currency: "inr".to_string(),
        duration_days: 30,
        trial_days: 0,
        is_recurring: false,
        feature_set: [("max_projects".to_string(), FeatureValue::Limit(5))]
            .into_iter()
            .collect(),
        provider_price_id: None,
        is_active: true,
        created_at: test_datetime(),
        updated_at: test_datetime(),
    };
    overrides(&mut plan);
    plan
}

/// Create a test subscription with sensible defaults (active, 30-day period).
pub fn create_test_subscription(overrides: impl FnOnce(&mut Subscription)) -> Subscription {
    let start = test_datetime();
    let mut subscription = Subscription {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        user_email: Some("dev@example.com".to_string()),
        plan_id: Uuid::new_v4(),
        provider: Some(PaymentProvider::Razorpay),
        status: SubscriptionStatus::Active,
        current_period_start: start,
        current_period_end: start + Duration::days(30),
        trial_start: None,
        trial_end: None,
        cancel_at_period_end: false,
        provider_customer_id: None,
        provider_subscription_id: None,
        version: 0,
        created_at: start,
        updated_at: start,
    };
    overrides(&mut subscription);
    subscription
}

/// Create a test payment record with sensible defaults (succeeded, 499.00 INR).
pub fn create_test_payment(overrides: impl FnOnce(&mut PaymentRecord)) -> PaymentRecord {
    let mut payment = PaymentRecord {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        subscription_id: Uuid::new_v4(),
        provider: PaymentProvider::Razorpay,
        provider_payment_id: format!("pay_{}", Uuid::new_v4().simple()),
        amount_minor_units: 49_900,
        currency: "inr".to_string(),
        status: PaymentStatus::Succeeded,
        method: Some("upi".to_string()),
        created_at: test_datetime(),
    };
    overrides(&mut payment);
    payment
}

pub fn payment_facts(
    provider: PaymentProvider,
    provider_payment_id: &str,
    amount_minor_units: i64,
    currency: &str,
) -> PaymentFacts {
    PaymentFacts {
        provider,
        provider_payment_id: provider_payment_id.to_string(),
        amount_minor_units,
        currency: currency.to_string(),
        method: None,
    }
}
