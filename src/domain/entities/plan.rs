use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payment_provider::PaymentProvider;

/// Value of a single capability in a plan's feature set: either a toggle or a numeric limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Enabled(bool),
    Limit(i64),
}

pub type FeatureSet = BTreeMap<String, FeatureValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: Uuid,
    /// URL-safe unique code, also the seeding key.
    pub name: String,
    pub display_name: String,
    pub price_minor_units: i64,
    pub currency: String,
    pub duration_days: i32,
    /// Non-zero only for trial plans.
    pub trial_days: i32,
    pub is_recurring: bool,
    pub feature_set: FeatureSet,
    /// Stripe price id for recurring plans.
    pub provider_price_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn is_trial(&self) -> bool {
        self.trial_days > 0
    }

    /// Provider that bills this plan. Trials are issued locally and have none.
    pub fn billing_provider(&self) -> Option<PaymentProvider> {
        if self.is_trial() {
            None
        } else if self.is_recurring {
            Some(PaymentProvider::Stripe)
        } else {
            Some(PaymentProvider::Razorpay)
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::days(i64::from(self.duration_days))
    }

    pub fn period_end_from(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start + self.duration()
    }
}

/// Catalog entry as declared by the seeding step.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPlan {
    pub name: String,
    pub display_name: String,
    pub price_minor_units: i64,
    pub currency: String,
    pub duration_days: i32,
    pub trial_days: i32,
    pub is_recurring: bool,
    pub feature_set: FeatureSet,
    pub provider_price_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_plan;

    #[test]
    fn feature_values_serialize_untagged() {
        let mut features = FeatureSet::new();
        features.insert("auto_deploy".into(), FeatureValue::Enabled(true));
        features.insert("max_projects".into(), FeatureValue::Limit(5));

        let json = serde_json::to_value(&features).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"auto_deploy": true, "max_projects": 5})
        );

        let back: FeatureSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, features);
    }

    #[test]
    fn billing_provider_follows_plan_kind() {
        let trial = create_test_plan(|p| {
            p.trial_days = 3;
            p.price_minor_units = 0;
        });
        let fixed = create_test_plan(|p| p.is_recurring = false);
        let recurring = create_test_plan(|p| p.is_recurring = true);

        assert_eq!(trial.billing_provider(), None);
        assert_eq!(fixed.billing_provider(), Some(PaymentProvider::Razorpay));
        assert_eq!(recurring.billing_provider(), Some(PaymentProvider::Stripe));
    }

    #[test]
    fn period_end_adds_duration_days() {
        let plan = create_test_plan(|p| p.duration_days = 30);
        let start = Utc::now();
        assert_eq!(plan.period_end_from(start), start + Duration::days(30));
    }
}
