use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{
    payment_record::{PaymentRecord, PaymentStatus},
    plan::Plan,
    subscription::{Subscription, SubscriptionStatus},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub trialing: i64,
    pub active: i64,
    pub past_due: i64,
    pub cancelled: i64,
    pub expired: i64,
    pub failed: i64,
    /// Live subscriptions flagged to end at period end.
    pub cancelling: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueTotal {
    pub currency: String,
    pub amount_minor_units: i64,
    pub payment_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDistribution {
    pub plan_id: Uuid,
    pub plan_name: String,
    pub subscriber_count: i64,
}

/// Read-only summary produced by the weekly sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub generated_at: DateTime<Utc>,
    pub counts: StatusCounts,
    pub revenue_7d: Vec<RevenueTotal>,
    pub revenue_30d: Vec<RevenueTotal>,
    pub plan_distribution: Vec<PlanDistribution>,
}

impl AnalyticsSnapshot {
    /// `live` holds the trialing and active subscriptions, `payments` every payment of the
    /// trailing 30 days.
    pub fn build(
        now: DateTime<Utc>,
        status_counts: &[(SubscriptionStatus, i64)],
        live: &[Subscription],
        plans: &[Plan],
        payments: &[PaymentRecord],
    ) -> Self {
        let mut counts = StatusCounts::default();
        for &(status, count) in status_counts {
            let slot = match status {
                SubscriptionStatus::Trialing => &mut counts.trialing,
                SubscriptionStatus::Active => &mut counts.active,
                SubscriptionStatus::PastDue => &mut counts.past_due,
                SubscriptionStatus::Cancelled => &mut counts.cancelled,
                SubscriptionStatus::Expired => &mut counts.expired,
                SubscriptionStatus::Failed => &mut counts.failed,
            };
            *slot += count;
        }
        counts.cancelling = live.iter().filter(|s| s.is_cancelling()).count() as i64;

        let revenue_7d = revenue_since(payments, now - Duration::days(7));
        let revenue_30d = revenue_since(payments, now - Duration::days(30));

        let plan_names: HashMap<Uuid, &str> =
            plans.iter().map(|p| (p.id, p.display_name.as_str())).collect();
        let mut per_plan: HashMap<Uuid, i64> = HashMap::new();
        for sub in live.iter().filter(|s| s.status.is_live()) {
            *per_plan.entry(sub.plan_id).or_insert(0) += 1;
        }
        let mut plan_distribution: Vec<PlanDistribution> = per_plan
            .into_iter()
            .map(|(plan_id, subscriber_count)| PlanDistribution {
                plan_id,
                plan_name: plan_names
                    .get(&plan_id)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "Unknown plan".to_string()),
                subscriber_count,
            })
            .collect();
        plan_distribution.sort_by(|a, b| {
            b.subscriber_count
                .cmp(&a.subscriber_count)
                .then_with(|| a.plan_name.cmp(&b.plan_name))
        });

        Self {
            generated_at: now,
            counts,
            revenue_7d,
            revenue_30d,
            plan_distribution,
        }
    }
}

fn revenue_since(payments: &[PaymentRecord], since: DateTime<Utc>) -> Vec<RevenueTotal> {
    let mut totals: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    for payment in payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Succeeded && p.created_at >= since)
    {
        let entry = totals.entry(payment.currency.clone()).or_insert((0, 0));
        entry.0 += payment.amount_minor_units;
        entry.1 += 1;
    }
    totals
        .into_iter()
        .map(|(currency, (amount_minor_units, payment_count))| RevenueTotal {
            currency,
            amount_minor_units,
            payment_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_payment, create_test_plan, create_test_subscription};

    #[test]
    fn revenue_windows_only_count_succeeded_payments() {
        let now = Utc::now();
        let payments = vec![
            create_test_payment(|p| {
                p.amount_minor_units = 49_900;
                p.currency = "inr".into();
                p.created_at = now - Duration::days(2);
            }),
            create_test_payment(|p| {
                p.amount_minor_units = 129_900;
                p.currency = "inr".into();
                p.created_at = now - Duration::days(20);
            }),
            create_test_payment(|p| {
                p.amount_minor_units = 1_999;
                p.currency = "usd".into();
                p.created_at = now - Duration::days(1);
            }),
            create_test_payment(|p| {
                p.status = PaymentStatus::Failed;
                p.amount_minor_units = 99_999;
                p.currency = "inr".into();
                p.created_at = now - Duration::days(1);
            }),
        ];

        let snapshot = AnalyticsSnapshot::build(now, &[], &[], &[], &payments);

        assert_eq!(
            snapshot.revenue_7d,
            vec![
                RevenueTotal {
                    currency: "inr".into(),
                    amount_minor_units: 49_900,
                    payment_count: 1
                },
                RevenueTotal {
                    currency: "usd".into(),
                    amount_minor_units: 1_999,
                    payment_count: 1
                },
            ]
        );
        assert_eq!(snapshot.revenue_30d[0].amount_minor_units, 179_800);
        assert_eq!(snapshot.revenue_30d[0].payment_count, 2);
    }

    #[test]
    fn counts_and_distribution() {
        let now = Utc::now();
        let monthly = create_test_plan(|p| p.display_name = "Monthly".into());
        let yearly = create_test_plan(|p| p.display_name = "Yearly".into());

        let live = vec![
            create_test_subscription(|s| s.plan_id = monthly.id),
            create_test_subscription(|s| {
                s.plan_id = monthly.id;
                s.cancel_at_period_end = true;
            }),
            create_test_subscription(|s| s.plan_id = yearly.id),
        ];
        let status_counts = vec![
            (SubscriptionStatus::Active, 3),
            (SubscriptionStatus::Expired, 4),
        ];

        let snapshot = AnalyticsSnapshot::build(
            now,
            &status_counts,
            &live,
            &[monthly.clone(), yearly.clone()],
            &[],
        );

        assert_eq!(snapshot.counts.active, 3);
        assert_eq!(snapshot.counts.expired, 4);
        assert_eq!(snapshot.counts.cancelling, 1);
        assert_eq!(snapshot.plan_distribution.len(), 2);
        assert_eq!(snapshot.plan_distribution[0].plan_id, monthly.id);
        assert_eq!(snapshot.plan_distribution[0].subscriber_count, 2);
        assert_eq!(snapshot.plan_distribution[1].plan_name, "Yearly");
    }
}
