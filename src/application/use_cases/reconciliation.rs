//! Periodic sweeps that catch state the webhooks never delivered: lapsed periods, ended
//! trials, upcoming expiries. Each sweep walks subscriptions one at a time through the
//! state machine so a failure on one record never stops the rest.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::notifier::NoticeTemplate,
        use_cases::{
            notices::SubscriptionNotices,
            plan_catalog::PlanCatalogUseCases,
            subscription::{ExpiryOutcome, SubscriptionUseCases},
        },
    },
    domain::entities::{
        analytics::AnalyticsSnapshot,
        subscription::{ExpiryDecision, Subscription, SubscriptionStatus},
    },
};

#[async_trait]
pub trait NotificationLogRepo: Send + Sync {
    /// Claims the right to send `template` for the subscription on the UTC day `sent_on`.
    /// Returns `false` if it was already claimed.
    async fn claim(
        &self,
        subscription_id: Uuid,
        template: NoticeTemplate,
        sent_on: NaiveDate,
    ) -> AppResult<bool>;
    /// Gives a claim back after a failed send so the next sweep retries it.
    async fn release(
        &self,
        subscription_id: Uuid,
        template: NoticeTemplate,
        sent_on: NaiveDate,
    ) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    /// Fixed-term subscriptions ending within this window get a reminder.
    pub expiring_soon: Duration,
    /// Trials ending within this window get a reminder.
    pub trial_lookahead: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            expiring_soon: Duration::days(3),
            trial_lookahead: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub evaluated: usize,
    pub expired: usize,
    pub cancelled: usize,
    pub notified: usize,
    pub failed: usize,
}

pub struct ReconciliationUseCases {
    subscriptions: Arc<SubscriptionUseCases>,
    plans: Arc<PlanCatalogUseCases>,
    notices: Arc<SubscriptionNotices>,
    notification_log: Arc<dyn NotificationLogRepo>,
    settings: SweepSettings,
    latest_snapshot: RwLock<Option<AnalyticsSnapshot>>,
}

impl ReconciliationUseCases {
    pub fn new(
        subscriptions: Arc<SubscriptionUseCases>,
        plans: Arc<PlanCatalogUseCases>,
        notices: Arc<SubscriptionNotices>,
        notification_log: Arc<dyn NotificationLogRepo>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            subscriptions,
            plans,
            notices,
            notification_log,
            settings,
            latest_snapshot: RwLock::new(None),
        }
    }

    /// Ends lapsed paid subscriptions and reminds subscribers whose access ends soon
    /// without a pending cancellation.
    #[instrument(skip(self))]
    pub async fn daily_sweep(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let candidates = self
            .subscriptions
            .list_by_status(&[SubscriptionStatus::Active, SubscriptionStatus::PastDue])
            .await?;

        let mut report = SweepReport::default();
        for subscription in candidates {
            report.evaluated += 1;
            let Some(outcome) = self.expire(&subscription, now, &mut report).await else {
                continue;
            };

            if outcome.changed {
                self.notify_ended(&outcome, now, &mut report).await;
                continue;
            }

            let current = outcome.subscription;
            let ends_soon = current.current_period_end > now
                && current.current_period_end <= now + self.settings.expiring_soon;
            if current.status == SubscriptionStatus::Active
                && ends_soon
                && !current.cancel_at_period_end
            {
                self.notify_once(&current, NoticeTemplate::ExpiringSoon, now, &mut report)
                    .await;
            }
        }

        info!(
            evaluated = report.evaluated,
            expired = report.expired,
            cancelled = report.cancelled,
            notified = report.notified,
            failed = report.failed,
            "Daily sweep finished"
        );
        Ok(report)
    }

    /// Ends lapsed trials and reminds trial users shortly before the trial ends.
    #[instrument(skip(self))]
    pub async fn trial_sweep(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let trials = self
            .subscriptions
            .list_by_status(&[SubscriptionStatus::Trialing])
            .await?;

        let mut report = SweepReport::default();
        for trial in trials {
            report.evaluated += 1;
            let Some(outcome) = self.expire(&trial, now, &mut report).await else {
                continue;
            };

            if outcome.changed {
                self.notify_ended(&outcome, now, &mut report).await;
                continue;
            }

            let current = outcome.subscription;
            let trial_end = current.trial_end.unwrap_or(current.current_period_end);
            if trial_end > now
                && trial_end <= now + self.settings.trial_lookahead
                && !current.cancel_at_period_end
            {
                self.notify_once(&current, NoticeTemplate::TrialEnding, now, &mut report)
                    .await;
            }
        }

        info!(
            evaluated = report.evaluated,
            expired = report.expired,
            notified = report.notified,
            failed = report.failed,
            "Trial sweep finished"
        );
        Ok(report)
    }

    /// Recomputes the analytics snapshot. Read-only apart from the cached result.
    #[instrument(skip(self))]
    pub async fn analytics_sweep(&self, now: DateTime<Utc>) -> AppResult<AnalyticsSnapshot> {
        let counts = self.subscriptions.count_by_status().await?;
        let live = self
            .subscriptions
            .list_by_status(&[SubscriptionStatus::Trialing, SubscriptionStatus::Active])
            .await?;
        let plans = self.plans.list_all_plans().await?;
        let payments = self
            .subscriptions
            .payments_since(now - Duration::days(30))
            .await?;

        let snapshot = AnalyticsSnapshot::build(now, &counts, &live, &plans, &payments);
        info!(
            active = snapshot.counts.active,
            trialing = snapshot.counts.trialing,
            past_due = snapshot.counts.past_due,
            "Analytics snapshot computed"
        );

        let mut latest = self
            .latest_snapshot
            .write()
            .map_err(|_| AppError::Internal("analytics snapshot lock poisoned".into()))?;
        *latest = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub fn latest_analytics(&self) -> AppResult<Option<AnalyticsSnapshot>> {
        self.latest_snapshot
            .read()
            .map(|s| s.clone())
            .map_err(|_| AppError::Internal("analytics snapshot lock poisoned".into()))
    }

    async fn expire(
        &self,
        subscription: &Subscription,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Option<ExpiryOutcome> {
        match self
            .subscriptions
            .expire_if_past_period(subscription.id, now)
            .await
        {
            Ok(outcome) => Some(outcome),
            // Moved to a terminal state since the candidate list was read.
            Err(AppError::InvalidStateTransition { from, .. }) => {
                debug!(subscription_id = %subscription.id, %from, "Subscription changed during sweep");
                None
            }
            Err(e) => {
                report.failed += 1;
                error!(subscription_id = %subscription.id, error = %e, "Failed to reconcile subscription");
                None
            }
        }
    }

    async fn notify_ended(
        &self,
        outcome: &ExpiryOutcome,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let template = match outcome.decision {
            ExpiryDecision::Cancel => {
                report.cancelled += 1;
                NoticeTemplate::SubscriptionCancelled
            }
            ExpiryDecision::Expire => {
                report.expired += 1;
                NoticeTemplate::SubscriptionExpired
            }
            ExpiryDecision::Keep => return,
        };
        self.notify_once(&outcome.subscription, template, now, report)
            .await;
    }

    async fn notify_once(
        &self,
        subscription: &Subscription,
        template: NoticeTemplate,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        match self
            .try_notify_once(subscription, template, now.date_naive())
            .await
        {
            Ok(true) => report.notified += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(subscription_id = %subscription.id, %template, error = %e, "Sweep notice not sent");
            }
        }
    }

    async fn try_notify_once(
        &self,
        subscription: &Subscription,
        template: NoticeTemplate,
        sent_on: NaiveDate,
    ) -> AppResult<bool> {
        if !self
            .notification_log
            .claim(subscription.id, template, sent_on)
            .await?
        {
            return Ok(false);
        }

        match self.notices.send(subscription, template).await {
            Ok(sent) => Ok(sent),
            Err(e) => {
                if let Err(release_err) = self
                    .notification_log
                    .release(subscription.id, template, sent_on)
                    .await
                {
                    error!(subscription_id = %subscription.id, error = %release_err, "Failed to release notice claim");
                }
                Err(e)
            }
        }
    }
}
