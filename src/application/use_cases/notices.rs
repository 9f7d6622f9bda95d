use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::{
    app_error::AppResult,
    application::{
        ports::notifier::{Notice, NoticeTemplate, Notifier},
        use_cases::plan_catalog::PlanCatalogUseCases,
    },
    domain::entities::subscription::Subscription,
};

/// Builds notices about a subscription and hands them to the notifier.
pub struct SubscriptionNotices {
    notifier: Arc<dyn Notifier>,
    plans: Arc<PlanCatalogUseCases>,
}

impl SubscriptionNotices {
    pub fn new(notifier: Arc<dyn Notifier>, plans: Arc<PlanCatalogUseCases>) -> Self {
        Self { notifier, plans }
    }

    /// Returns `false` when the subscription has no address to write to.
    pub async fn send(
        &self,
        subscription: &Subscription,
        template: NoticeTemplate,
    ) -> AppResult<bool> {
        let Some(to) = subscription.user_email.clone() else {
            debug!(subscription_id = %subscription.id, %template, "No email on file, notice skipped");
            return Ok(false);
        };

        let plan_name = match self.plans.get_plan(subscription.plan_id).await {
            Ok(plan) => plan.display_name,
            Err(_) => "your plan".to_string(),
        };
        let period_end = subscription
            .trial_end
            .filter(|_| template == NoticeTemplate::TrialEnding || template == NoticeTemplate::TrialStarted)
            .unwrap_or(subscription.current_period_end);

        let notice = Notice {
            to,
            user_id: subscription.user_id,
            template,
            payload: json!({
                "subscriptionId": subscription.id,
                "planName": plan_name,
                "status": subscription.status,
                "periodEnd": period_end.format("%Y-%m-%d").to_string(),
            }),
        };
        self.notifier.send(&notice).await?;
        Ok(true)
    }

    /// Fire-and-forget variant for paths whose outcome must not depend on delivery.
    pub async fn send_best_effort(&self, subscription: &Subscription, template: NoticeTemplate) {
        if let Err(e) = self.send(subscription, template).await {
            warn!(
                subscription_id = %subscription.id,
                %template,
                error = %e,
                "Failed to send notice"
            );
        }
    }
}
