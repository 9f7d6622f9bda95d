use std::sync::Arc;

use crate::{
    application::{
        clock::Clock,
        use_cases::{
            billing::BillingUseCases, plan_catalog::PlanCatalogUseCases,
            reconciliation::ReconciliationUseCases, subscription::SubscriptionUseCases,
            webhook::WebhookUseCases,
        },
    },
    infra::config::AppConfig,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub clock: Arc<dyn Clock>,
    pub plan_catalog: Arc<PlanCatalogUseCases>,
    pub subscriptions: Arc<SubscriptionUseCases>,
    pub billing: Arc<BillingUseCases>,
    pub webhooks: Arc<WebhookUseCases>,
    pub reconciliation: Arc<ReconciliationUseCases>,
}
