//! Wiring of the billing use cases over in-memory mocks.
//!
//! `TestBilling` exposes every use case together with the mocks behind it so tests can
//! drive a flow and then inspect the stored records. `TestAppStateBuilder` wraps it in an
//! `AppState` for HTTP-level tests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use chrono::Duration;
use secrecy::SecretString;
use url::Url;
use uuid::Uuid;

use crate::{
    adapters::http::app_state::AppState,
    application::{
        clock::Clock,
        locks::KeyedLocks,
        ports::payment_gateway::PaymentGateways,
        use_cases::{
            billing::BillingUseCases,
            notices::SubscriptionNotices,
            plan_catalog::{PlanCatalogUseCases, default_catalog},
            reconciliation::{ReconciliationUseCases, SweepSettings},
            subscription::{ActivationInput, SubscriptionUseCases},
            webhook::WebhookUseCases,
        },
    },
    domain::entities::{
        payment_provider::PaymentProvider, plan::Plan, subscription::Subscription,
    },
    infra::config::AppConfig,
    test_utils::{
        InMemoryNotificationLogRepo, InMemoryPaymentRecordRepo, InMemoryPlanRepo,
        InMemoryProcessedWebhookRepo, InMemorySubscriptionRepo, ManualClock, MockGateway,
        RecordingNotifier, payment_facts, test_datetime,
    },
};

pub const TEST_ADMIN_TOKEN: &str = "test_admin_token";
pub const TEST_PRO_PRICE_ID: &str = "price_pro_monthly_test";

pub struct TestBilling {
    pub clock: Arc<ManualClock>,
    pub plan_catalog: Arc<PlanCatalogUseCases>,
    pub subscriptions: Arc<SubscriptionUseCases>,
    pub billing: Arc<BillingUseCases>,
    pub webhooks: Arc<WebhookUseCases>,
    pub reconciliation: Arc<ReconciliationUseCases>,
    pub plan_repo: Arc<InMemoryPlanRepo>,
    pub subscription_repo: Arc<InMemorySubscriptionRepo>,
    pub payments: Arc<InMemoryPaymentRecordRepo>,
    pub processed: Arc<InMemoryProcessedWebhookRepo>,
    pub notification_log: Arc<InMemoryNotificationLogRepo>,
    pub notifier: Arc<RecordingNotifier>,
    pub stripe: Arc<MockGateway>,
    pub razorpay: Arc<MockGateway>,
    seeded: Vec<Plan>,
}

impl TestBilling {
    /// All use cases over fresh mocks, with the default catalog (including the recurring
    /// plan) seeded and the clock fixed at [`test_datetime`].
    pub async fn new() -> Self {
        let clock = Arc::new(ManualClock::new(test_datetime()));
        let clock_dyn: Arc<dyn Clock> = clock.clone();
        let locks = Arc::new(KeyedLocks::new(std::time::Duration::from_secs(2)));

        let plan_repo = Arc::new(InMemoryPlanRepo::new());
        let payments = Arc::new(InMemoryPaymentRecordRepo::new());
        let subscription_repo = Arc::new(InMemorySubscriptionRepo::new(payments.clone()));
        let processed = Arc::new(InMemoryProcessedWebhookRepo::new());
        let notification_log = Arc::new(InMemoryNotificationLogRepo::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let stripe = Arc::new(MockGateway::new(PaymentProvider::Stripe));
        let razorpay = Arc::new(MockGateway::new(PaymentProvider::Razorpay));

        let gateways = PaymentGateways::new()
            .with(stripe.clone())
            .with(razorpay.clone());

        let plan_catalog = Arc::new(PlanCatalogUseCases::new(plan_repo.clone()));
        let seeded = plan_catalog
            .seed_plans(&default_catalog(Some(TEST_PRO_PRICE_ID.to_string())))
            .await
            .unwrap();

        let subscriptions = Arc::new(SubscriptionUseCases::new(
            subscription_repo.clone(),
            payments.clone(),
            plan_catalog.clone(),
            locks.clone(),
            clock_dyn.clone(),
            Duration::days(3),
        ));
        let notices = Arc::new(SubscriptionNotices::new(
            notifier.clone(),
            plan_catalog.clone(),
        ));
        let billing = Arc::new(BillingUseCases::new(
            plan_catalog.clone(),
            subscriptions.clone(),
            gateways.clone(),
            notices.clone(),
            clock_dyn.clone(),
            std::time::Duration::from_millis(50),
        ));
        let webhooks = Arc::new(WebhookUseCases::new(
            gateways,
            plan_catalog.clone(),
            subscriptions.clone(),
            processed.clone(),
            notices.clone(),
            locks,
            clock_dyn,
        ));
        let reconciliation = Arc::new(ReconciliationUseCases::new(
            subscriptions.clone(),
            plan_catalog.clone(),
            notices,
            notification_log.clone(),
            SweepSettings::default(),
        ));

        Self {
            clock,
            plan_catalog,
            subscriptions,
            billing,
            webhooks,
            reconciliation,
            plan_repo,
            subscription_repo,
            payments,
            processed,
            notification_log,
            notifier,
            stripe,
            razorpay,
            seeded,
        }
    }

    /// Seeded plan by name. Panics on unknown names.
    pub fn plan(&self, name: &str) -> Plan {
        self.seeded
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("no seeded plan named {name}"))
    }

    /// Activation paying the full price of `plan_name` for one period starting now.
    pub fn activation_input(&self, user_id: Uuid, plan_name: &str, payment_id: &str) -> ActivationInput {
        let plan = self.plan(plan_name);
        let now = self.clock.now();
        let provider = plan.billing_provider().unwrap_or(PaymentProvider::Razorpay);
        ActivationInput {
            user_id,
            user_email: Some("dev@example.com".to_string()),
            plan_id: plan.id,
            payment: payment_facts(provider, payment_id, plan.price_minor_units, &plan.currency),
            period_start: now,
            period_end: plan.period_end_from(now),
            provider_customer_id: None,
            provider_subscription_id: None,
        }
    }

    /// Active Stripe-billed subscription on the recurring plan.
    pub async fn active_recurring(&self, user_id: Uuid, provider_subscription_id: &str) -> Subscription {
        let mut input = self.activation_input(
            user_id,
            "pro-monthly",
            &format!("in_first_{provider_subscription_id}"),
        );
        input.provider_customer_id = Some("cus_test".to_string());
        input.provider_subscription_id = Some(provider_subscription_id.to_string());
        self.subscriptions.activate_from_payment(input).await.unwrap()
    }
}

/// Builder for creating `AppState` with in-memory mocks for testing.
///
/// # Example
///
/// ```ignore
/// let (app_state, billing) = TestAppStateBuilder::new().build().await;
/// let server = TestServer::new(build_test_router(app_state)).unwrap();
/// ```
pub struct TestAppStateBuilder {
    admin_token: String,
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        Self {
            admin_token: TEST_ADMIN_TOKEN.to_string(),
        }
    }

    pub fn with_admin_token(mut self, token: &str) -> Self {
        self.admin_token = token.to_string();
        self
    }

    /// Build the AppState and return the mocks behind it for assertions.
    pub async fn build(self) -> (AppState, TestBilling) {
        let billing = TestBilling::new().await;

        let config = Arc::new(AppConfig {
            bind_addr: "127.0.0.1:3001".parse::<SocketAddr>().unwrap(),
            database_url: String::new(),
            app_origin: Url::parse("http://localhost:3000").unwrap(),
            cors_origin: HeaderValue::from_static("http://localhost:3000"),
            admin_api_token: SecretString::new(self.admin_token.into()),
            stripe: None,
            razorpay: None,
            resend_api_key: None,
            email_from: "billing@test".to_string(),
            provider_timeout: std::time::Duration::from_millis(50),
            lock_timeout: std::time::Duration::from_secs(2),
            daily_sweep_cron: "0 0 3 * * *".to_string(),
            trial_sweep_cron: "0 0 */6 * * *".to_string(),
            analytics_sweep_cron: "0 0 4 * * Mon".to_string(),
            expiring_soon_days: 3,
            trial_lookahead_hours: 24,
            past_due_grace_days: 3,
            seed_plans: false,
        });

        let app_state = AppState {
            config,
            clock: billing.clock.clone(),
            plan_catalog: billing.plan_catalog.clone(),
            subscriptions: billing.subscriptions.clone(),
            billing: billing.billing.clone(),
            webhooks: billing.webhooks.clone(),
            reconciliation: billing.reconciliation.clone(),
        };
        (app_state, billing)
    }
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
