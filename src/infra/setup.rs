use std::sync::Arc;

use chrono::Duration;
use env_helpers::get_env_default;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    adapters::http::app_state::AppState,
    application::{
        clock::{Clock, SystemClock},
        locks::KeyedLocks,
        ports::{
            notifier::Notifier,
            payment_gateway::{PaymentGatewayPort, PaymentGateways},
        },
        use_cases::{
            billing::BillingUseCases,
            notices::SubscriptionNotices,
            plan_catalog::{PlanCatalogUseCases, PlanRepo, default_catalog},
            reconciliation::{NotificationLogRepo, ReconciliationUseCases, SweepSettings},
            subscription::{PaymentRecordRepo, SubscriptionRepo, SubscriptionUseCases},
            webhook::{ProcessedWebhookRepo, WebhookUseCases},
        },
    },
    infra::{
        config::AppConfig,
        notifier::{LogNotifier, ResendNotifier},
        postgres_persistence,
        razorpay_client::RazorpayClient,
        razorpay_gateway::RazorpayGateway,
        stripe_client::StripeClient,
        stripe_gateway::StripeGateway,
    },
};

pub async fn init_app_state() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env();

    let postgres_arc = Arc::new(postgres_persistence(&config.database_url).await?);
    let plan_repo = postgres_arc.clone() as Arc<dyn PlanRepo>;
    let subscription_repo = postgres_arc.clone() as Arc<dyn SubscriptionRepo>;
    let payment_repo = postgres_arc.clone() as Arc<dyn PaymentRecordRepo>;
    let processed_repo = postgres_arc.clone() as Arc<dyn ProcessedWebhookRepo>;
    let notification_log = postgres_arc.clone() as Arc<dyn NotificationLogRepo>;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let locks = Arc::new(KeyedLocks::new(config.lock_timeout));

    let mut gateways = PaymentGateways::new();
    if let Some(stripe) = &config.stripe {
        let gateway = StripeGateway::new(
            StripeClient::new(stripe.secret_key.clone(), config.provider_timeout),
            stripe.webhook_secret.clone(),
            clock.clone(),
        );
        gateways = gateways.with(Arc::new(gateway) as Arc<dyn PaymentGatewayPort>);
    } else {
        tracing::warn!("STRIPE_SECRET_KEY not set, recurring plans cannot be purchased");
    }
    if let Some(razorpay) = &config.razorpay {
        let gateway = RazorpayGateway::new(
            RazorpayClient::new(
                razorpay.key_id.clone(),
                razorpay.key_secret.clone(),
                config.provider_timeout,
            ),
            razorpay.webhook_secret.clone(),
        );
        gateways = gateways.with(Arc::new(gateway) as Arc<dyn PaymentGatewayPort>);
    } else {
        tracing::warn!("RAZORPAY_KEY_ID not set, fixed-term plans cannot be purchased");
    }

    let notifier: Arc<dyn Notifier> = match &config.resend_api_key {
        Some(api_key) => Arc::new(ResendNotifier::new(
            api_key.clone(),
            config.email_from.clone(),
            config.app_origin.to_string(),
        )),
        None => {
            tracing::warn!("RESEND_API_KEY not set, notices will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let plan_catalog = Arc::new(PlanCatalogUseCases::new(plan_repo));
    if config.seed_plans {
        let pro_price = config
            .stripe
            .as_ref()
            .and_then(|s| s.pro_monthly_price_id.clone());
        let plans = plan_catalog.seed_plans(&default_catalog(pro_price)).await?;
        tracing::info!(count = plans.len(), "Plan catalog seeded");
    }

    let subscriptions = Arc::new(SubscriptionUseCases::new(
        subscription_repo,
        payment_repo,
        plan_catalog.clone(),
        locks.clone(),
        clock.clone(),
        Duration::days(config.past_due_grace_days),
    ));
    let notices = Arc::new(SubscriptionNotices::new(notifier, plan_catalog.clone()));
    let billing = Arc::new(BillingUseCases::new(
        plan_catalog.clone(),
        subscriptions.clone(),
        gateways.clone(),
        notices.clone(),
        clock.clone(),
        config.provider_timeout,
    ));
    let webhooks = Arc::new(WebhookUseCases::new(
        gateways,
        plan_catalog.clone(),
        subscriptions.clone(),
        processed_repo,
        notices.clone(),
        locks,
        clock.clone(),
    ));
    let reconciliation = Arc::new(ReconciliationUseCases::new(
        subscriptions.clone(),
        plan_catalog.clone(),
        notices,
        notification_log,
        SweepSettings {
            expiring_soon: Duration::days(config.expiring_soon_days),
            trial_lookahead: Duration::hours(config.trial_lookahead_hours),
        },
    ));

    Ok(AppState {
        config: Arc::new(config),
        clock,
        plan_catalog,
        subscriptions,
        billing,
        webhooks,
        reconciliation,
    })
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "subscription_engine=debug,tower_http=info".into());

    // JSON lines for log shippers, pretty output otherwise.
    let log_json: bool = get_env_default("LOG_JSON", false);
    let console_layer = if log_json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_level(true)
            .pretty()
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init()
        .ok();
}
