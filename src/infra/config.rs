use std::net::SocketAddr;
use std::time::Duration;

use axum::http::HeaderValue;
use env_helpers::{get_env, get_env_default};
use secrecy::SecretString;
use url::Url;

pub struct StripeConfig {
    pub secret_key: SecretString,
    pub webhook_secret: SecretString,
    /// Price backing the auto-renewing plan in the default catalog.
    pub pro_monthly_price_id: Option<String>,
}

pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: SecretString,
    pub webhook_secret: SecretString,
}

pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    /// Frontend origin; checkout return URLs and email links point here.
    pub app_origin: Url,
    pub cors_origin: HeaderValue,
    /// Shared secret for the `/admin` routes, sent as `X-Admin-Token`.
    pub admin_api_token: SecretString,
    /// Stripe bills recurring plans. Absent when `STRIPE_SECRET_KEY` is unset.
    pub stripe: Option<StripeConfig>,
    /// Razorpay bills fixed-term plans. Absent when `RAZORPAY_KEY_ID` is unset.
    pub razorpay: Option<RazorpayConfig>,
    /// Without a key, notices are written to the log instead of being emailed.
    pub resend_api_key: Option<SecretString>,
    pub email_from: String,
    pub provider_timeout: Duration,
    pub lock_timeout: Duration,
    pub daily_sweep_cron: String,
    pub trial_sweep_cron: String,
    pub analytics_sweep_cron: String,
    pub expiring_soon_days: i64,
    pub trial_lookahead_hours: i64,
    pub past_due_grace_days: i64,
    /// Upsert the built-in plan catalog on startup.
    pub seed_plans: bool,
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> Self {
        let bind_addr: SocketAddr = get_env_default("BIND_ADDR", "127.0.0.1:3001".parse().unwrap());
        let database_url: String = get_env("DATABASE_URL");
        let app_origin: Url = get_env("APP_ORIGIN");
        let cors_origin: HeaderValue =
            get_env_default("CORS_ORIGIN", String::from("http://localhost:3000"))
                .parse()
                .expect("CORS_ORIGIN must be a valid header value");
        let admin_api_token = SecretString::new(get_env::<String>("ADMIN_API_TOKEN").into());

        let stripe = optional_env("STRIPE_SECRET_KEY").map(|secret_key| StripeConfig {
            secret_key: SecretString::new(secret_key.into()),
            webhook_secret: SecretString::new(get_env::<String>("STRIPE_WEBHOOK_SECRET").into()),
            pro_monthly_price_id: optional_env("STRIPE_PRO_MONTHLY_PRICE_ID"),
        });

        let razorpay = optional_env("RAZORPAY_KEY_ID").map(|key_id| RazorpayConfig {
            key_id,
            key_secret: SecretString::new(get_env::<String>("RAZORPAY_KEY_SECRET").into()),
            webhook_secret: SecretString::new(
                get_env::<String>("RAZORPAY_WEBHOOK_SECRET").into(),
            ),
        });

        let resend_api_key = optional_env("RESEND_API_KEY").map(|k| SecretString::new(k.into()));
        let email_from: String =
            get_env_default("EMAIL_FROM", "billing@localhost".to_string());

        let provider_timeout_ms: u64 = get_env_default("PROVIDER_TIMEOUT_MS", 8_000);
        let lock_timeout_ms: u64 = get_env_default("LOCK_TIMEOUT_MS", 2_000);

        // Six-field cron expressions (seconds first), evaluated in UTC.
        let daily_sweep_cron: String =
            get_env_default("DAILY_SWEEP_CRON", "0 0 3 * * *".to_string());
        let trial_sweep_cron: String =
            get_env_default("TRIAL_SWEEP_CRON", "0 0 */6 * * *".to_string());
        let analytics_sweep_cron: String =
            get_env_default("ANALYTICS_SWEEP_CRON", "0 0 4 * * Mon".to_string());

        let expiring_soon_days: i64 = get_env_default("EXPIRING_SOON_DAYS", 3);
        let trial_lookahead_hours: i64 = get_env_default("TRIAL_LOOKAHEAD_HOURS", 24);
        let past_due_grace_days: i64 = get_env_default("PAST_DUE_GRACE_DAYS", 3);
        let seed_plans: bool = get_env_default("SEED_PLANS", true);

        Self {
            bind_addr,
            database_url,
            app_origin,
            cors_origin,
            admin_api_token,
            stripe,
            razorpay,
            resend_api_key,
            email_from,
            provider_timeout: Duration::from_millis(provider_timeout_ms),
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            daily_sweep_cron,
            trial_sweep_cron,
            analytics_sweep_cron,
            expiring_soon_days,
            trial_lookahead_hours,
            past_due_grace_days,
            seed_plans,
        }
    }
}
