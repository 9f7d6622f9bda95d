//! Scriptable payment gateway, notifier and clock doubles.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{
    app_error::{AppError, AppResult},
    application::{
        clock::Clock,
        ports::{
            notifier::{Notice, NoticeTemplate, Notifier},
            payment_gateway::{
                CheckoutCustomer, CheckoutHandle, CheckoutUrls, PaymentDetails, PaymentGatewayPort,
            },
        },
    },
    domain::entities::{
        billing_event::WebhookEnvelope, payment_provider::PaymentProvider, plan::Plan,
    },
};

// ============================================================================
// MockGateway
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayBehavior {
    Succeed,
    /// Every remote call returns a provider error.
    Fail,
    /// Every remote call stalls past any reasonable timeout.
    Hang,
}

/// Signature accepted by the mock for both payment confirmations and webhooks.
pub const MOCK_VALID_SIGNATURE: &str = "valid";

pub struct MockGateway {
    provider: PaymentProvider,
    behavior: Mutex<GatewayBehavior>,
    payments: Mutex<HashMap<String, PaymentDetails>>,
    webhooks: Mutex<HashMap<String, WebhookEnvelope>>,
    cancelled: Mutex<Vec<(String, bool)>>,
    plan_changes: Mutex<Vec<(String, String)>>,
    checkouts: AtomicUsize,
}

impl MockGateway {
    pub fn new(provider: PaymentProvider) -> Self {
        Self {
            provider,
            behavior: Mutex::new(GatewayBehavior::Succeed),
            payments: Mutex::new(HashMap::new()),
            webhooks: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(Vec::new()),
            plan_changes: Mutex::new(Vec::new()),
            checkouts: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: GatewayBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn add_payment(
        &self,
        payment_id: &str,
        order_id: &str,
        captured: bool,
        amount_minor_units: i64,
        currency: &str,
    ) {
        self.payments.lock().unwrap().insert(
            payment_id.to_string(),
            PaymentDetails {
                payment_id: payment_id.to_string(),
                order_id: Some(order_id.to_string()),
                captured,
                amount_minor_units,
                currency: currency.to_string(),
                method: Some("upi".to_string()),
            },
        );
    }

    /// Registers an envelope and returns the raw body that parses to it.
    pub fn queue_webhook(&self, envelope: WebhookEnvelope) -> String {
        let body = format!(r#"{{"id":"{}"}}"#, envelope.event_id);
        self.webhooks.lock().unwrap().insert(body.clone(), envelope);
        body
    }

    pub fn cancelled(&self) -> Vec<(String, bool)> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn plan_changes(&self) -> Vec<(String, String)> {
        self.plan_changes.lock().unwrap().clone()
    }

    async fn remote_call(&self, operation: &'static str) -> AppResult<()> {
        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            GatewayBehavior::Succeed => Ok(()),
            GatewayBehavior::Fail => Err(AppError::Provider {
                provider: self.provider,
                operation,
                code: "mock_failure".to_string(),
                message: "scripted failure".to_string(),
            }),
            GatewayBehavior::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl PaymentGatewayPort for MockGateway {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    async fn create_checkout(
        &self,
        _customer: &CheckoutCustomer,
        plan: &Plan,
        _urls: &CheckoutUrls,
    ) -> AppResult<CheckoutHandle> {
        self.remote_call("create_checkout").await?;
        let n = self.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(match self.provider {
            PaymentProvider::Stripe => CheckoutHandle::Redirect {
                url: format!("https://checkout.stripe.test/cs_mock_{n}"),
                session_id: format!("cs_mock_{n}"),
            },
            PaymentProvider::Razorpay => CheckoutHandle::Order {
                order_id: format!("order_mock_{n}"),
                amount: plan.price_minor_units,
                currency: plan.currency.to_uppercase(),
                key_id: "rzp_test_mock".to_string(),
            },
        })
    }

    fn verify_payment(&self, _payment_id: &str, _order_id: &str, signature: &str) -> AppResult<bool> {
        Ok(signature == MOCK_VALID_SIGNATURE)
    }

    async fn fetch_payment(&self, payment_id: &str) -> AppResult<PaymentDetails> {
        self.remote_call("fetch_payment").await?;
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .ok_or_else(|| AppError::Provider {
                provider: self.provider,
                operation: "fetch_payment",
                code: "BAD_REQUEST_ERROR".to_string(),
                message: "The id provided does not exist".to_string(),
            })
    }

    async fn cancel_recurring(
        &self,
        provider_subscription_id: &str,
        at_period_end: bool,
    ) -> AppResult<()> {
        self.remote_call("cancel_recurring").await?;
        self.cancelled
            .lock()
            .unwrap()
            .push((provider_subscription_id.to_string(), at_period_end));
        Ok(())
    }

    async fn change_recurring_plan(
        &self,
        provider_subscription_id: &str,
        new_price_id: &str,
    ) -> AppResult<()> {
        self.remote_call("change_recurring_plan").await?;
        self.plan_changes.lock().unwrap().push((
            provider_subscription_id.to_string(),
            new_price_id.to_string(),
        ));
        Ok(())
    }

    fn verify_webhook(&self, _payload: &[u8], signature: &str) -> AppResult<()> {
        if signature == MOCK_VALID_SIGNATURE {
            Ok(())
        } else {
            Err(AppError::SignatureInvalid)
        }
    }

    fn parse_webhook(&self, payload: &[u8]) -> AppResult<WebhookEnvelope> {
        let body = std::str::from_utf8(payload)
            .map_err(|_| AppError::InvalidInput("Webhook body is not UTF-8".into()))?;
        self.webhooks
            .lock()
            .unwrap()
            .get(body)
            .cloned()
            .ok_or_else(|| AppError::InvalidInput("Unrecognised webhook payload".into()))
    }
}

// ============================================================================
// RecordingNotifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notice>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    pub fn templates(&self) -> Vec<NoticeTemplate> {
        self.sent.lock().unwrap().iter().map(|n| n.template).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notice: &Notice) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Internal("notifier unavailable".into()));
        }
        self.sent.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

// ============================================================================
// ManualClock
// ============================================================================

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
