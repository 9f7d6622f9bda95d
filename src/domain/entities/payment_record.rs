use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use super::payment_provider::PaymentProvider;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, AsRefStr, Display,
    EnumString,
)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
}

/// Append-only ledger entry. One per provider payment id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    pub provider: PaymentProvider,
    pub provider_payment_id: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub method: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Money movement reported by a provider, before it is tied to a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentFacts {
    pub provider: PaymentProvider,
    pub provider_payment_id: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub method: Option<String>,
}

impl PaymentRecord {
    pub fn from_facts(
        facts: &PaymentFacts,
        user_id: Uuid,
        subscription_id: Uuid,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            subscription_id,
            provider: facts.provider,
            provider_payment_id: facts.provider_payment_id.clone(),
            amount_minor_units: facts.amount_minor_units,
            currency: facts.currency.to_lowercase(),
            status,
            method: facts.method.clone(),
            created_at: now,
        }
    }
}
