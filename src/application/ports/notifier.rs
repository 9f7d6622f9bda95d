use async_trait::async_trait;
use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::app_error::AppResult;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NoticeTemplate {
    TrialStarted,
    SubscriptionActivated,
    SubscriptionRenewed,
    PaymentFailed,
    SubscriptionPastDue,
    SubscriptionCancelled,
    SubscriptionExpired,
    ExpiringSoon,
    TrialEnding,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub to: String,
    pub user_id: Uuid,
    pub template: NoticeTemplate,
    pub payload: serde_json::Value,
}

/// Transactional messaging collaborator. Rendering and transport live behind it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notice: &Notice) -> AppResult<()>;
}
