use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::{
    app_error::AppError,
    application::{ports::payment_gateway::CheckoutCustomer, validators::is_valid_email},
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// Caller identity forwarded by the auth gateway in front of this service.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
}

impl AuthUser {
    pub fn customer(&self) -> CheckoutCustomer {
        CheckoutCustomer {
            user_id: self.user_id,
            email: self.email.clone(),
        }
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };

        let user_id = header(USER_ID_HEADER)
            .and_then(|raw| Uuid::parse_str(&raw).ok())
            .ok_or(AppError::Unauthorized)?;
        let email = header(USER_EMAIL_HEADER)
            .filter(|e| is_valid_email(e))
            .ok_or(AppError::Unauthorized)?;

        Ok(AuthUser { user_id, email })
    }
}
