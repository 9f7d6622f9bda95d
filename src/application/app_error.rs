use thiserror::Error;

use crate::domain::entities::{
    payment_provider::PaymentProvider,
    subscription::{SubscriptionOperation, SubscriptionStatus, TransitionError},
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Webhook signature invalid")]
    SignatureInvalid,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Cannot {operation} a {from} subscription")]
    InvalidStateTransition {
        from: SubscriptionStatus,
        operation: SubscriptionOperation,
    },

    #[error("{provider} {operation} failed ({code}): {message}")]
    Provider {
        provider: PaymentProvider,
        operation: &'static str,
        code: String,
        message: String,
    },

    #[error("{provider} {operation} timed out")]
    ProviderTimeout {
        provider: PaymentProvider,
        operation: &'static str,
    },

    #[error("Record was modified concurrently")]
    ConcurrentModification,

    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(String),

    #[error("Missing or invalid caller identity")]
    Unauthorized,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found")]
    NotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transient failures a later attempt may get past. Webhooks answer these with 5xx
    /// so the provider redelivers; sweeps leave them for the next tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(_)
            | AppError::Provider { .. }
            | AppError::ProviderTimeout { .. }
            | AppError::ConcurrentModification
            | AppError::LockTimeout(_)
            | AppError::Internal(_) => true,

            AppError::SignatureInvalid
            | AppError::Conflict(_)
            | AppError::InvalidStateTransition { .. }
            | AppError::Unauthorized
            | AppError::InvalidInput(_)
            | AppError::NotFound => false,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::SignatureInvalid => ErrorCode::InvalidSignature,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            AppError::Provider { .. } => ErrorCode::ProviderError,
            AppError::ProviderTimeout { .. } => ErrorCode::ProviderTimeout,
            AppError::ConcurrentModification => ErrorCode::ConcurrentModification,
            AppError::LockTimeout(_) => ErrorCode::LockTimeout,
            AppError::Unauthorized => ErrorCode::Unauthorized,
            AppError::InvalidInput(_) => ErrorCode::InvalidInput,
            AppError::NotFound => ErrorCode::NotFound,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::AlreadySubscribed(status) => {
                AppError::Conflict(format!("User already has a {} subscription", status))
            }
            TransitionError::NotAllowed { from, operation } => {
                AppError::InvalidStateTransition { from, operation }
            }
            TransitionError::NoSubscription(_) => AppError::NotFound,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    DatabaseError,
    InvalidSignature,
    Conflict,
    InvalidStateTransition,
    ProviderError,
    ProviderTimeout,
    ConcurrentModification,
    LockTimeout,
    Unauthorized,
    InvalidInput,
    NotFound,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorCode::ProviderError => "PROVIDER_ERROR",
            ErrorCode::ProviderTimeout => "PROVIDER_TIMEOUT",
            ErrorCode::ConcurrentModification => "CONCURRENT_MODIFICATION",
            ErrorCode::LockTimeout => "LOCK_TIMEOUT",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
