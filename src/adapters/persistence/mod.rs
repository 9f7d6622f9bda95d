use sqlx::PgPool;

use crate::app_error::AppError;

const MAX_JSON_LOG_LEN: usize = 200;

/// Parse JSON value to target type, logging warning on failure.
///
/// SQL NULL becomes the default without a warning; only real parse failures are logged.
pub fn parse_json_with_fallback<T: serde::de::DeserializeOwned + Default>(
    json: &serde_json::Value,
    field_name: &str,
    entity_type: &str,
    entity_id: &str,
) -> T {
    if json.is_null() {
        return T::default();
    }

    serde_json::from_value(json.clone()).unwrap_or_else(|err| {
        let truncated = truncate_for_log(json.to_string());

        tracing::warn!(
            field = field_name,
            entity_type = entity_type,
            entity_id = entity_id,
            raw_json = %truncated,
            error = %err,
            "Failed to parse JSON field, using default value"
        );
        T::default()
    })
}

/// Cuts on a char boundary so multibyte payloads cannot split a code point.
fn truncate_for_log(raw: String) -> String {
    if raw.chars().count() > MAX_JSON_LOG_LEN {
        format!("{}...", raw.chars().take(MAX_JSON_LOG_LEN).collect::<String>())
    } else {
        raw
    }
}

pub mod notification_log;
pub mod payment_record;
pub mod plan;
pub mod processed_webhook;
pub mod subscription;

#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        PostgresPersistence { pool }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound,
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    AppError::Conflict(match db_err.constraint() {
                        Some("subscriptions_one_live_per_user") => {
                            "User already has a live subscription".to_string()
                        }
                        Some("payment_records_provider_payment_id_key") => {
                            "Payment already recorded".to_string()
                        }
                        _ => "A record with this value already exists".to_string(),
                    })
                } else if db_err.is_foreign_key_violation() {
                    AppError::InvalidInput("Referenced record not found".into())
                } else {
                    tracing::error!(error = ?err, "Database error");
                    AppError::Database("Database operation failed".into())
                }
            }
            _ => {
                tracing::error!(error = ?err, "Database error");
                AppError::Database("Database operation failed".into())
            }
        }
    }
}
