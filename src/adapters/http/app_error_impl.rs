use crate::app_error::{AppError, ErrorCode};
use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self);

        // Log the error before it gets converted into a status response.
        if status.is_server_error() {
            tracing::error!(error = ?self, %status, "Request failed");
        } else {
            tracing::warn!(error = %self, %status, "Request rejected");
        }

        let code = self.code();
        match self {
            AppError::Conflict(msg) | AppError::InvalidInput(msg) => {
                error_resp(status, code, Some(msg))
            }
            AppError::InvalidStateTransition { .. } => {
                error_resp(status, code, Some(self.to_string()))
            }
            AppError::Provider { provider, .. } | AppError::ProviderTimeout { provider, .. } => {
                error_resp(
                    status,
                    code,
                    Some(format!("{} is unavailable, try again shortly", provider.display_name())),
                )
            }
            _ => error_resp(status, code, None),
        }
    }
}

fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::SignatureInvalid => StatusCode::BAD_REQUEST,
        AppError::Conflict(_) => StatusCode::CONFLICT,
        AppError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        AppError::Provider { .. } => StatusCode::BAD_GATEWAY,
        AppError::ProviderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AppError::ConcurrentModification => StatusCode::SERVICE_UNAVAILABLE,
        AppError::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::NotFound => StatusCode::NOT_FOUND,
        AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_resp(status: StatusCode, code: ErrorCode, message: Option<String>) -> Response {
    let body = match message {
        Some(msg) => serde_json::json!({ "code": code.as_str(), "message": msg }),
        None => serde_json::json!({ "code": code.as_str() }),
    };
    (status, Json(body)).into_response()
}
