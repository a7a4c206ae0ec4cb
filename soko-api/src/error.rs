use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use soko_order::EngineError;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    /// Conflict with machine-readable details so clients can distinguish
    /// "not delivered yet" from other 409s
    ConflictError {
        message: String,
        details: serde_json::Value,
    },
    UnavailableError(String),
    Anyhow(anyhow::Error),
}

impl AppError {
    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::ConflictError {
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg, None),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::ConflictError { message, details } => {
                (StatusCode::CONFLICT, message, Some(details))
            }
            AppError::UnavailableError(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, None),
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    None,
                )
            }
        };

        let body = match details {
            Some(details) if !details.is_null() => Json(json!({
                "error": error_message,
                "details": details,
            })),
            _ => Json(json!({
                "error": error_message,
            })),
        };

        (status, body).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::OrderNotFound => AppError::NotFoundError("order not found".to_string()),
            EngineError::Forbidden => {
                AppError::AuthorizationError("caller is not a party to this order".to_string())
            }
            EngineError::InvalidTransition { from, to } => AppError::ConflictError {
                message: format!("invalid state transition from {:?} to {:?}", from, to),
                details: serde_json::Value::Null,
            },
            EngineError::NotYetDelivered {
                order_status,
                delivery_status,
            } => AppError::ConflictError {
                message: "order has no delivery confirmation yet".to_string(),
                details: json!({
                    "order_status": order_status,
                    "delivery_status": delivery_status,
                }),
            },
            EngineError::NoCourierAvailable => {
                AppError::UnavailableError("no courier available".to_string())
            }
            EngineError::Store(e) => AppError::Anyhow(e.into()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}

impl From<soko_core::StoreError> for AppError {
    fn from(err: soko_core::StoreError) -> Self {
        Self::Anyhow(err.into())
    }
}
