use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::error;

/// Domain error type shared by services and handlers.
///
/// Every variant maps to a stable HTTP status; internal variants keep their
/// detail out of the wire response.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Insufficient stock: {0}")]
    OutOfStock(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Payment not successful")]
    PaymentNotSucceeded,

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Wire format for all error responses:
/// `{"success": false, "error": {"message", "status", "details"?}}`.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub message: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ValidationError(_)
            | ServiceError::OutOfStock(_)
            | ServiceError::EmptyCart
            | ServiceError::PaymentNotSucceeded
            | ServiceError::InvalidTransition(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::GatewayError(_) => StatusCode::BAD_GATEWAY,
            ServiceError::DatabaseError(_) | ServiceError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to return to clients. Internal variants are collapsed to a
    /// generic message; the original error is logged instead.
    pub fn response_message(&self) -> String {
        match self {
            ServiceError::DatabaseError(_) | ServiceError::InternalError(_) => {
                "An internal error occurred".to_string()
            }
            ServiceError::GatewayError(_) => "Payment gateway request failed".to_string(),
            other => other.to_string(),
        }
    }

    pub fn validation_with_details(message: impl Into<String>, details: Value) -> Response {
        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                message: message.into(),
                status: StatusCode::BAD_REQUEST.as_u16(),
                details: Some(details),
            },
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                message: self.response_message(),
                status: status.as_u16(),
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(err: redis::RedisError) -> Self {
        ServiceError::InternalError(format!("redis: {}", err))
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_domain_kinds() {
        assert_eq!(
            ServiceError::ValidationError("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::NotFound("Order".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::Forbidden("not yours".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::OutOfStock("only 2 left".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ServiceError::EmptyCart.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::PaymentNotSucceeded.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidTransition("shipped -> pending".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::GatewayError("timeout".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn internal_detail_never_reaches_clients() {
        let err = ServiceError::DatabaseError(sea_orm::DbErr::Custom(
            "connection string leaked".into(),
        ));
        assert_eq!(err.response_message(), "An internal error occurred");

        let err = ServiceError::GatewayError("secret key sk_live_123".into());
        assert!(!err.response_message().contains("sk_live"));
    }

    #[test]
    fn not_found_message_names_the_resource() {
        let err = ServiceError::NotFound("Product".into());
        assert_eq!(err.response_message(), "Product not found");
    }
}
