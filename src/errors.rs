use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::payment_gateway::GatewayError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned for every failed request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "message": "Cart is empty",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Bad Request")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "Cart is empty")]
    pub message: String,
    /// Machine-readable error code
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "empty_cart")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Missing profile: {0}")]
    MissingProfile(String),

    #[error("Invalid order transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Payment verification failed: {0}")]
    PaymentVerification(String),

    #[error("Orphan payment: {0}")]
    OrphanPayment(String),

    #[error("Payment gateway timed out: {0}")]
    GatewayTimeout(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout(msg) => ServiceError::GatewayTimeout(msg),
            GatewayError::InvalidAmount(msg) => ServiceError::ValidationError(msg),
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

impl ServiceError {
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        ServiceError::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::EmptyCart
            | Self::MissingProfile(_)
            | Self::PaymentVerification(_)
            | Self::OrphanPayment(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) | Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::GatewayTimeout(_) | Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable code clients can branch on
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::EmptyCart => "empty_cart",
            Self::MissingProfile(_) => "missing_profile",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::PaymentVerification(_) => "payment_verification_failed",
            Self::OrphanPayment(_) => "orphan_payment",
            Self::GatewayTimeout(_) => "gateway_timeout",
            Self::ExternalServiceError(_) => "gateway_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal and gateway errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::GatewayTimeout(_) => {
                "Payment provider did not respond in time; please retry verification".to_string()
            }
            Self::ExternalServiceError(_) => {
                "Payment provider is unavailable; please retry later".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = current_request_id();

        if status.is_server_error() {
            tracing::error!(
                request_id = request_id.as_deref().unwrap_or("-"),
                code = self.code(),
                error = %self,
                "Request failed"
            );
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: Some(self.code().to_string()),
            request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
