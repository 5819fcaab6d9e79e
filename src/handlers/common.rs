use crate::{errors::ServiceError, ApiResponse};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;
use validator::Validate;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Validation failed: {}", e)))
}

/// Pagination parameters for list operations
#[derive(Debug, Deserialize, Serialize, IntoParams)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    #[derive(Validate)]
    struct Quantity {
        #[validate(range(min = 1))]
        value: i32,
    }

    #[test]
    fn validate_input_maps_to_validation_error() {
        assert!(validate_input(&Quantity { value: 2 }).is_ok());
        assert!(matches!(
            validate_input(&Quantity { value: 0 }),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn created_response_wraps_data_in_envelope() {
        let response = created_response(serde_json::json!({ "id": 7 }));
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload["success"], true);
        assert_eq!(payload["data"]["id"], 7);
    }
}
