use crate::handlers::common::{success_response, validate_input};
use crate::{
    auth::Owner,
    entities::{PaymentMethodEntry, PaymentModel},
    errors::ServiceError,
    services::{payment_reconciliation::ReconciliationOutcome, payments::InitializedPayment},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "order_id": "550e8400-e29b-41d4-a716-446655440000"
}))]
pub struct InitializePaymentRequest {
    /// Pending order to pay for
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "reference": "PAY-1a2b3c4d-1733740200-1K7QZ"
}))]
pub struct VerifyPaymentRequest {
    /// Payment reference returned when the order was created
    #[validate(length(min = 1, max = 128))]
    pub reference: String,
}

/// Payment routes. The provider webhook is mounted separately because it is
/// authenticated by signature rather than by owner.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/payments", get(list_payments))
        .route("/payments/:id", get(get_payment))
        .route("/payment-methods", get(list_payment_methods))
        .route("/payments/initialize", post(initialize_payment))
        .route("/payments/confirm/:reference", get(confirm_payment))
        .route("/payments/verify", post(verify_payment))
}

/// Start a hosted checkout with the payment provider
#[utoipa::path(
    post,
    path = "/api/v1/payments/initialize",
    request_body = InitializePaymentRequest,
    responses(
        (status = 200, description = "Checkout initialized", body = crate::ApiResponse<InitializedPayment>),
        (status = 400, description = "Missing email or declined by the provider", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not awaiting payment", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Payments"
)]
pub async fn initialize_payment(
    State(state): State<AppState>,
    owner: Owner,
    Json(request): Json<InitializePaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&request)?;

    let initialized = state
        .services
        .payments
        .initialize(&owner, request.order_id)
        .await?;
    Ok(success_response(initialized))
}

/// Confirm a payment after the provider redirects the customer back
#[utoipa::path(
    get,
    path = "/api/v1/payments/confirm/{reference}",
    params(("reference" = String, Path, description = "Payment reference")),
    responses(
        (status = 200, description = "Payment reconciled", body = crate::ApiResponse<ReconciliationOutcome>),
        (status = 400, description = "Verification failed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown reference", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable or timed out", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Payments"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    owner: Owner,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .services
        .reconciliation
        .reconcile(&reference, Some(&owner))
        .await?;
    Ok(success_response(outcome))
}

/// Verify a payment by reference
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment reconciled", body = crate::ApiResponse<ReconciliationOutcome>),
        (status = 400, description = "Verification failed", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable or timed out", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    owner: Owner,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&request)?;

    let outcome = state
        .services
        .reconciliation
        .reconcile(&request.reference, Some(&owner))
        .await?;
    Ok(success_response(outcome))
}

/// List the caller's payments
#[utoipa::path(
    get,
    path = "/api/v1/payments",
    responses(
        (status = 200, description = "Payments", body = crate::ApiResponse<Vec<PaymentModel>>)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    owner: Owner,
) -> Result<impl IntoResponse, ServiceError> {
    let payments = state.services.payments.list(&owner).await?;
    Ok(success_response(payments))
}

/// Get one of the caller's payments
#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment", body = crate::ApiResponse<PaymentModel>),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    owner: Owner,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let payment = state.services.payments.get(&owner, payment_id).await?;
    Ok(success_response(payment))
}

/// List the payment methods customers can choose from
#[utoipa::path(
    get,
    path = "/api/v1/payment-methods",
    responses(
        (status = 200, description = "Active payment methods", body = crate::ApiResponse<Vec<PaymentMethodEntry>>)
    ),
    tag = "Payments"
)]
pub async fn list_payment_methods(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let methods = state.services.payments.list_methods().await?;
    Ok(success_response(methods))
}
