use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::handlers::common::{created_response, success_response, validate_input, PaginationParams};
use crate::{
    auth::Owner,
    entities::OrderModel,
    errors::ServiceError,
    services::{
        commerce::{BuildOrderInput, BuiltOrder},
        orders::{OrderDetails, OrderListResponse},
    },
    AppState,
};

/// Order routes. There is no generic update endpoint: orders change state
/// only through checkout, payment reconciliation and cancellation.
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/cancel", post(cancel_order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Build an order from the caller's cart. The cart is emptied and a pending payment is created in the same transaction.",
    request_body = BuildOrderInput,
    responses(
        (status = 201, description = "Order created successfully", body = crate::ApiResponse<BuiltOrder>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Empty cart, missing profile or invalid input", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 409, description = "Cart changed during checkout", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    owner: Owner,
    Json(payload): Json<BuildOrderInput>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let built = state.services.checkout.build(&owner, payload).await?;
    Ok(created_response(built))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "List the caller's orders, newest first",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders", body = crate::ApiResponse<OrderListResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    owner: Owner,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state
        .services
        .orders
        .list_orders(&owner, params.page, params.per_page)
        .await?;
    Ok(success_response(orders))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    description = "Get an order with its items and payment",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved successfully", body = crate::ApiResponse<OrderDetails>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state.services.orders.get_order(&owner, id).await?;
    Ok(success_response(details))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    description = "Cancel a pending order. Orders already being processed cannot be cancelled.",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order cancelled", body = crate::ApiResponse<OrderModel>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not pending", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.order_status.cancel(&owner, id).await?;
    Ok(success_response(order))
}
