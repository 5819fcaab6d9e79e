use crate::handlers::common::{success_response, validate_input};
use crate::{
    auth::Owner,
    errors::ServiceError,
    services::commerce::CartView,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(get_cart).delete(clear_cart))
        .route("/cart/items", post(add_to_cart))
        .route("/cart/items/:id", put(update_cart_item).delete(remove_cart_item))
}

/// Get the caller's cart with live prices
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Current cart", body = crate::ApiResponse<CartView>),
        (status = 401, description = "No bearer token or session id", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    owner: Owner,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.list(&owner).await?;
    Ok(success_response(cart))
}

/// Add a product, replacing the quantity when it is already in the cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Cart after the change", body = crate::ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity or unavailable product", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    owner: Owner,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = &state.services.cart;
    cart.add_or_update(&owner, payload.product_id, payload.quantity)
        .await?;

    Ok(success_response(cart.list(&owner).await?))
}

/// Update cart item quantity
#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{id}",
    params(("id" = Uuid, Path, description = "Cart item ID")),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Cart after the change", body = crate::ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart item not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    owner: Owner,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = &state.services.cart;
    cart.update_quantity(&owner, item_id, payload.quantity)
        .await?;

    Ok(success_response(cart.list(&owner).await?))
}

/// Remove item from cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{id}",
    params(("id" = Uuid, Path, description = "Cart item ID")),
    responses(
        (status = 200, description = "Cart after the change", body = crate::ApiResponse<CartView>),
        (status = 404, description = "Cart item not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Cart"
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    owner: Owner,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = &state.services.cart;
    cart.remove(&owner, item_id).await?;

    Ok(success_response(cart.list(&owner).await?))
}

/// Clear all items from cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Number of removed lines", body = crate::ApiResponse<ClearCartResponse>)
    ),
    security(("bearer_auth" = []), ("session_id" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    owner: Owner,
) -> Result<impl IntoResponse, ServiceError> {
    let removed = state.services.cart.clear(&owner).await?;
    Ok(success_response(ClearCartResponse { removed }))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "product_id": "550e8400-e29b-41d4-a716-446655440000",
    "quantity": 2
}))]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClearCartResponse {
    pub removed: u64,
}
