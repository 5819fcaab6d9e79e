use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bazaar API",
        version = "1.0.0",
        description = r#"
# Bazaar Commerce API

Carts, checkout and payment confirmation for a storefront backed by a hosted payment provider.

## Identity

Requests are attributed to an owner. Signed-in customers send a bearer token:

```
Authorization: Bearer <your-jwt-token>
```

Guests send a stable session id instead:

```
X-Session-Id: <opaque-token>
```

## Payments

Creating an order also creates a pending payment with a unique reference.
`POST /payments/initialize` returns the provider checkout URL. After the
customer pays, confirm with `GET /payments/confirm/{reference}`; the provider
webhook does the same. Confirming twice is safe and returns the same order.

## Error Handling

Every error uses the same body:

```json
{
  "error": "Bad Request",
  "message": "Cart is empty",
  "details": "empty_cart",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Shopping cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Payments", description = "Payment endpoints"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Cart
        crate::handlers::commerce::carts::get_cart,
        crate::handlers::commerce::carts::add_to_cart,
        crate::handlers::commerce::carts::update_cart_item,
        crate::handlers::commerce::carts::remove_cart_item,
        crate::handlers::commerce::carts::clear_cart,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,

        // Payments
        crate::handlers::payments::initialize_payment,
        crate::handlers::payments::confirm_payment,
        crate::handlers::payments::verify_payment,
        crate::handlers::payments::list_payments,
        crate::handlers::payments::get_payment,
        crate::handlers::payments::list_payment_methods,

        // Webhooks
        crate::handlers::payment_webhooks::payment_webhook,

        // Health
        crate::health_check,
    ),
    components(
        schemas(
            // Common types
            crate::ResponseMeta,

            // Cart types
            crate::services::commerce::CartView,
            crate::services::commerce::CartLine,
            crate::handlers::commerce::carts::AddItemRequest,
            crate::handlers::commerce::carts::UpdateQuantityRequest,
            crate::handlers::commerce::carts::ClearCartResponse,

            // Order types
            crate::entities::OrderModel,
            crate::entities::OrderItemModel,
            crate::entities::OrderStatus,
            crate::services::commerce::BuildOrderInput,
            crate::services::commerce::BuiltOrder,
            crate::services::orders::OrderDetails,
            crate::services::orders::OrderListResponse,

            // Payments types
            crate::entities::PaymentModel,
            crate::entities::PaymentStatus,
            crate::entities::PaymentMethod,
            crate::entities::PaymentMethodEntry,
            crate::handlers::payments::InitializePaymentRequest,
            crate::handlers::payments::VerifyPaymentRequest,
            crate::services::payments::InitializedPayment,
            crate::services::payment_reconciliation::ReconciliationOutcome,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "session_id",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(
                    crate::auth::SESSION_HEADER,
                ))),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Bazaar API"));
        assert!(json.contains("/api/v1/orders"));
        assert!(json.contains("/api/v1/payments/confirm/{reference}"));
        assert!(json.contains("bearer_auth"));
        assert!(json.contains("session_id"));
    }
}
