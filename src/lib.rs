//! Bazaar API Library
//!
//! Carts, atomic order building and payment reconciliation against a hosted
//! payment gateway.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod payment_gateway;
pub mod services;
pub mod tracing;

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, response::Json, routing::get,
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer};
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
}

/// Success envelope. Failures use [`errors::ErrorResponse`].
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        assert!(response.success);
        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn request_id_is_omitted_outside_a_request() {
        let response = ApiResponse::success(1);
        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body["data"], 1);
        assert!(body["meta"].get("request_id").is_none());
    }
}

/// Routes mounted under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    // Payment webhook (does not require an owner, but signature-verified)
    let payment_webhook = Router::new().route(
        "/payments/webhook",
        axum::routing::post(handlers::payment_webhooks::payment_webhook),
    );

    Router::new()
        .route("/health", get(health_check))
        .merge(handlers::commerce::carts_routes())
        .merge(handlers::orders::orders_routes())
        .merge(handlers::payments::payment_routes())
        .merge(payment_webhook)
}

/// Full application router with the shared middleware stack. CORS is left to
/// the caller because it depends on deployment configuration.
pub fn build_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();

    Router::<AppState>::new()
        .route("/", get(|| async { "bazaar-api up" }))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Database reachable"),
        (status = 503, description = "Database unreachable")
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (status, db_status) = match db::check_connection(&state.db).await {
        Ok(()) => (StatusCode::OK, "healthy"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    let health_data: Value = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    });

    (status, Json(ApiResponse::success(health_data)))
}
