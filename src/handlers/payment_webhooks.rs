use crate::{errors::ServiceError, AppState};
use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha512;
use tracing::{info, warn};

type HmacSha512 = Hmac<Sha512>;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // Providers sign with the account secret unless a dedicated webhook secret is set
    let secret = state
        .config
        .webhook_secret
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| state.config.gateway.secret_key.clone());
    if secret.is_empty() {
        warn!("Payment webhook received but no signing secret is configured");
        return Err(ServiceError::Unauthorized(
            "webhook signing is not configured".to_string(),
        ));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(&body, signature, &secret)? {
        warn!("Payment webhook signature verification failed");
        return Err(ServiceError::Unauthorized(
            "invalid webhook signature".to_string(),
        ));
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid webhook payload: {}", e)))?;

    match event.event.as_str() {
        "charge.success" => {
            let reference = event
                .data
                .get("reference")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ServiceError::ValidationError("charge.success without a reference".into())
                })?;

            let outcome = state
                .services
                .reconciliation
                .reconcile(reference, None)
                .await?;
            info!(
                reference,
                applied = outcome.applied,
                order_id = %outcome.order.id,
                "Payment webhook reconciled"
            );
        }
        other => {
            info!(event = other, "Ignoring payment webhook event");
        }
    }

    Ok((StatusCode::OK, "ok"))
}

/// Hex HMAC-SHA512 of the raw body, compared in constant time.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> Result<bool, ServiceError> {
    if signature.is_empty() {
        return Ok(false);
    }
    let expected = sign_payload(payload, secret)?;
    Ok(constant_time_eq(&expected, &signature.to_ascii_lowercase()))
}

pub fn sign_payload(payload: &[u8], secret: &str) -> Result<String, ServiceError> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid webhook key: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let body = br#"{"event":"charge.success","data":{"reference":"PAY-1"}}"#;
        let signature = sign_payload(body, "sk_test_secret").unwrap();
        assert_eq!(signature.len(), 128);
        assert!(verify_signature(body, &signature, "sk_test_secret").unwrap());
        assert!(verify_signature(body, &signature.to_uppercase(), "sk_test_secret").unwrap());
    }

    #[test]
    fn tampered_body_or_wrong_secret_fails() {
        let body = br#"{"event":"charge.success"}"#;
        let signature = sign_payload(body, "secret-a").unwrap();
        assert!(!verify_signature(br#"{"event":"charge.failed"}"#, &signature, "secret-a").unwrap());
        assert!(!verify_signature(body, &signature, "secret-b").unwrap());
        assert!(!verify_signature(body, "", "secret-a").unwrap());
    }

    #[test]
    fn constant_time_eq_checks_length() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(!constant_time_eq("abc", "abd"));
    }
}
