use async_trait::async_trait;
use metrics::counter;
use reqwest::{header, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use super::{
    GatewayError, GatewayOutcome, InitializeRequest, InitializedTransaction, PaymentGateway,
    VerifiedTransaction,
};
use crate::config::GatewaySettings;

/// Paystack-style HTTP gateway.
#[derive(Clone)]
pub struct PaystackGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    max_retries: u32,
    backoff_base: Duration,
}

/// `{status, message, data}` wrapper around every response body.
#[derive(Debug, Deserialize)]
struct Envelope {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Serialize)]
struct InitializePayload<'a> {
    email: &'a str,
    amount: i64,
    currency: &'a str,
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    metadata: &'a Value,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    id: Value,
    status: String,
    reference: String,
    amount: i64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    gateway_response: Option<String>,
}

impl PaystackGateway {
    pub fn new(settings: &GatewaySettings) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            secret_key: settings.secret_key.clone(),
            max_retries: settings.max_retries.max(1),
            backoff_base: settings.backoff_base(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// The reference is one escaped path segment.
    fn verify_url(&self, reference: &str) -> Result<reqwest::Url, GatewayError> {
        let mut url = reqwest::Url::parse(&self.url("/transaction/verify"))
            .map_err(|e| GatewayError::Transport(format!("invalid gateway url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Transport("gateway url cannot carry a path".into()))?
            .push(reference);
        Ok(url)
    }

    async fn verify_once(
        &self,
        reference: &str,
    ) -> Result<GatewayOutcome<VerifiedTransaction>, GatewayError> {
        let response = self
            .client
            .get(self.verify_url(reference)?)
            .bearer_auth(&self.secret_key)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_transport_error)?;

        let outcome = read_outcome::<VerifyData>(response).await?;
        let data = match outcome {
            GatewayOutcome::Approved(data) => data,
            GatewayOutcome::Declined { message } => {
                return Ok(GatewayOutcome::Declined { message })
            }
        };

        if data.status != "success" {
            let message = data
                .gateway_response
                .clone()
                .unwrap_or_else(|| format!("transaction status is {}", data.status));
            return Ok(GatewayOutcome::Declined { message });
        }

        let raw = serde_json::json!({
            "id": data.id,
            "status": data.status,
            "reference": data.reference,
            "amount": data.amount,
            "currency": data.currency,
            "gateway_response": data.gateway_response,
        });

        Ok(GatewayOutcome::Approved(VerifiedTransaction {
            transaction_id: id_to_string(&data.id),
            reference: data.reference,
            amount_minor: data.amount,
            currency: data.currency,
            metadata: data.metadata,
            raw,
        }))
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    #[instrument(skip(self, request), fields(reference = %request.reference, amount_minor = request.amount_minor))]
    async fn initialize(
        &self,
        request: InitializeRequest,
    ) -> Result<GatewayOutcome<InitializedTransaction>, GatewayError> {
        let payload = InitializePayload {
            email: &request.email,
            amount: request.amount_minor,
            currency: &request.currency,
            reference: &request.reference,
            callback_url: request.callback_url.as_deref(),
            metadata: &request.metadata,
        };

        let response = self
            .client
            .post(self.url("/transaction/initialize"))
            .bearer_auth(&self.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(map_transport_error)?;

        let outcome = read_outcome::<InitializedTransaction>(response).await;
        if let Err(e) = &outcome {
            error!(error = %e, "Transaction initialization failed");
        }
        outcome
    }

    #[instrument(skip(self))]
    async fn verify(
        &self,
        reference: &str,
    ) -> Result<GatewayOutcome<VerifiedTransaction>, GatewayError> {
        let mut attempt = 1;
        loop {
            match self.verify_once(reference).await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Transient gateway failure during verification; retrying"
                    );
                    counter!("bazaar_gateway_retries_total", 1);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, attempt, "Transaction verification failed");
                    return Err(e);
                }
                Ok(outcome) => return Ok(outcome),
            }
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(err.to_string())
    } else {
        GatewayError::Transport(err.to_string())
    }
}

fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Classifies a gateway response into a business outcome or a transport-level error.
async fn read_outcome<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<GatewayOutcome<T>, GatewayError> {
    let status = response.status();
    let body = response.text().await.map_err(map_transport_error)?;
    debug!(status = status.as_u16(), "Gateway responded");
    classify(status, &body)
}

fn classify<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
) -> Result<GatewayOutcome<T>, GatewayError> {
    let unexpected = || GatewayError::UnexpectedStatus {
        status: status.as_u16(),
        body: truncate(body),
    };

    if status.is_server_error() {
        return Err(unexpected());
    }

    let business_status = matches!(
        status,
        StatusCode::OK | StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND
    );
    if !business_status {
        return Err(unexpected());
    }

    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| GatewayError::Malformed(format!("invalid envelope: {}", e)))?;

    if status == StatusCode::OK && envelope.status {
        let data = envelope
            .data
            .ok_or_else(|| GatewayError::Malformed("missing data".to_string()))?;
        let parsed = serde_json::from_value::<T>(data)
            .map_err(|e| GatewayError::Malformed(format!("invalid data: {}", e)))?;
        return Ok(GatewayOutcome::Approved(parsed));
    }

    Ok(GatewayOutcome::Declined {
        message: envelope
            .message
            .unwrap_or_else(|| "transaction declined".to_string()),
    })
}

fn truncate(body: &str) -> String {
    body.chars().take(512).collect()
}
