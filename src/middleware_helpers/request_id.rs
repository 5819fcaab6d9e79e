use crate::tracing::RequestId;
use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

/// Header name for the request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Attaches a request id to the request, the response and the task-local scope.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    // Reuse a caller-supplied id only when it is a valid header value
    let incoming = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(|v| (RequestId::new(v), HeaderValue::from_str(v)));

    let (request_id, header_value) = match incoming {
        Some((rid, Ok(value))) => (rid, value),
        _ => {
            let rid = RequestId::default();
            // uuid strings are always valid header values
            let value = HeaderValue::from_str(rid.as_str())
                .unwrap_or_else(|_| HeaderValue::from_static("invalid"));
            (rid, value)
        }
    };

    request.headers_mut().insert(
        HeaderName::from_static(REQUEST_ID_HEADER),
        header_value.clone(),
    );
    request.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id.as_str(),
        method = %request.method(),
        uri = %request.uri(),
    );

    let mut response = crate::tracing::scope_request_id(
        request_id,
        async move { next.run(request).await }.instrument(span),
    )
    .await;

    response
        .headers_mut()
        .insert(HeaderName::from_static(REQUEST_ID_HEADER), header_value);

    response
}
