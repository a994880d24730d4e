//! Request id and header masking for webhook request tracing

use axum::http::HeaderName;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    sensitive_headers::SetSensitiveRequestHeadersLayer,
};

/// Header carrying the request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Headers masked in request traces
///
/// The API server authenticates to the webhook with bearer tokens or client
/// credentials; none of it may reach the logs.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
];

/// Assign a UUID request id unless the caller sent one
pub fn request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

/// Echo the request id on the response
pub fn request_id_propagation_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

/// Mark credential headers as sensitive
pub fn sensitive_headers_layer() -> SetSensitiveRequestHeadersLayer {
    SetSensitiveRequestHeadersLayer::new(
        SENSITIVE_HEADERS
            .iter()
            .copied()
            .map(HeaderName::from_static),
    )
}
