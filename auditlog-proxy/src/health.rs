//! Health check handler

use axum::http::StatusCode;

/// Path of the liveness endpoint
pub const HEALTHZ_PATH: &str = "/healthz";

/// Liveness check
///
/// Always 200 with an empty body while the process serves requests. Provider
/// and backend health are deliberately not consulted, so a backend outage
/// never gets the proxy restarted.
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}
