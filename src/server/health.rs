//! Liveness check for load balancers and orchestration systems.

use axum::http::StatusCode;

/// Returns 200 with the text "OK" while the executor is accepting requests.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
