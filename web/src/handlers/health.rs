//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::AppState;
use axum::{Json, extract::State, http::StatusCode};
use curare_runtime::HealthReport;

/// Liveness: the process is up. Does not touch the database.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness: component report, 503 while the request store is unreachable.
///
/// ```text
/// GET /ready
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "checks": [
///     {"component": "request_store", "status": "healthy", ...},
///     {"component": "change_feed", "status": "healthy", "metadata": [["active_channels", "2"]]}
///   ],
///   "timestamp": "2025-01-01T00:00:00Z"
/// }
/// ```
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.service.health().await;

    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        tracing::warn!(status = %report.status, "Readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report))
}
