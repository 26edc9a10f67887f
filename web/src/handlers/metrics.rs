//! Prometheus scrape endpoint.

use crate::{AppError, AppState};
use axum::{extract::State, http::header, response::IntoResponse};

/// Render the metrics registry.
///
/// ```text
/// GET /metrics
/// ```
///
/// # Errors
///
/// 404 when metrics are disabled.
pub async fn render(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state
        .metrics
        .render()
        .ok_or_else(|| AppError::not_found("Metrics are disabled"))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
