//! Application state for Axum handlers.

use curare_runtime::{CareService, MetricsExporter};
use std::sync::Arc;

/// State shared across all HTTP handlers.
///
/// Cheap to clone: the service is behind an `Arc` and the exporter holds a
/// shared Prometheus handle.
#[derive(Clone)]
pub struct AppState {
    /// The care-request service.
    pub service: Arc<CareService>,
    /// Metrics rendered at `/metrics`.
    pub metrics: MetricsExporter,
}

impl AppState {
    /// Create the state.
    #[must_use]
    pub const fn new(service: Arc<CareService>, metrics: MetricsExporter) -> Self {
        Self { service, metrics }
    }
}
