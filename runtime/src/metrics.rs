//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the care-request core:
//! - Lifecycle transitions (accepted and rejected)
//! - Claim races
//! - Change feed fan-out
//! - Store call latency (recorded by the store implementations)
//!
//! # Example
//!
//! ```rust,no_run
//! use curare_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // Served by the HTTP layer at /metrics
//! let body = exporter.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder whose output the HTTP layer serves.
#[derive(Clone, Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs
    /// a warning and leaves the exporter without a handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            // Configure histogram buckets for latency measurements
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed - rendered at /metrics");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the exporter hasn't been installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Lifecycle
    describe_counter!(
        "care_requests_created_total",
        "Total number of care requests submitted"
    );
    describe_counter!(
        "care_transitions_total",
        "Total number of accepted lifecycle transitions, by operation"
    );
    describe_counter!(
        "care_transition_rejections_total",
        "Total number of rejected lifecycle commands, by operation and error code"
    );
    describe_counter!(
        "care_claim_conflicts_total",
        "Total number of claims lost to another provider"
    );
    describe_histogram!(
        "care_transition_duration_seconds",
        "Time taken to decide, write and publish a transition"
    );

    // Change feed
    describe_counter!(
        "care_feed_events_published_total",
        "Total number of change events published"
    );
    describe_gauge!(
        "care_feed_active_channels",
        "Number of feed keys with at least one subscriber"
    );

    // Store
    describe_histogram!(
        "care_store_duration_seconds",
        "Time taken by request store calls, by operation"
    );
}

/// Lifecycle metrics recorder.
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    /// Record a submission.
    pub fn record_created() {
        counter!("care_requests_created_total").increment(1);
    }

    /// Record an accepted transition.
    pub fn record_transition(operation: &'static str, duration: Duration) {
        counter!("care_transitions_total", "operation" => operation).increment(1);
        histogram!("care_transition_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }

    /// Record a rejected command.
    pub fn record_rejection(operation: &'static str, code: &'static str) {
        counter!(
            "care_transition_rejections_total",
            "operation" => operation,
            "code" => code
        )
        .increment(1);
    }

    /// Record a lost claim race.
    pub fn record_claim_conflict() {
        counter!("care_claim_conflicts_total").increment(1);
    }
}
