//! # Curare Runtime
//!
//! The service layer of the care-request core.
//!
//! This crate wires the pure [`LifecycleEngine`](curare_core::lifecycle::LifecycleEngine)
//! to a [`RequestStore`](curare_core::store::RequestStore) and fans accepted
//! writes out to observers.
//!
//! ## Core Components
//!
//! - **[`CareService`]**: Submission, matching gateway, lifecycle operations
//!   and dashboards
//! - **[`ChangeFeed`]**: Keyed broadcast of post-write aggregates
//! - **[`MetricsExporter`]**: Prometheus recorder for lifecycle metrics
//! - **[`HealthReport`]**: Readiness of the store and feed
//!
//! ## Example
//!
//! ```
//! use curare_core::environment::SystemClock;
//! use curare_runtime::{CareService, ServiceConfig};
//! use curare_testing::InMemoryRequestStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryRequestStore::new());
//! let service = CareService::new(
//!     store.clone(),
//!     store,
//!     Arc::new(SystemClock),
//!     ServiceConfig::default(),
//! );
//! assert_eq!(service.feed().active_channels(), 0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Change feed: keyed broadcast of accepted writes
pub mod feed;

/// Readiness reporting
pub mod health;

/// Prometheus metrics for observability
pub mod metrics;

/// The care-request service
pub mod service;

pub use feed::{ChangeEvent, ChangeFeed, ChangeKind, FeedKey, LastWriteWins, Subscription};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use metrics::{LifecycleMetrics, MetricsExporter};
pub use service::{AdminStats, CareService, ProviderStats, ServiceConfig};
