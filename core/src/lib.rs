//! # Curare Core
//!
//! Domain model and lifecycle rules for on-demand urgent-care requests.
//!
//! A patient submits a [`CareRequest`](types::CareRequest) describing one or more
//! case patients and their symptoms. Providers claim unclaimed requests and move
//! them through the visit lifecycle; patients and admins may cancel before the
//! provider is en route.
//!
//! ## Crate Layout
//!
//! - [`ids`]: Strongly typed identifiers and the write [`Version`](ids::Version)
//! - [`principal`]: The authenticated caller (id + role)
//! - [`types`]: The care-request aggregate, catalog entries and submission input
//! - [`pricing`]: Money arithmetic and request quotes
//! - [`urgency`]: Derived low/medium/high classification
//! - [`lifecycle`]: The pure Lifecycle Engine producing guarded transitions
//! - [`store`]: Persistence traits implemented by the PostgreSQL and in-memory stores
//! - [`environment`]: Injected dependencies (clock)
//! - [`error`]: The error taxonomy shared by every operation
//!
//! ## Lifecycle
//!
//! ```text
//! pending ─> searching ─> matched ─> en_route ─> arrived ─> in_progress ─> completed*
//!    │           │           │
//!    └───────────┴───────────┴──> cancelled*
//! ```
//!
//! ## Example
//!
//! ```
//! use curare_core::environment::SystemClock;
//! use curare_core::lifecycle::{LifecycleCommand, LifecycleEngine};
//! use curare_core::principal::Principal;
//! use curare_core::types::CareRequestStatus;
//! # use curare_core::types::CareRequest;
//! # fn run(request: &CareRequest) -> Result<(), curare_core::error::CareError> {
//! let clock = SystemClock;
//! let provider = Principal::provider(curare_core::ids::ProviderId::new().as_uuid());
//!
//! let transition = LifecycleEngine::decide(request, &provider, LifecycleCommand::Claim, &clock)?;
//! assert_eq!(transition.change.status, CareRequestStatus::Matched);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod environment;
pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod pricing;
pub mod principal;
pub mod store;
pub mod types;
pub mod urgency;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{CareError, StoreError};
pub use ids::{CareRequestId, ProviderId, Version};
pub use principal::{Principal, Role};
pub use types::{CareRequest, CareRequestStatus};
