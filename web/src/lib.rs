//! Axum HTTP and WebSocket surface for Curare.
//!
//! Handlers translate HTTP into [`CareService`](curare_runtime::CareService)
//! calls and [`CareError`](curare_core::CareError)s into JSON error bodies.
//! The caller's identity arrives from the gateway as `X-Principal-Id` and
//! `X-Principal-Role` headers.
//!
//! # Request Flow
//!
//! 1. **Request id** assigned (or kept) by `SetRequestIdLayer`
//! 2. **Request context** parsed: principal headers, tracing span
//! 3. **Extract** path, query and JSON body; malformed input is a 422
//! 4. **Call** one service operation
//! 5. **Map result** to JSON, or [`AppError`] to `{code, message}`
//!
//! # Example
//!
//! ```ignore
//! use curare_web::{AppState, router};
//!
//! let app = router(AppState::new(service, metrics));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use error::{AppError, ErrorBody};
pub use extractors::{
    CurrentPrincipal, OptionalJson, RequestId, ValidJson, ValidPath, ValidQuery,
};
pub use middleware::{PRINCIPAL_ID_HEADER, PRINCIPAL_ROLE_HEADER, request_context_layer};
pub use router::router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
