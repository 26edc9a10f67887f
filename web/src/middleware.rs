//! Axum middleware for request context and tracing.
//!
//! The gateway in front of this service authenticates callers and forwards
//! the result as two headers:
//!
//! - `X-Principal-Id`: the account UUID
//! - `X-Principal-Role`: `patient`, `provider` or `admin`
//!
//! [`request_context_layer`] parses them once per request, stores a
//! [`RequestContext`] in the request extensions and runs the handler inside
//! an `http_request` span carrying the request id and role.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use curare_web::middleware::request_context_layer;
//!
//! let app = Router::new()
//!     .route("/api/care-requests", get(list_mine))
//!     .layer(request_context_layer());
//! ```

use axum::{
    extract::Request,
    http::HeaderMap,
    response::Response,
};
use curare_core::principal::{Principal, Role};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the authenticated account id.
pub const PRINCIPAL_ID_HEADER: &str = "x-principal-id";

/// Header carrying the authenticated role.
pub const PRINCIPAL_ROLE_HEADER: &str = "x-principal-role";

/// Header carrying the request id (set by `SetRequestIdLayer`).
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request values shared with handlers through extensions.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    /// Id assigned by the request-id layer, if any.
    pub request_id: Option<String>,
    /// Authenticated caller, if the gateway forwarded one.
    pub principal: Option<Principal>,
}

/// Parse the principal headers.
///
/// Returns `None` when either header is missing or malformed; the request
/// is then treated as unauthenticated.
#[must_use]
pub fn principal_from_headers(headers: &HeaderMap) -> Option<Principal> {
    let user_id = headers
        .get(PRINCIPAL_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())?;
    let role = headers
        .get(PRINCIPAL_ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Role::parse(s.trim()))?;
    Some(Principal::new(user_id, role))
}

/// Create a layer that attaches a [`RequestContext`] to every request.
#[must_use]
pub const fn request_context_layer() -> RequestContextLayer {
    RequestContextLayer
}

/// Layer for [`RequestContextMiddleware`].
#[derive(Clone, Copy, Debug)]
pub struct RequestContextLayer;

impl<S> Layer<S> for RequestContextLayer {
    type Service = RequestContextMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestContextMiddleware { inner }
    }
}

/// Middleware service that parses the caller and opens the request span.
#[derive(Clone, Debug)]
pub struct RequestContextMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for RequestContextMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let context = RequestContext {
            request_id: req
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            principal: principal_from_headers(req.headers()),
        };

        let span = tracing::info_span!(
            "http_request",
            request_id = context.request_id.as_deref().unwrap_or("-"),
            method = %req.method(),
            uri = %req.uri(),
            role = context.principal.map_or("anonymous", |p| p.role.as_str()),
        );

        req.extensions_mut().insert(context);
        let fut = self.inner.call(req);

        Box::pin(fut.instrument(span))
    }
}
