//! Custom Axum extractors.
//!
//! - [`CurrentPrincipal`]: the authenticated caller, if any
//! - [`RequestId`]: the id assigned by the request-id layer
//! - [`ValidPath`], [`ValidQuery`], [`ValidJson`], [`OptionalJson`]: input
//!   extractors whose rejections are `422 VALIDATION_FAILED` error bodies
//!
//! The first two are infallible. Handlers pass `CurrentPrincipal` straight to
//! the service, which answers `NotAuthenticated` when it is empty.

use crate::AppError;
use crate::middleware::{REQUEST_ID_HEADER, RequestContext, principal_from_headers};
use axum::{
    Json, async_trait,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::{header, request::Parts},
};
use curare_core::CareError;
use curare_core::principal::Principal;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// The caller forwarded by the gateway.
///
/// Read from the [`RequestContext`] when the middleware is installed, and
/// from the principal headers otherwise.
#[derive(Debug, Clone, Copy)]
pub struct CurrentPrincipal(pub Option<Principal>);

impl CurrentPrincipal {
    /// Borrow the principal in the shape service operations take.
    #[must_use]
    pub const fn as_ref(&self) -> Option<&Principal> {
        self.0.as_ref()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = match parts.extensions.get::<RequestContext>() {
            Some(context) => context.principal,
            None => principal_from_headers(&parts.headers),
        };
        Ok(Self(principal))
    }
}

/// Request id for log correlation.
///
/// Falls back to a fresh UUID v4 when no `x-request-id` header is present.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        Ok(Self(id))
    }
}

// ============================================================================
// Input extractors
// ============================================================================

fn invalid(message: impl Into<String>) -> AppError {
    CareError::validation(message).into()
}

/// Path parameters. A malformed segment (such as a bad UUID) is a
/// validation failure.
#[derive(Debug, Clone, Copy)]
pub struct ValidPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ValidPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Path::<T>::from_request_parts(parts, state)
            .await
            .map(|Path(value)| Self(value))
            .map_err(|rejection| invalid(rejection.body_text()))
    }
}

/// Query string. Unknown enum values and bad numbers are validation failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ValidQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| Self(value))
            .map_err(|rejection| invalid(rejection.body_text()))
    }
}

/// A required JSON body.
#[derive(Debug, Clone, Copy)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| Self(value))
            .map_err(|rejection| invalid(rejection.body_text()))
    }
}

/// A JSON body that may be left out entirely.
///
/// An empty body yields `None`. A body that is present must be well-formed
/// JSON sent as `application/json`.
#[derive(Debug, Clone)]
pub struct OptionalJson<T>(pub Option<T>);

#[async_trait]
impl<T, S> FromRequest<S> for OptionalJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| invalid(rejection.body_text()))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(None));
        }
        if !is_json {
            return Err(invalid(
                "Expected request with `Content-Type: application/json`",
            ));
        }
        Json::<T>::from_bytes(&bytes)
            .map(|Json(value)| Self(Some(value)))
            .map_err(|rejection| invalid(rejection.body_text()))
    }
}
