//! Error taxonomy for care-request operations.
//!
//! Every operation returns `Result<T, CareError>`. Expected business outcomes
//! (a lost claim race, a cancel after completion) are ordinary variants so the
//! caller can render the specific reason instead of a generic failure.

use crate::ids::CareRequestId;
use crate::types::CareRequestStatus;
use thiserror::Error;

/// Errors returned by care-request operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CareError {
    /// No authenticated principal accompanied the call.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The principal lacks the role or ownership required for the operation.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// The id does not resolve to an existing care request.
    #[error("Care request not found: {0}")]
    RequestNotFound(CareRequestId),

    /// The current status does not permit the requested transition.
    #[error("Cannot {operation} a request in status {status}")]
    PreconditionFailed {
        /// The request the transition targeted.
        request_id: CareRequestId,
        /// Name of the rejected operation.
        operation: &'static str,
        /// Status observed when the transition was rejected.
        status: CareRequestStatus,
    },

    /// Another provider claimed the request first.
    ///
    /// This is the precondition failure of the claim race; it has its own
    /// variant because clients render it differently.
    #[error("Care request {0} was already claimed by another provider")]
    RequestAlreadyClaimed(CareRequestId),

    /// Malformed input.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The underlying store could not complete the operation. Not retried.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl CareError {
    /// Create a `NotAuthorized` error.
    #[must_use]
    pub fn not_authorized(message: impl Into<String>) -> Self {
        Self::NotAuthorized(message.into())
    }

    /// Create a `ValidationFailed` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    /// Whether the error reports a status precondition, including the claim race.
    #[must_use]
    pub const fn is_precondition_failure(&self) -> bool {
        matches!(
            self,
            Self::PreconditionFailed { .. } | Self::RequestAlreadyClaimed(_)
        )
    }

    /// Stable machine-readable code for the error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::NotAuthorized(_) => "NOT_AUTHORIZED",
            Self::RequestNotFound(_) => "REQUEST_NOT_FOUND",
            Self::PreconditionFailed { .. } => "PRECONDITION_FAILED",
            Self::RequestAlreadyClaimed(_) => "REQUEST_ALREADY_CLAIMED",
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
        }
    }
}

/// Errors raised by [`RequestStore`](crate::store::RequestStore) and
/// [`CatalogStore`](crate::store::CatalogStore) implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A unique constraint rejected the write (e.g. a duplicate request id).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored row could not be mapped back into the domain model.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<StoreError> for CareError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}
