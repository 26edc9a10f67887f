//! Error types for web handlers.
//!
//! [`AppError`] bridges [`CareError`] and HTTP responses. Every error renders
//! as a JSON body `{code, message}`; server errors are logged.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use curare_core::CareError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message shown to a provider who lost a claim race.
pub const ALREADY_CLAIMED_MESSAGE: &str = "This request was just accepted by another provider";

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<CareRequest>, AppError> {
///     let request = state.service.get_care_request(principal.as_ref(), id).await?;
///     Ok(Json(request))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST")
    }

    /// Create a 404 error for a disabled or unknown resource.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message.into(), "NOT_FOUND")
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// User-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<CareError> for AppError {
    fn from(err: CareError) -> Self {
        let code = err.code();
        match err {
            CareError::NotAuthenticated => {
                Self::new(StatusCode::UNAUTHORIZED, err.to_string(), code)
            }
            CareError::NotAuthorized(message) => Self::new(StatusCode::FORBIDDEN, message, code),
            CareError::RequestNotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string(), code),
            CareError::PreconditionFailed { .. } => {
                Self::new(StatusCode::CONFLICT, err.to_string(), code)
            }
            CareError::RequestAlreadyClaimed(_) => Self::new(
                StatusCode::CONFLICT,
                ALREADY_CLAIMED_MESSAGE.to_string(),
                code,
            ),
            CareError::ValidationFailed(message) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, code)
            }
            CareError::StoreUnavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "The service is temporarily unavailable".to_string(),
                code,
            )
            .with_source(anyhow::Error::new(err)),
        }
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Error code (for client error handling).
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                );
            }
        }

        let body = ErrorBody {
            code: self.code.to_string(),
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}
