//! Patient-facing care-request endpoints.

use crate::{
    AppError, AppState, CurrentPrincipal, OptionalJson, ValidJson, ValidPath, WebResult,
};
use axum::{Json, extract::State, http::StatusCode};
use curare_core::ids::CareRequestId;
use curare_core::types::{CareRequest, NewCareRequest};
use serde::{Deserialize, Serialize};

/// Response to a successful submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedResponse {
    /// Id of the new request.
    pub care_request_id: CareRequestId,
}

/// Optional body of a cancel call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelBody {
    /// Free-text reason.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Submit a care request.
///
/// ```text
/// POST /api/care-requests
/// ```
///
/// Responds 201 with `{"care_request_id": "..."}`.
///
/// # Errors
///
/// 401, 403 (not a patient), 422 (invalid input), 503.
pub async fn create(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    ValidJson(input): ValidJson<NewCareRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let request = state
        .service
        .create_care_request(principal.as_ref(), input)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            care_request_id: request.id,
        }),
    ))
}

/// The caller's own requests, newest first.
///
/// ```text
/// GET /api/care-requests
/// ```
///
/// # Errors
///
/// 401, 403 (not a patient), 503.
pub async fn list_mine(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
) -> WebResult<Json<Vec<CareRequest>>> {
    Ok(Json(state.service.list_my_requests(principal.as_ref()).await?))
}

/// One request, if the caller may see it.
///
/// ```text
/// GET /api/care-requests/:id
/// ```
///
/// # Errors
///
/// 401, 403, 404, 503.
pub async fn get_one(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    ValidPath(id): ValidPath<CareRequestId>,
) -> WebResult<Json<CareRequest>> {
    Ok(Json(
        state.service.get_care_request(principal.as_ref(), id).await?,
    ))
}

/// Cancel a request. Mounted for patients and admins.
///
/// ```text
/// POST /api/care-requests/:id/cancel
/// POST /api/admin/requests/:id/cancel
/// ```
///
/// The body `{"reason": "..."}` is optional, but must be valid when sent.
///
/// # Errors
///
/// 401, 403, 404, 409 (not cancellable), 422 (malformed body), 503.
pub async fn cancel(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    ValidPath(id): ValidPath<CareRequestId>,
    OptionalJson(body): OptionalJson<CancelBody>,
) -> WebResult<Json<CareRequest>> {
    let reason = body.and_then(|body| body.reason);
    Ok(Json(
        state
            .service
            .cancel_request(principal.as_ref(), id, reason)
            .await?,
    ))
}
