//! Provider endpoints: the matching pool and the visit workflow.

use crate::{AppState, CurrentPrincipal, ValidJson, ValidPath, WebResult};
use axum::{Json, extract::State, http::StatusCode};
use curare_core::ids::CareRequestId;
use curare_core::lifecycle::AdvanceOperation;
use curare_core::types::CareRequest;
use curare_runtime::ProviderStats;
use serde::{Deserialize, Serialize};

/// Body of an advance call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceBody {
    /// `start_en_route`, `mark_arrived`, `start_visit` or `complete`.
    pub operation: AdvanceOperation,
    /// Stored when completing.
    #[serde(default)]
    pub provider_notes: Option<String>,
}

/// Unclaimed requests the caller has not declined, newest first.
///
/// ```text
/// GET /api/provider/requests
/// ```
///
/// # Errors
///
/// 401, 403 (patients), 503.
pub async fn unclaimed(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
) -> WebResult<Json<Vec<CareRequest>>> {
    Ok(Json(state.service.list_unclaimed(principal.as_ref()).await?))
}

/// Claim a request.
///
/// ```text
/// POST /api/provider/requests/:id/claim
/// ```
///
/// # Errors
///
/// 401, 403, 404, 409 (`REQUEST_ALREADY_CLAIMED` or `PRECONDITION_FAILED`), 503.
pub async fn claim(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    ValidPath(id): ValidPath<CareRequestId>,
) -> WebResult<Json<CareRequest>> {
    Ok(Json(state.service.claim_request(principal.as_ref(), id).await?))
}

/// Hide a request from the caller's pool. Responds 204.
///
/// ```text
/// POST /api/provider/requests/:id/decline
/// ```
///
/// # Errors
///
/// 401, 403, 404, 503.
pub async fn decline(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    ValidPath(id): ValidPath<CareRequestId>,
) -> WebResult<StatusCode> {
    state.service.decline_request(principal.as_ref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Move an assigned visit one step forward.
///
/// ```text
/// POST /api/provider/requests/:id/advance
/// {"operation": "start_en_route"}
/// ```
///
/// # Errors
///
/// 401, 403 (not the assigned provider), 404, 409, 422, 503.
pub async fn advance(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    ValidPath(id): ValidPath<CareRequestId>,
    ValidJson(body): ValidJson<AdvanceBody>,
) -> WebResult<Json<CareRequest>> {
    Ok(Json(
        state
            .service
            .advance_status(principal.as_ref(), id, body.operation, body.provider_notes)
            .await?,
    ))
}

/// The caller's visit in progress, or `null`.
///
/// ```text
/// GET /api/provider/active
/// ```
///
/// # Errors
///
/// 401, 403, 503.
pub async fn active(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
) -> WebResult<Json<Option<CareRequest>>> {
    Ok(Json(state.service.active_request(principal.as_ref()).await?))
}

/// The caller's completed visits, newest first.
///
/// ```text
/// GET /api/provider/history
/// ```
///
/// # Errors
///
/// 401, 403, 503.
pub async fn history(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
) -> WebResult<Json<Vec<CareRequest>>> {
    Ok(Json(state.service.provider_history(principal.as_ref()).await?))
}

/// Dashboard figures for the caller.
///
/// ```text
/// GET /api/provider/stats
/// ```
///
/// # Errors
///
/// 401, 403, 503.
pub async fn stats(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
) -> WebResult<Json<ProviderStats>> {
    Ok(Json(state.service.provider_stats(principal.as_ref()).await?))
}
