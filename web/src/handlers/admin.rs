//! Admin endpoints.

use crate::{AppState, CurrentPrincipal, ValidJson, ValidPath, ValidQuery, WebResult};
use axum::{Json, extract::State};
use curare_core::ids::{CareRequestId, ProviderId};
use curare_core::types::{CareRequest, CareRequestStatus};
use curare_runtime::AdminStats;
use serde::{Deserialize, Serialize};

/// Query string of the admin list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQuery {
    /// Only requests in this status.
    pub status: Option<CareRequestStatus>,
    /// Page size, capped by the service.
    pub limit: Option<usize>,
}

/// Body of a reassignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignBody {
    /// Provider to assign.
    pub provider_id: ProviderId,
}

/// All requests, newest first.
///
/// ```text
/// GET /api/admin/requests?status=searching&limit=20
/// ```
///
/// # Errors
///
/// 401, 403, 503.
pub async fn list(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    ValidQuery(query): ValidQuery<ListQuery>,
) -> WebResult<Json<Vec<CareRequest>>> {
    Ok(Json(
        state
            .service
            .admin_list(principal.as_ref(), query.status, query.limit)
            .await?,
    ))
}

/// Platform dashboard figures.
///
/// ```text
/// GET /api/admin/stats
/// ```
///
/// # Errors
///
/// 401, 403, 503.
pub async fn stats(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
) -> WebResult<Json<AdminStats>> {
    Ok(Json(state.service.admin_stats(principal.as_ref()).await?))
}

/// Force-assign a provider.
///
/// ```text
/// POST /api/admin/requests/:id/assign
/// {"provider_id": "..."}
/// ```
///
/// # Errors
///
/// 401, 403, 404, 409, 422, 503.
pub async fn assign(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    ValidPath(id): ValidPath<CareRequestId>,
    ValidJson(body): ValidJson<AssignBody>,
) -> WebResult<Json<CareRequest>> {
    Ok(Json(
        state
            .service
            .admin_reassign(principal.as_ref(), id, body.provider_id)
            .await?,
    ))
}
