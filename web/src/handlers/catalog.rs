//! Public catalog endpoints.

use crate::{AppState, ValidQuery, WebResult};
use axum::{Json, extract::State};
use curare_core::types::{ServiceType, Symptom};
use serde::Deserialize;

/// Query string of the symptom search.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SymptomQuery {
    /// Case-insensitive name fragment. Blank lists everything.
    pub q: Option<String>,
}

/// Active service types, cheapest first.
///
/// # Errors
///
/// 503 when the catalog cannot be read.
pub async fn service_types(State(state): State<AppState>) -> WebResult<Json<Vec<ServiceType>>> {
    Ok(Json(state.service.service_types().await?))
}

/// Symptom catalog or search results.
///
/// # Errors
///
/// 503 when the catalog cannot be read.
pub async fn symptoms(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<SymptomQuery>,
) -> WebResult<Json<Vec<Symptom>>> {
    Ok(Json(state.service.symptoms(query.q.as_deref()).await?))
}
