//! `PostgreSQL` implementation of [`CatalogStore`], plus catalog seeding.

use crate::PostgresRequestStore;
use crate::rows::{ServiceTypeRow, SymptomRow, db_error, to_cents, to_limit};
use crate::store::record_duration;
use curare_core::StoreError;
use curare_core::ids::{ServiceTypeId, SymptomId};
use curare_core::store::{CatalogStore, StoreFuture};
use curare_core::types::{ServiceType, Symptom};
use std::time::Instant;
use uuid::Uuid;

const SERVICE_TYPE_COLUMNS: &str =
    "SELECT id, name, description, base_price_cents, duration_minutes, is_active FROM service_types";

const SYMPTOM_COLUMNS: &str = "SELECT id, name, category, requires_immediate_care FROM symptoms";

/// Escape `LIKE` wildcards so user input matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl PostgresRequestStore {
    /// Insert or update a service type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the write fails.
    pub async fn upsert_service_type(&self, service_type: &ServiceType) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO service_types (id, name, description, base_price_cents, duration_minutes, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                base_price_cents = EXCLUDED.base_price_cents,
                duration_minutes = EXCLUDED.duration_minutes,
                is_active = EXCLUDED.is_active
            ",
        )
        .bind(service_type.id.as_uuid())
        .bind(&service_type.name)
        .bind(&service_type.description)
        .bind(to_cents(service_type.base_price)?)
        .bind(i32::try_from(service_type.duration_minutes).unwrap_or(i32::MAX))
        .bind(service_type.is_active)
        .execute(self.pool())
        .await
        .map_err(db_error("upsert service type"))?;
        Ok(())
    }

    /// Insert or update a catalog symptom.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the write fails.
    pub async fn upsert_symptom(&self, symptom: &Symptom) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO symptoms (id, name, category, requires_immediate_care)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                category = EXCLUDED.category,
                requires_immediate_care = EXCLUDED.requires_immediate_care
            ",
        )
        .bind(symptom.id.as_uuid())
        .bind(&symptom.name)
        .bind(&symptom.category)
        .bind(symptom.requires_immediate_care)
        .execute(self.pool())
        .await
        .map_err(db_error("upsert symptom"))?;
        Ok(())
    }
}

impl CatalogStore for PostgresRequestStore {
    fn service_type(&self, id: ServiceTypeId) -> StoreFuture<'_, Option<ServiceType>> {
        Box::pin(async move {
            let started = Instant::now();
            let sql = format!("{SERVICE_TYPE_COLUMNS} WHERE id = $1");
            let row: Option<ServiceTypeRow> = sqlx::query_as(&sql)
                .bind(id.as_uuid())
                .fetch_optional(self.pool())
                .await
                .map_err(db_error("load service type"))?;
            record_duration("service_type", started);
            row.map(ServiceTypeRow::into_domain).transpose()
        })
    }

    fn active_service_types(&self) -> StoreFuture<'_, Vec<ServiceType>> {
        Box::pin(async move {
            let sql = format!("{SERVICE_TYPE_COLUMNS} WHERE is_active ORDER BY base_price_cents, name");
            let rows: Vec<ServiceTypeRow> = sqlx::query_as(&sql)
                .fetch_all(self.pool())
                .await
                .map_err(db_error("list service types"))?;
            rows.into_iter().map(ServiceTypeRow::into_domain).collect()
        })
    }

    fn symptoms<'a>(&'a self, ids: &'a [SymptomId]) -> StoreFuture<'a, Vec<Symptom>> {
        Box::pin(async move {
            let ids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
            let sql = format!("{SYMPTOM_COLUMNS} WHERE id = ANY($1) ORDER BY name");
            let rows: Vec<SymptomRow> = sqlx::query_as(&sql)
                .bind(&ids)
                .fetch_all(self.pool())
                .await
                .map_err(db_error("load symptoms"))?;
            Ok(rows.into_iter().map(SymptomRow::into_domain).collect())
        })
    }

    fn list_symptoms(&self) -> StoreFuture<'_, Vec<Symptom>> {
        Box::pin(async move {
            let sql = format!("{SYMPTOM_COLUMNS} ORDER BY name");
            let rows: Vec<SymptomRow> = sqlx::query_as(&sql)
                .fetch_all(self.pool())
                .await
                .map_err(db_error("list symptoms"))?;
            Ok(rows.into_iter().map(SymptomRow::into_domain).collect())
        })
    }

    fn search_symptoms<'a>(&'a self, query: &'a str, limit: usize) -> StoreFuture<'a, Vec<Symptom>> {
        Box::pin(async move {
            let pattern = format!("%{}%", escape_like(query.trim()));
            let sql = format!("{SYMPTOM_COLUMNS} WHERE name ILIKE $1 ORDER BY name LIMIT $2");
            let rows: Vec<SymptomRow> = sqlx::query_as(&sql)
                .bind(pattern)
                .bind(to_limit(limit))
                .fetch_all(self.pool())
                .await
                .map_err(db_error("search symptoms"))?;
            Ok(rows.into_iter().map(SymptomRow::into_domain).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("fever"), "fever");
        assert_eq!(escape_like("100%_sure\\"), "100\\%\\_sure\\\\");
    }
}
