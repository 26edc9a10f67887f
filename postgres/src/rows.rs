//! Row types and aggregate hydration.
//!
//! A care request is read in three queries regardless of how many requests
//! are loaded: the request rows (joined with their service type), their case
//! patients, and the case patients' symptoms (left-joined with the catalog).

use chrono::{DateTime, NaiveDate, Utc};
use curare_core::StoreError;
use curare_core::ids::{
    CareRequestId, CasePatientId, CaseSymptomId, PatientId, ProviderId, ServiceTypeId, SymptomId,
    Version,
};
use curare_core::pricing::{Money, Pricing};
use curare_core::types::{
    Cancellation, CancelledBy, CareRequest, CareRequestStatus, CasePatient,
    CaseSymptom, Location, ServiceType, Severity, Symptom, SymptomKind,
};
use sqlx::PgConnection;
use std::collections::HashMap;
use uuid::Uuid;

/// Columns selected for a request row, aliased to [`RequestRow`] fields.
pub(crate) const REQUEST_SELECT: &str = r"
    SELECT
        r.id, r.patient_id, r.provider_id, r.status,
        r.address_line1, r.address_line2, r.city, r.state, r.zip_code,
        r.latitude, r.longitude,
        r.base_price_cents, r.additional_fees_cents, r.donation_amount_cents,
        r.total_price_cents, r.insurance_coverage_cents, r.patient_responsibility_cents,
        r.patient_notes, r.provider_notes, r.cancelled_by, r.cancellation_reason,
        r.created_at, r.matched_at, r.arrived_at, r.completed_at, r.cancelled_at,
        r.updated_at, r.version,
        st.id AS st_id, st.name AS st_name, st.description AS st_description,
        st.base_price_cents AS st_base_price_cents,
        st.duration_minutes AS st_duration_minutes, st.is_active AS st_is_active
    FROM care_requests r
    JOIN service_types st ON st.id = r.service_type_id
";

/// Map a sqlx error with context.
pub(crate) fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| StoreError::DatabaseError(format!("Failed to {context}: {e}"))
}

/// Money to a BIGINT column.
pub(crate) fn to_cents(amount: Money) -> Result<i64, StoreError> {
    i64::try_from(amount.cents())
        .map_err(|_| StoreError::DatabaseError(format!("Amount out of range: {amount}")))
}

/// A BIGINT column to money.
pub(crate) fn from_cents(cents: i64) -> Result<Money, StoreError> {
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| StoreError::Corrupt(format!("Negative amount: {cents}")))
}

/// Row limit for a `LIMIT` bind.
pub(crate) fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Status names for a `status = ANY($n)` bind.
pub(crate) fn status_names(statuses: &[CareRequestStatus]) -> Vec<&'static str> {
    statuses.iter().map(CareRequestStatus::as_str).collect()
}

fn count(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("Negative count: {value}")))
}

// ============================================================================
// Catalog rows
// ============================================================================

#[derive(sqlx::FromRow)]
pub(crate) struct ServiceTypeRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    base_price_cents: i64,
    duration_minutes: i32,
    is_active: bool,
}

impl ServiceTypeRow {
    pub(crate) fn into_domain(self) -> Result<ServiceType, StoreError> {
        Ok(ServiceType {
            id: ServiceTypeId::from_uuid(self.id),
            name: self.name,
            description: self.description,
            base_price: from_cents(self.base_price_cents)?,
            duration_minutes: u32::try_from(self.duration_minutes).map_err(|_| {
                StoreError::Corrupt(format!("Invalid duration: {}", self.duration_minutes))
            })?,
            is_active: self.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SymptomRow {
    id: Uuid,
    name: String,
    category: Option<String>,
    requires_immediate_care: bool,
}

impl SymptomRow {
    pub(crate) fn into_domain(self) -> Symptom {
        Symptom {
            id: SymptomId::from_uuid(self.id),
            name: self.name,
            category: self.category,
            requires_immediate_care: self.requires_immediate_care,
        }
    }
}

// ============================================================================
// Request rows
// ============================================================================

#[derive(sqlx::FromRow)]
pub(crate) struct RequestRow {
    id: Uuid,
    patient_id: Uuid,
    provider_id: Option<Uuid>,
    status: String,
    address_line1: String,
    address_line2: Option<String>,
    city: String,
    state: String,
    zip_code: String,
    latitude: f64,
    longitude: f64,
    base_price_cents: i64,
    additional_fees_cents: i64,
    donation_amount_cents: i64,
    total_price_cents: i64,
    insurance_coverage_cents: i64,
    patient_responsibility_cents: i64,
    patient_notes: Option<String>,
    provider_notes: Option<String>,
    cancelled_by: Option<String>,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    matched_at: Option<DateTime<Utc>>,
    arrived_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    version: i64,
    st_id: Uuid,
    st_name: String,
    st_description: Option<String>,
    st_base_price_cents: i64,
    st_duration_minutes: i32,
    st_is_active: bool,
}

impl RequestRow {
    fn into_domain(self, case_patients: Vec<CasePatient>) -> Result<CareRequest, StoreError> {
        let status = CareRequestStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("Invalid status: {}", self.status)))?;
        let cancellation = match self.cancelled_by.as_deref() {
            None => None,
            Some(who) => Some(Cancellation {
                cancelled_by: CancelledBy::parse(who)
                    .ok_or_else(|| StoreError::Corrupt(format!("Invalid cancelled_by: {who}")))?,
                reason: self.cancellation_reason,
            }),
        };
        let version = u64::try_from(self.version)
            .map(Version::new)
            .map_err(|_| StoreError::Corrupt(format!("Invalid version: {}", self.version)))?;

        let service_type = ServiceTypeRow {
            id: self.st_id,
            name: self.st_name,
            description: self.st_description,
            base_price_cents: self.st_base_price_cents,
            duration_minutes: self.st_duration_minutes,
            is_active: self.st_is_active,
        }
        .into_domain()?;

        Ok(CareRequest {
            id: CareRequestId::from_uuid(self.id),
            patient_id: PatientId::from_uuid(self.patient_id),
            provider_id: self.provider_id.map(ProviderId::from_uuid),
            service_type,
            status,
            location: Location {
                address_line1: self.address_line1,
                address_line2: self.address_line2,
                city: self.city,
                state: self.state,
                zip_code: self.zip_code,
                latitude: self.latitude,
                longitude: self.longitude,
            },
            pricing: Pricing {
                base_price: from_cents(self.base_price_cents)?,
                additional_fees: from_cents(self.additional_fees_cents)?,
                donation_amount: from_cents(self.donation_amount_cents)?,
                total_price: from_cents(self.total_price_cents)?,
                insurance_coverage: from_cents(self.insurance_coverage_cents)?,
                patient_responsibility: from_cents(self.patient_responsibility_cents)?,
            },
            patient_notes: self.patient_notes,
            provider_notes: self.provider_notes,
            cancellation,
            created_at: self.created_at,
            matched_at: self.matched_at,
            arrived_at: self.arrived_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            updated_at: self.updated_at,
            version,
            case_patients,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CasePatientRow {
    id: Uuid,
    care_request_id: Uuid,
    name: String,
    relationship: String,
    date_of_birth: Option<NaiveDate>,
    gender: Option<String>,
    notes: Option<String>,
}

#[derive(sqlx::FromRow)]
struct CaseSymptomRow {
    id: Uuid,
    case_patient_id: Uuid,
    severity: i16,
    duration: Option<String>,
    notes: Option<String>,
    custom_symptom: Option<String>,
    symptom_id: Option<Uuid>,
    symptom_name: Option<String>,
    symptom_category: Option<String>,
    symptom_requires_immediate_care: Option<bool>,
}

impl CaseSymptomRow {
    fn into_domain(self) -> Result<CaseSymptom, StoreError> {
        let symptom = match (self.symptom_id, self.symptom_name, self.custom_symptom) {
            (Some(id), Some(name), None) => SymptomKind::Catalog(Symptom {
                id: SymptomId::from_uuid(id),
                name,
                category: self.symptom_category,
                requires_immediate_care: self.symptom_requires_immediate_care.unwrap_or(false),
            }),
            (None, _, Some(text)) => SymptomKind::Custom(text),
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "Case symptom {} has no usable symptom",
                    self.id
                )));
            }
        };
        let severity = u8::try_from(self.severity)
            .ok()
            .and_then(|value| Severity::new(value).ok())
            .ok_or_else(|| StoreError::Corrupt(format!("Invalid severity: {}", self.severity)))?;

        Ok(CaseSymptom {
            id: CaseSymptomId::from_uuid(self.id),
            symptom,
            severity,
            duration: self.duration,
            notes: self.notes,
        })
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(sqlx::FromRow)]
pub(crate) struct StatsRow {
    total_revenue: i64,
    completed_visits: i64,
    active_requests: i64,
    unclaimed_requests: i64,
    completed_since: i64,
    revenue_since: i64,
}

impl StatsRow {
    pub(crate) fn into_domain(self) -> Result<curare_core::store::RequestStats, StoreError> {
        Ok(curare_core::store::RequestStats {
            total_revenue: from_cents(self.total_revenue)?,
            completed_visits: count(self.completed_visits)?,
            active_requests: count(self.active_requests)?,
            unclaimed_requests: count(self.unclaimed_requests)?,
            completed_since: count(self.completed_since)?,
            revenue_since: from_cents(self.revenue_since)?,
        })
    }
}

// ============================================================================
// Hydration
// ============================================================================

/// Attach case patients and symptoms to request rows, keeping row order.
pub(crate) async fn hydrate(
    conn: &mut PgConnection,
    rows: Vec<RequestRow>,
) -> Result<Vec<CareRequest>, StoreError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let request_ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();

    let patient_rows: Vec<CasePatientRow> = sqlx::query_as(
        r"
        SELECT id, care_request_id, name, relationship, date_of_birth, gender, notes
        FROM case_patients
        WHERE care_request_id = ANY($1)
        ORDER BY care_request_id, position
        ",
    )
    .bind(&request_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error("load case patients"))?;

    let patient_ids: Vec<Uuid> = patient_rows.iter().map(|row| row.id).collect();
    let symptom_rows: Vec<CaseSymptomRow> = sqlx::query_as(
        r"
        SELECT
            cps.id, cps.case_patient_id, cps.severity, cps.duration, cps.notes,
            cps.custom_symptom, s.id AS symptom_id, s.name AS symptom_name,
            s.category AS symptom_category,
            s.requires_immediate_care AS symptom_requires_immediate_care
        FROM case_patient_symptoms cps
        LEFT JOIN symptoms s ON s.id = cps.symptom_id
        WHERE cps.case_patient_id = ANY($1)
        ORDER BY cps.case_patient_id, cps.position
        ",
    )
    .bind(&patient_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error("load case symptoms"))?;

    let mut symptoms: HashMap<Uuid, Vec<CaseSymptom>> = HashMap::new();
    for row in symptom_rows {
        let owner = row.case_patient_id;
        symptoms.entry(owner).or_default().push(row.into_domain()?);
    }

    let mut patients: HashMap<Uuid, Vec<CasePatient>> = HashMap::new();
    for row in patient_rows {
        patients.entry(row.care_request_id).or_default().push(CasePatient {
            id: CasePatientId::from_uuid(row.id),
            name: row.name,
            relationship: row.relationship,
            date_of_birth: row.date_of_birth,
            gender: row.gender,
            notes: row.notes,
            symptoms: symptoms.remove(&row.id).unwrap_or_default(),
        });
    }

    rows.into_iter()
        .map(|row| {
            let case_patients = patients.remove(&row.id).unwrap_or_default();
            row.into_domain(case_patients)
        })
        .collect()
}

/// Load and hydrate a single request.
pub(crate) async fn load_request(
    conn: &mut PgConnection,
    id: CareRequestId,
) -> Result<Option<CareRequest>, StoreError> {
    let sql = format!("{REQUEST_SELECT} WHERE r.id = $1");
    let row: Option<RequestRow> = sqlx::query_as(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error("load care request"))?;
    match row {
        Some(row) => Ok(hydrate(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}
