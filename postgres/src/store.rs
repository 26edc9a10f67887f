//! `PostgreSQL` implementation of [`RequestStore`].

use crate::rows::{
    REQUEST_SELECT, RequestRow, StatsRow, db_error, hydrate, load_request, status_names,
    to_cents, to_limit,
};
use chrono::{DateTime, Utc};
use curare_core::StoreError;
use curare_core::ids::{CareRequestId, PatientId, ProviderId};
use curare_core::lifecycle::{FieldChange, ProviderGuard, Transition};
use curare_core::store::{RequestStats, RequestStore, StatsScope, StoreFuture};
use curare_core::types::{CareRequest, CareRequestStatus, SymptomKind};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Request and catalog store backed by `PostgreSQL`.
///
/// Every transition is one `UPDATE ... WHERE <guard>` statement, so
/// concurrent writers are serialized by the row lock and a stale decision
/// matches no row.
///
/// # Example
///
/// ```no_run
/// use curare_postgres::PostgresRequestStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresRequestStore::connect("postgres://localhost/curare").await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresRequestStore {
    pool: PgPool,
}

impl PostgresRequestStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the database is unreachable.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(db_error("connect to database"))?;
        Ok(Self::new(pool))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    async fn fetch_many(
        &self,
        operation: &'static str,
        query: sqlx::query::QueryAs<'_, Postgres, RequestRow, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<CareRequest>, StoreError> {
        let started = Instant::now();
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(db_error("acquire connection"))?;
        let rows = query
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error("query care requests"))?;
        let requests = hydrate(&mut conn, rows).await?;
        record_duration(operation, started);
        Ok(requests)
    }
}

/// Record the latency of a store call.
pub(crate) fn record_duration(operation: &'static str, started: Instant) {
    metrics::histogram!("care_store_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

fn insert_error(request_id: CareRequestId) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_unique_violation() {
                return StoreError::Conflict(format!("Care request {request_id} already exists"));
            }
        }
        StoreError::DatabaseError(format!("Failed to insert care request: {e}"))
    }
}

fn position(index: usize) -> i32 {
    i32::try_from(index).unwrap_or(i32::MAX)
}

/// Append `, column = value` (or `= NULL`) for a changed column.
fn push_change<'a, T>(builder: &mut QueryBuilder<'a, Postgres>, column: &str, change: FieldChange<T>)
where
    T: 'a + sqlx::Encode<'a, Postgres> + sqlx::Type<Postgres>,
{
    match change {
        FieldChange::Keep => {}
        FieldChange::Set(value) => {
            builder.push(", ").push(column).push(" = ").push_bind(value);
        }
        FieldChange::Clear => {
            builder.push(", ").push(column).push(" = NULL");
        }
    }
}

fn provider_change(change: &FieldChange<ProviderId>) -> FieldChange<Uuid> {
    match change {
        FieldChange::Keep => FieldChange::Keep,
        FieldChange::Set(provider) => FieldChange::Set(provider.as_uuid()),
        FieldChange::Clear => FieldChange::Clear,
    }
}

/// Build the guarded `UPDATE` for a transition.
fn transition_update(transition: &Transition) -> QueryBuilder<'_, Postgres> {
    let change = &transition.change;
    let guard = &transition.guard;

    let mut builder = QueryBuilder::new("UPDATE care_requests SET status = ");
    builder.push_bind(change.status.as_str());
    builder.push(", updated_at = ").push_bind(change.at);
    builder.push(", version = version + 1");
    push_change(&mut builder, "provider_id", provider_change(&change.provider_id));
    push_change(&mut builder, "matched_at", change.matched_at.clone());
    push_change(&mut builder, "arrived_at", change.arrived_at.clone());
    push_change(&mut builder, "completed_at", change.completed_at.clone());
    push_change(&mut builder, "cancelled_at", change.cancelled_at.clone());
    push_change(&mut builder, "provider_notes", change.provider_notes.clone());
    match &change.cancellation {
        FieldChange::Keep => {}
        FieldChange::Set(cancellation) => {
            builder
                .push(", cancelled_by = ")
                .push_bind(cancellation.cancelled_by.as_str());
            builder
                .push(", cancellation_reason = ")
                .push_bind(cancellation.reason.clone());
        }
        FieldChange::Clear => {
            builder.push(", cancelled_by = NULL, cancellation_reason = NULL");
        }
    }

    builder
        .push(" WHERE id = ")
        .push_bind(transition.request_id.as_uuid());
    builder
        .push(" AND status = ANY(")
        .push_bind(status_names(guard.from))
        .push(")");
    match guard.provider {
        ProviderGuard::Any => {}
        ProviderGuard::Unassigned => {
            builder.push(" AND provider_id IS NULL");
        }
        ProviderGuard::AssignedTo(provider) => {
            builder
                .push(" AND provider_id = ")
                .push_bind(provider.as_uuid());
        }
    }
    if let Some(patient) = guard.patient {
        builder
            .push(" AND patient_id = ")
            .push_bind(patient.as_uuid());
    }
    builder.push(" RETURNING id");
    builder
}

impl RequestStore for PostgresRequestStore {
    fn insert_submission<'a>(&'a self, request: &'a CareRequest) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let started = Instant::now();
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(db_error("begin transaction"))?;

            let pricing = &request.pricing;
            let location = &request.location;
            sqlx::query(
                r"
                INSERT INTO care_requests (
                    id, patient_id, provider_id, service_type_id, status,
                    address_line1, address_line2, city, state, zip_code, latitude, longitude,
                    base_price_cents, additional_fees_cents, donation_amount_cents,
                    total_price_cents, insurance_coverage_cents, patient_responsibility_cents,
                    patient_notes, provider_notes, cancelled_by, cancellation_reason,
                    created_at, matched_at, arrived_at, completed_at, cancelled_at,
                    updated_at, version
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29
                )
                ",
            )
            .bind(request.id.as_uuid())
            .bind(request.patient_id.as_uuid())
            .bind(request.provider_id.map(|provider| provider.as_uuid()))
            .bind(request.service_type.id.as_uuid())
            .bind(request.status.as_str())
            .bind(&location.address_line1)
            .bind(&location.address_line2)
            .bind(&location.city)
            .bind(&location.state)
            .bind(&location.zip_code)
            .bind(location.latitude)
            .bind(location.longitude)
            .bind(to_cents(pricing.base_price)?)
            .bind(to_cents(pricing.additional_fees)?)
            .bind(to_cents(pricing.donation_amount)?)
            .bind(to_cents(pricing.total_price)?)
            .bind(to_cents(pricing.insurance_coverage)?)
            .bind(to_cents(pricing.patient_responsibility)?)
            .bind(&request.patient_notes)
            .bind(&request.provider_notes)
            .bind(request.cancellation.as_ref().map(|c| c.cancelled_by.as_str()))
            .bind(request.cancellation.as_ref().and_then(|c| c.reason.as_deref()))
            .bind(request.created_at)
            .bind(request.matched_at)
            .bind(request.arrived_at)
            .bind(request.completed_at)
            .bind(request.cancelled_at)
            .bind(request.updated_at)
            .bind(i64::try_from(request.version.value()).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await
            .map_err(insert_error(request.id))?;

            for (index, patient) in request.case_patients.iter().enumerate() {
                sqlx::query(
                    r"
                    INSERT INTO case_patients (
                        id, care_request_id, position, name, relationship,
                        date_of_birth, gender, notes
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ",
                )
                .bind(patient.id.as_uuid())
                .bind(request.id.as_uuid())
                .bind(position(index))
                .bind(&patient.name)
                .bind(&patient.relationship)
                .bind(patient.date_of_birth)
                .bind(&patient.gender)
                .bind(&patient.notes)
                .execute(&mut *tx)
                .await
                .map_err(db_error("insert case patient"))?;

                for (index, symptom) in patient.symptoms.iter().enumerate() {
                    let (symptom_id, custom_symptom) = match &symptom.symptom {
                        SymptomKind::Catalog(entry) => (Some(entry.id.as_uuid()), None),
                        SymptomKind::Custom(text) => (None, Some(text.as_str())),
                    };
                    sqlx::query(
                        r"
                        INSERT INTO case_patient_symptoms (
                            id, case_patient_id, position, symptom_id, custom_symptom,
                            severity, duration, notes
                        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                        ",
                    )
                    .bind(symptom.id.as_uuid())
                    .bind(patient.id.as_uuid())
                    .bind(position(index))
                    .bind(symptom_id)
                    .bind(custom_symptom)
                    .bind(i16::from(symptom.severity.value()))
                    .bind(&symptom.duration)
                    .bind(&symptom.notes)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error("insert case symptom"))?;
                }
            }

            tx.commit().await.map_err(db_error("commit submission"))?;
            record_duration("insert_submission", started);
            tracing::debug!(
                request_id = %request.id,
                case_patients = request.case_patients.len(),
                "Inserted care request"
            );
            Ok(())
        })
    }

    fn find_by_id(&self, id: CareRequestId) -> StoreFuture<'_, Option<CareRequest>> {
        Box::pin(async move {
            let started = Instant::now();
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(db_error("acquire connection"))?;
            let request = load_request(&mut conn, id).await?;
            record_duration("find_by_id", started);
            Ok(request)
        })
    }

    fn find_by_patient(&self, patient_id: PatientId) -> StoreFuture<'_, Vec<CareRequest>> {
        Box::pin(async move {
            let sql =
                format!("{REQUEST_SELECT} WHERE r.patient_id = $1 ORDER BY r.created_at DESC, r.id DESC");
            let query = sqlx::query_as(&sql).bind(patient_id.as_uuid());
            self.fetch_many("find_by_patient", query).await
        })
    }

    fn find_by_provider(
        &self,
        provider_id: ProviderId,
        statuses: &'static [CareRequestStatus],
        limit: usize,
    ) -> StoreFuture<'_, Vec<CareRequest>> {
        Box::pin(async move {
            let sql = format!(
                "{REQUEST_SELECT} WHERE r.provider_id = $1 AND r.status = ANY($2) \
                 ORDER BY r.created_at DESC, r.id DESC LIMIT $3"
            );
            let query = sqlx::query_as(&sql)
                .bind(provider_id.as_uuid())
                .bind(status_names(statuses))
                .bind(to_limit(limit));
            self.fetch_many("find_by_provider", query).await
        })
    }

    fn find_unclaimed(
        &self,
        limit: usize,
        dismissed_by: Option<ProviderId>,
    ) -> StoreFuture<'_, Vec<CareRequest>> {
        Box::pin(async move {
            let sql = format!(
                "{REQUEST_SELECT} WHERE r.status = ANY($1) AND r.provider_id IS NULL \
                 AND ($2::uuid IS NULL OR NOT EXISTS ( \
                     SELECT 1 FROM provider_dismissals d \
                     WHERE d.care_request_id = r.id AND d.provider_id = $2)) \
                 ORDER BY r.created_at DESC, r.id DESC LIMIT $3"
            );
            let query = sqlx::query_as(&sql)
                .bind(status_names(&CareRequestStatus::UNCLAIMED))
                .bind(dismissed_by.map(|provider| provider.as_uuid()))
                .bind(to_limit(limit));
            self.fetch_many("find_unclaimed", query).await
        })
    }

    fn find_all(
        &self,
        status: Option<CareRequestStatus>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<CareRequest>> {
        Box::pin(async move {
            let sql = format!(
                "{REQUEST_SELECT} WHERE ($1::text IS NULL OR r.status = $1) \
                 ORDER BY r.created_at DESC, r.id DESC LIMIT $2"
            );
            let query = sqlx::query_as(&sql)
                .bind(status.map(|s| s.as_str()))
                .bind(to_limit(limit));
            self.fetch_many("find_all", query).await
        })
    }

    fn apply_transition<'a>(
        &'a self,
        transition: &'a Transition,
    ) -> StoreFuture<'a, Option<CareRequest>> {
        Box::pin(async move {
            let started = Instant::now();
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(db_error("begin transaction"))?;

            let mut update = transition_update(transition);
            let updated: Option<Uuid> = update
                .build_query_scalar()
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error("apply transition"))?;

            if updated.is_none() {
                tx.rollback().await.map_err(db_error("roll back transition"))?;
                record_duration("apply_transition", started);
                tracing::debug!(
                    request_id = %transition.request_id,
                    operation = transition.operation,
                    "Transition guard matched no row"
                );
                return Ok(None);
            }

            let request = load_request(&mut *tx, transition.request_id)
                .await?
                .ok_or_else(|| {
                    StoreError::Corrupt(format!(
                        "Care request {} vanished inside its transaction",
                        transition.request_id
                    ))
                })?;
            tx.commit().await.map_err(db_error("commit transition"))?;
            record_duration("apply_transition", started);
            Ok(Some(request))
        })
    }

    fn record_dismissal(
        &self,
        request_id: CareRequestId,
        provider_id: ProviderId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let started = Instant::now();
            sqlx::query(
                r"
                INSERT INTO provider_dismissals (care_request_id, provider_id, dismissed_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (care_request_id, provider_id) DO NOTHING
                ",
            )
            .bind(request_id.as_uuid())
            .bind(provider_id.as_uuid())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_error("record dismissal"))?;
            record_duration("record_dismissal", started);
            Ok(())
        })
    }

    fn stats(&self, scope: StatsScope, since: DateTime<Utc>) -> StoreFuture<'_, RequestStats> {
        Box::pin(async move {
            let started = Instant::now();
            let provider = match scope {
                StatsScope::Platform => None,
                StatsScope::Provider(provider) => Some(provider.as_uuid()),
            };
            let row: StatsRow = sqlx::query_as(
                r"
                WITH scoped AS (
                    SELECT status, total_price_cents, completed_at, provider_id,
                           ($1::uuid IS NULL OR provider_id = $1) AS in_scope
                    FROM care_requests
                )
                SELECT
                    COALESCE(SUM(total_price_cents)
                        FILTER (WHERE in_scope AND status = 'completed'), 0)::BIGINT
                        AS total_revenue,
                    COUNT(*) FILTER (WHERE in_scope AND status = 'completed')
                        AS completed_visits,
                    COUNT(*) FILTER (WHERE in_scope AND status IN
                        ('searching', 'matched', 'en_route', 'arrived', 'in_progress'))
                        AS active_requests,
                    COUNT(*) FILTER (WHERE status IN ('pending', 'searching')
                        AND provider_id IS NULL)
                        AS unclaimed_requests,
                    COUNT(*) FILTER (WHERE in_scope AND status = 'completed'
                        AND completed_at >= $2)
                        AS completed_since,
                    COALESCE(SUM(total_price_cents) FILTER (WHERE in_scope
                        AND status = 'completed' AND completed_at >= $2), 0)::BIGINT
                        AS revenue_since
                FROM scoped
                ",
            )
            .bind(provider)
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("compute stats"))?;
            record_duration("stats", started);
            row.into_domain()
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query_scalar::<_, i32>("SELECT 1")
                .fetch_one(&self.pool)
                .await
                .map_err(db_error("ping database"))?;
            Ok(())
        })
    }
}
