//! Persistence traits for the care-request aggregate and the catalog.
//!
//! # Implementations
//!
//! - `PostgresRequestStore` (in `curare-postgres`): Production implementation
//! - `InMemoryRequestStore` (in `curare-testing`): Fast, deterministic testing
//!
//! Every read returns the fully hydrated aggregate: case patients, their
//! symptoms with catalog entries, and the service type. List reads are
//! ordered newest first.
//!
//! Both traits are dyn-compatible so services can hold `Arc<dyn RequestStore>`.

use crate::error::StoreError;
use crate::ids::{CareRequestId, PatientId, ProviderId, ServiceTypeId, SymptomId};
use crate::lifecycle::Transition;
use crate::pricing::Money;
use crate::types::{CareRequest, CareRequestStatus, ServiceType, Symptom};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Aggregates used by the admin and provider dashboards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStats {
    /// Sum of `total_price` over completed requests.
    pub total_revenue: Money,
    /// Number of completed requests.
    pub completed_visits: u64,
    /// Requests in searching, matched, en route, arrived or in progress.
    pub active_requests: u64,
    /// Requests waiting for a provider.
    pub unclaimed_requests: u64,
    /// Requests completed at or after the `since` bound.
    pub completed_since: u64,
    /// Sum of `total_price` over requests completed at or after `since`.
    pub revenue_since: Money,
}

/// Scope of a statistics query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsScope {
    /// Every request.
    Platform,
    /// Requests assigned to one provider (unclaimed counts stay platform-wide).
    Provider(ProviderId),
}

/// Durable store of care requests.
pub trait RequestStore: Send + Sync {
    /// Insert a submitted request with all case patients and symptoms.
    ///
    /// All rows become visible together or not at all.
    ///
    /// # Errors
    ///
    /// Returns error if the database write fails; nothing is persisted then.
    fn insert_submission<'a>(&'a self, request: &'a CareRequest) -> StoreFuture<'a, ()>;

    /// Load a request by id.
    ///
    /// # Errors
    ///
    /// Returns error if the database read fails.
    fn find_by_id(&self, id: CareRequestId) -> StoreFuture<'_, Option<CareRequest>>;

    /// Requests submitted by a patient, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the database read fails.
    fn find_by_patient(&self, patient_id: PatientId) -> StoreFuture<'_, Vec<CareRequest>>;

    /// Requests assigned to a provider with one of `statuses`, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the database read fails.
    fn find_by_provider(
        &self,
        provider_id: ProviderId,
        statuses: &'static [CareRequestStatus],
        limit: usize,
    ) -> StoreFuture<'_, Vec<CareRequest>>;

    /// Unclaimed requests (pending or searching, no provider), newest first.
    ///
    /// When `dismissed_by` is set, requests that provider declined are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the database read fails.
    fn find_unclaimed(
        &self,
        limit: usize,
        dismissed_by: Option<ProviderId>,
    ) -> StoreFuture<'_, Vec<CareRequest>>;

    /// All requests, optionally filtered by status, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the database read fails.
    fn find_all(
        &self,
        status: Option<CareRequestStatus>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<CareRequest>>;

    /// Apply a transition as one conditional write.
    ///
    /// The write only happens when the stored row still satisfies
    /// `transition.guard`; the version is incremented by one. Returns the
    /// post-write aggregate, or `None` when no row matched (missing request or
    /// guard no longer holds).
    ///
    /// # Errors
    ///
    /// Returns error if the database write fails.
    fn apply_transition<'a>(
        &'a self,
        transition: &'a Transition,
    ) -> StoreFuture<'a, Option<CareRequest>>;

    /// Record that a provider declined a request. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if the database write fails.
    fn record_dismissal(
        &self,
        request_id: CareRequestId,
        provider_id: ProviderId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()>;

    /// Dashboard aggregates.
    ///
    /// # Errors
    ///
    /// Returns error if the database read fails.
    fn stats(&self, scope: StatsScope, since: DateTime<Utc>) -> StoreFuture<'_, RequestStats>;

    /// Cheap connectivity probe used by readiness checks.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be reached.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Read-only catalog of service types and symptoms.
pub trait CatalogStore: Send + Sync {
    /// Look up a service type, active or not.
    ///
    /// # Errors
    ///
    /// Returns error if the database read fails.
    fn service_type(&self, id: ServiceTypeId) -> StoreFuture<'_, Option<ServiceType>>;

    /// Active service types ordered by base price.
    ///
    /// # Errors
    ///
    /// Returns error if the database read fails.
    fn active_service_types(&self) -> StoreFuture<'_, Vec<ServiceType>>;

    /// Symptoms with the given ids. Unknown ids are omitted.
    ///
    /// # Errors
    ///
    /// Returns error if the database read fails.
    fn symptoms<'a>(&'a self, ids: &'a [SymptomId]) -> StoreFuture<'a, Vec<Symptom>>;

    /// Every catalog symptom ordered by name.
    ///
    /// # Errors
    ///
    /// Returns error if the database read fails.
    fn list_symptoms(&self) -> StoreFuture<'_, Vec<Symptom>>;

    /// Symptoms whose name contains `query` (case-insensitive), ordered by name.
    ///
    /// # Errors
    ///
    /// Returns error if the database read fails.
    fn search_symptoms<'a>(&'a self, query: &'a str, limit: usize) -> StoreFuture<'a, Vec<Symptom>>;
}
