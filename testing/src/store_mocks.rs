//! In-memory request and catalog store.
//!
//! Complements `PostgresRequestStore` for fast, deterministic tests. Every
//! method runs under one lock, so a submission is visible all at once and a
//! transition's guard is checked and applied atomically, which is the same
//! contract the SQL store gives with a transaction and a conditional
//! `UPDATE`.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already panicked

use chrono::{DateTime, Utc};
use curare_core::error::StoreError;
use curare_core::ids::{CareRequestId, PatientId, ProviderId, ServiceTypeId, SymptomId};
use curare_core::lifecycle::Transition;
use curare_core::pricing::Money;
use curare_core::store::{CatalogStore, RequestStats, RequestStore, StatsScope, StoreFuture};
use curare_core::types::{CareRequest, CareRequestStatus, ServiceType, Symptom};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct Tables {
    requests: HashMap<CareRequestId, CareRequest>,
    /// Insertion order, used to break `created_at` ties.
    order: Vec<CareRequestId>,
    dismissals: HashSet<(CareRequestId, ProviderId)>,
    service_types: HashMap<ServiceTypeId, ServiceType>,
    symptoms: HashMap<SymptomId, Symptom>,
}

impl Tables {
    /// Requests matching `filter`, newest first.
    fn newest_first(&self, filter: impl Fn(&CareRequest) -> bool, limit: usize) -> Vec<CareRequest> {
        let mut rows: Vec<&CareRequest> = self
            .order
            .iter()
            .rev()
            .filter_map(|id| self.requests.get(id))
            .filter(|request| filter(request))
            .collect();
        // Stable sort keeps reverse insertion order among equal timestamps.
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.into_iter().take(limit).cloned().collect()
    }
}

/// In-memory `RequestStore` and `CatalogStore`.
///
/// Clones share the same tables.
///
/// # Example
///
/// ```
/// use curare_testing::{fixtures, InMemoryRequestStore};
///
/// let store = InMemoryRequestStore::with_catalog(vec![fixtures::service_type()], fixtures::symptoms());
/// store.set_unavailable(true);
/// assert!(store.is_unavailable());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryRequestStore {
    tables: Arc<RwLock<Tables>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryRequestStore {
    /// Create an empty store with an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a catalog.
    #[must_use]
    pub fn with_catalog(service_types: Vec<ServiceType>, symptoms: Vec<Symptom>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.write().unwrap();
            tables.service_types = service_types.into_iter().map(|s| (s.id, s)).collect();
            tables.symptoms = symptoms.into_iter().map(|s| (s.id, s)).collect();
        }
        store
    }

    /// Make every subsequent call fail with a database error (or recover).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether the store is simulating an outage.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::SeqCst)
    }

    /// Number of stored requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().unwrap().requests.len()
    }

    /// Whether no request is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of a stored request, bypassing the outage switch.
    #[must_use]
    pub fn get(&self, id: CareRequestId) -> Option<CareRequest> {
        self.tables.read().unwrap().requests.get(&id).cloned()
    }

    /// Whether a provider has declined a request.
    #[must_use]
    pub fn is_dismissed(&self, request_id: CareRequestId, provider_id: ProviderId) -> bool {
        self.tables
            .read()
            .unwrap()
            .dismissals
            .contains(&(request_id, provider_id))
    }

    /// Overwrite a stored request, bypassing the lifecycle. For arranging tests.
    pub fn put(&self, request: CareRequest) {
        let mut tables = self.tables.write().unwrap();
        if !tables.requests.contains_key(&request.id) {
            tables.order.push(request.id);
        }
        tables.requests.insert(request.id, request);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.is_unavailable() {
            Err(StoreError::DatabaseError(
                "in-memory store is unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl RequestStore for InMemoryRequestStore {
    fn insert_submission<'a>(&'a self, request: &'a CareRequest) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.check()?;
            let mut tables = self.tables.write().unwrap();
            if tables.requests.contains_key(&request.id) {
                return Err(StoreError::Conflict(format!(
                    "care request {} already exists",
                    request.id
                )));
            }
            tables.order.push(request.id);
            tables.requests.insert(request.id, request.clone());
            Ok(())
        })
    }

    fn find_by_id(&self, id: CareRequestId) -> StoreFuture<'_, Option<CareRequest>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.tables.read().unwrap().requests.get(&id).cloned())
        })
    }

    fn find_by_patient(&self, patient_id: PatientId) -> StoreFuture<'_, Vec<CareRequest>> {
        Box::pin(async move {
            self.check()?;
            let tables = self.tables.read().unwrap();
            Ok(tables.newest_first(|r| r.patient_id == patient_id, usize::MAX))
        })
    }

    fn find_by_provider(
        &self,
        provider_id: ProviderId,
        statuses: &'static [CareRequestStatus],
        limit: usize,
    ) -> StoreFuture<'_, Vec<CareRequest>> {
        Box::pin(async move {
            self.check()?;
            let tables = self.tables.read().unwrap();
            Ok(tables.newest_first(
                |r| r.provider_id == Some(provider_id) && statuses.contains(&r.status),
                limit,
            ))
        })
    }

    fn find_unclaimed(
        &self,
        limit: usize,
        dismissed_by: Option<ProviderId>,
    ) -> StoreFuture<'_, Vec<CareRequest>> {
        Box::pin(async move {
            self.check()?;
            let tables = self.tables.read().unwrap();
            Ok(tables.newest_first(
                |r| {
                    r.is_unclaimed()
                        && dismissed_by
                            .is_none_or(|provider| !tables.dismissals.contains(&(r.id, provider)))
                },
                limit,
            ))
        })
    }

    fn find_all(
        &self,
        status: Option<CareRequestStatus>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<CareRequest>> {
        Box::pin(async move {
            self.check()?;
            let tables = self.tables.read().unwrap();
            Ok(tables.newest_first(|r| status.is_none_or(|s| r.status == s), limit))
        })
    }

    fn apply_transition<'a>(
        &'a self,
        transition: &'a Transition,
    ) -> StoreFuture<'a, Option<CareRequest>> {
        Box::pin(async move {
            self.check()?;
            let mut tables = self.tables.write().unwrap();
            let Some(request) = tables.requests.get_mut(&transition.request_id) else {
                return Ok(None);
            };
            if transition.apply_to(request) {
                Ok(Some(request.clone()))
            } else {
                Ok(None)
            }
        })
    }

    fn record_dismissal(
        &self,
        request_id: CareRequestId,
        provider_id: ProviderId,
        _at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.check()?;
            let mut tables = self.tables.write().unwrap();
            if tables.requests.contains_key(&request_id) {
                tables.dismissals.insert((request_id, provider_id));
            }
            Ok(())
        })
    }

    fn stats(&self, scope: StatsScope, since: DateTime<Utc>) -> StoreFuture<'_, RequestStats> {
        Box::pin(async move {
            self.check()?;
            let tables = self.tables.read().unwrap();
            let mut stats = RequestStats::default();
            for request in tables.requests.values() {
                if request.is_unclaimed() {
                    stats.unclaimed_requests += 1;
                }
                let in_scope = match scope {
                    StatsScope::Platform => true,
                    StatsScope::Provider(provider) => request.provider_id == Some(provider),
                };
                if !in_scope {
                    continue;
                }
                match request.status {
                    CareRequestStatus::Completed => {
                        stats.completed_visits += 1;
                        stats.total_revenue = add(stats.total_revenue, request.pricing.total_price)?;
                        if request.completed_at.is_some_and(|at| at >= since) {
                            stats.completed_since += 1;
                            stats.revenue_since =
                                add(stats.revenue_since, request.pricing.total_price)?;
                        }
                    }
                    CareRequestStatus::Searching
                    | CareRequestStatus::Matched
                    | CareRequestStatus::EnRoute
                    | CareRequestStatus::Arrived
                    | CareRequestStatus::InProgress => stats.active_requests += 1,
                    CareRequestStatus::Pending | CareRequestStatus::Cancelled => {}
                }
            }
            Ok(stats)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.check() })
    }
}

fn add(a: Money, b: Money) -> Result<Money, StoreError> {
    a.checked_add(b)
        .ok_or_else(|| StoreError::Corrupt("revenue overflow".to_string()))
}

impl CatalogStore for InMemoryRequestStore {
    fn service_type(&self, id: ServiceTypeId) -> StoreFuture<'_, Option<ServiceType>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.tables.read().unwrap().service_types.get(&id).cloned())
        })
    }

    fn active_service_types(&self) -> StoreFuture<'_, Vec<ServiceType>> {
        Box::pin(async move {
            self.check()?;
            let tables = self.tables.read().unwrap();
            let mut types: Vec<ServiceType> = tables
                .service_types
                .values()
                .filter(|s| s.is_active)
                .cloned()
                .collect();
            types.sort_by(|a, b| a.base_price.cmp(&b.base_price).then_with(|| a.name.cmp(&b.name)));
            Ok(types)
        })
    }

    fn symptoms<'a>(&'a self, ids: &'a [SymptomId]) -> StoreFuture<'a, Vec<Symptom>> {
        Box::pin(async move {
            self.check()?;
            let tables = self.tables.read().unwrap();
            Ok(ids
                .iter()
                .filter_map(|id| tables.symptoms.get(id).cloned())
                .collect())
        })
    }

    fn list_symptoms(&self) -> StoreFuture<'_, Vec<Symptom>> {
        Box::pin(async move {
            self.check()?;
            let tables = self.tables.read().unwrap();
            let mut symptoms: Vec<Symptom> = tables.symptoms.values().cloned().collect();
            symptoms.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(symptoms)
        })
    }

    fn search_symptoms<'a>(&'a self, query: &'a str, limit: usize) -> StoreFuture<'a, Vec<Symptom>> {
        Box::pin(async move {
            self.check()?;
            let needle = query.trim().to_lowercase();
            let tables = self.tables.read().unwrap();
            let mut symptoms: Vec<Symptom> = tables
                .symptoms
                .values()
                .filter(|s| s.name.to_lowercase().contains(&needle))
                .cloned()
                .collect();
            symptoms.sort_by(|a, b| a.name.cmp(&b.name));
            symptoms.truncate(limit);
            Ok(symptoms)
        })
    }
}
