//! The care-request service: submission, matching gateway, lifecycle
//! operations, dashboards and feed subscriptions.
//!
//! Every operation follows the same shape:
//!
//! 1. Reject calls without a principal (`NotAuthenticated`)
//! 2. Read the current aggregate from the store
//! 3. Let the [`LifecycleEngine`] decide (pure, no I/O)
//! 4. Execute the decided transition as one conditional write
//! 5. Publish the post-write aggregate to the [`ChangeFeed`]
//! 6. Return the post-write aggregate to the caller (read-your-writes)
//!
//! The service keeps no lifecycle state of its own; all coordination between
//! concurrent callers happens in the store's conditional writes. Nothing is
//! retried: store failures surface as [`CareError::StoreUnavailable`].

use crate::feed::{ChangeEvent, ChangeFeed, DEFAULT_CHANNEL_CAPACITY, FeedKey, Subscription};
use crate::health::{HealthCheck, HealthReport};
use crate::metrics::LifecycleMetrics;
use chrono::{DateTime, NaiveTime, Utc};
use curare_core::environment::Clock;
use curare_core::error::CareError;
use curare_core::ids::{CareRequestId, ProviderId};
use curare_core::lifecycle::{AdvanceOperation, LifecycleCommand, LifecycleEngine};
use curare_core::pricing::{DEFAULT_ADDITIONAL_PATIENT_FEE, Money};
use curare_core::principal::{Principal, Role};
use curare_core::store::{CatalogStore, RequestStore, StatsScope};
use curare_core::types::{CareRequest, CareRequestStatus, NewCareRequest, ServiceType, Symptom};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Maximum number of results of a symptom search.
pub const SYMPTOM_SEARCH_LIMIT: usize = 10;

/// Tunables of [`CareService`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Page size of the unclaimed list.
    pub unclaimed_page_size: usize,
    /// Upper bound of admin listings.
    pub admin_list_limit: usize,
    /// Length of a provider's visit history.
    pub history_limit: usize,
    /// Fee per case patient beyond the first.
    pub additional_patient_fee: Money,
    /// Events buffered per feed key.
    pub feed_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            unclaimed_page_size: 20,
            admin_list_limit: 50,
            history_limit: 50,
            additional_patient_fee: DEFAULT_ADDITIONAL_PATIENT_FEE,
            feed_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Platform-wide dashboard figures.
///
/// Trend figures (week-over-week changes) are deliberately absent until
/// historical aggregates exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminStats {
    /// Sum of total price over completed requests.
    pub total_revenue: Money,
    /// Completed visits.
    pub completed_visits: u64,
    /// Requests searching or being worked.
    pub active_requests: u64,
    /// Requests waiting for a provider.
    pub unclaimed_requests: u64,
    /// Visits completed since midnight UTC.
    pub completed_today: u64,
    /// Revenue from visits completed since midnight UTC.
    pub revenue_today: Money,
}

/// A provider's dashboard figures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStats {
    /// Revenue from the provider's visits completed since midnight UTC.
    pub today_earnings: Money,
    /// The provider's visits completed since midnight UTC.
    pub today_visits: u64,
    /// All visits the provider completed.
    pub total_visits: u64,
    /// Requests currently waiting for a provider.
    pub available_requests: u64,
}

/// Orchestrates the Lifecycle Engine, the stores and the Change Feed.
pub struct CareService {
    requests: Arc<dyn RequestStore>,
    catalog: Arc<dyn CatalogStore>,
    feed: ChangeFeed,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
}

impl CareService {
    /// Create a service.
    #[must_use]
    pub fn new(
        requests: Arc<dyn RequestStore>,
        catalog: Arc<dyn CatalogStore>,
        clock: Arc<dyn Clock>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            requests,
            catalog,
            feed: ChangeFeed::with_capacity(config.feed_capacity),
            clock,
            config,
        }
    }

    /// The feed this service publishes to.
    #[must_use]
    pub const fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // ========================================================================
    // Submission and reads
    // ========================================================================

    /// Submit a care request (`createCareRequest`).
    ///
    /// The request and all nested rows are written atomically; it is
    /// returned in `searching`.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `NotAuthorized` (not a patient), `ValidationFailed`
    /// (malformed input, unknown or inactive service type, unknown symptom),
    /// `StoreUnavailable`.
    #[instrument(skip(self, principal, input), fields(service_type_id = %input.service_type_id))]
    pub async fn create_care_request(
        &self,
        principal: Option<&Principal>,
        input: NewCareRequest,
    ) -> Result<CareRequest, CareError> {
        let principal = Principal::require(principal)?;
        principal.require_patient()?;
        input.validate()?;

        let service_type = self
            .catalog
            .service_type(input.service_type_id)
            .await?
            .ok_or_else(|| {
                CareError::validation(format!("Unknown service type {}", input.service_type_id))
            })?;
        let symptom_ids = input.symptom_ids();
        let symptoms = if symptom_ids.is_empty() {
            Vec::new()
        } else {
            self.catalog.symptoms(&symptom_ids).await?
        };

        let request = LifecycleEngine::submit(
            principal,
            input,
            service_type,
            &symptoms,
            self.config.additional_patient_fee,
            self.clock.as_ref(),
        )?;
        self.requests.insert_submission(&request).await?;

        LifecycleMetrics::record_created();
        info!(
            request_id = %request.id,
            patient_id = %request.patient_id,
            case_patients = request.case_patients.len(),
            total = %request.pricing.total_price,
            urgency = %request.urgency(),
            "Care request submitted"
        );
        self.feed.publish(&ChangeEvent::created(request.clone()));
        Ok(request)
    }

    /// Read one request.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `RequestNotFound`, `NotAuthorized` (not visible to
    /// the caller), `StoreUnavailable`.
    pub async fn get_care_request(
        &self,
        principal: Option<&Principal>,
        id: CareRequestId,
    ) -> Result<CareRequest, CareError> {
        let principal = Principal::require(principal)?;
        let request = self.load(id).await?;
        LifecycleEngine::authorize_view(&request, principal)?;
        Ok(request)
    }

    /// The calling patient's requests, newest first.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `NotAuthorized` (not a patient), `StoreUnavailable`.
    pub async fn list_my_requests(
        &self,
        principal: Option<&Principal>,
    ) -> Result<Vec<CareRequest>, CareError> {
        let patient = Principal::require(principal)?.require_patient()?;
        Ok(self.requests.find_by_patient(patient).await?)
    }

    // ========================================================================
    // Matching gateway
    // ========================================================================

    /// Unclaimed requests, newest first, one page (`listUnclaimedRequests`).
    ///
    /// Not ranked by distance. Requests the calling provider declined are
    /// omitted for that provider.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `NotAuthorized` (patients), `StoreUnavailable`.
    pub async fn list_unclaimed(
        &self,
        principal: Option<&Principal>,
    ) -> Result<Vec<CareRequest>, CareError> {
        let principal = Principal::require(principal)?;
        let dismissed_by = match principal.role {
            Role::Provider => principal.as_provider(),
            Role::Admin => None,
            Role::Patient => {
                return Err(CareError::not_authorized(
                    "Patients cannot browse unclaimed requests",
                ));
            }
        };
        Ok(self
            .requests
            .find_unclaimed(self.config.unclaimed_page_size, dismissed_by)
            .await?)
    }

    /// Claim an unclaimed request (`claimRequest`).
    ///
    /// Exactly one of any number of concurrent claims succeeds.
    ///
    /// # Errors
    ///
    /// `RequestAlreadyClaimed` when another provider won, `RequestNotFound`,
    /// `PreconditionFailed` (cancelled), `NotAuthorized`, `NotAuthenticated`,
    /// `StoreUnavailable`.
    pub async fn claim_request(
        &self,
        principal: Option<&Principal>,
        id: CareRequestId,
    ) -> Result<CareRequest, CareError> {
        self.transition(principal, id, LifecycleCommand::Claim).await
    }

    /// Hide an unclaimed request from the calling provider.
    ///
    /// The request stays visible to every other provider. Declining a request
    /// that is no longer unclaimed does nothing.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `NotAuthorized` (not a provider), `RequestNotFound`,
    /// `StoreUnavailable`.
    #[instrument(skip(self, principal), fields(request_id = %id))]
    pub async fn decline_request(
        &self,
        principal: Option<&Principal>,
        id: CareRequestId,
    ) -> Result<(), CareError> {
        let provider = Principal::require(principal)?.require_provider()?;
        let request = self.load(id).await?;
        if !request.is_unclaimed() {
            return Ok(());
        }
        self.requests
            .record_dismissal(id, provider, self.clock.now())
            .await?;
        info!(provider_id = %provider, "Provider declined care request");
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Move a visit forward (`advanceStatus`).
    ///
    /// `provider_notes` are stored when completing.
    ///
    /// # Errors
    ///
    /// `PreconditionFailed` (wrong source status), `NotAuthorized` (not the
    /// assigned provider), `RequestNotFound`, `NotAuthenticated`,
    /// `StoreUnavailable`.
    pub async fn advance_status(
        &self,
        principal: Option<&Principal>,
        id: CareRequestId,
        operation: AdvanceOperation,
        provider_notes: Option<String>,
    ) -> Result<CareRequest, CareError> {
        self.transition(
            principal,
            id,
            LifecycleCommand::Advance {
                operation,
                provider_notes,
            },
        )
        .await
    }

    /// Cancel a request (`cancelRequest`): the owning patient or an admin.
    ///
    /// # Errors
    ///
    /// `PreconditionFailed` (en route or later), `NotAuthorized`,
    /// `RequestNotFound`, `NotAuthenticated`, `StoreUnavailable`.
    pub async fn cancel_request(
        &self,
        principal: Option<&Principal>,
        id: CareRequestId,
        reason: Option<String>,
    ) -> Result<CareRequest, CareError> {
        self.transition(principal, id, LifecycleCommand::Cancel { reason })
            .await
    }

    /// Force-assign a provider (admin).
    ///
    /// # Errors
    ///
    /// `PreconditionFailed` (terminal), `NotAuthorized`, `RequestNotFound`,
    /// `NotAuthenticated`, `StoreUnavailable`.
    pub async fn admin_reassign(
        &self,
        principal: Option<&Principal>,
        id: CareRequestId,
        provider_id: ProviderId,
    ) -> Result<CareRequest, CareError> {
        self.transition(principal, id, LifecycleCommand::Reassign { provider_id })
            .await
    }

    // ========================================================================
    // Provider and admin views
    // ========================================================================

    /// The calling provider's current visit, if any.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `NotAuthorized`, `StoreUnavailable`.
    pub async fn active_request(
        &self,
        principal: Option<&Principal>,
    ) -> Result<Option<CareRequest>, CareError> {
        let provider = Principal::require(principal)?.require_provider()?;
        let mut active = self
            .requests
            .find_by_provider(provider, &CareRequestStatus::ACTIVE, 1)
            .await?;
        Ok(active.pop())
    }

    /// The calling provider's completed visits, newest first.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `NotAuthorized`, `StoreUnavailable`.
    pub async fn provider_history(
        &self,
        principal: Option<&Principal>,
    ) -> Result<Vec<CareRequest>, CareError> {
        let provider = Principal::require(principal)?.require_provider()?;
        Ok(self
            .requests
            .find_by_provider(
                provider,
                &[CareRequestStatus::Completed],
                self.config.history_limit,
            )
            .await?)
    }

    /// All requests for admins, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `NotAuthorized`, `StoreUnavailable`.
    pub async fn admin_list(
        &self,
        principal: Option<&Principal>,
        status: Option<CareRequestStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<CareRequest>, CareError> {
        Principal::require(principal)?.require_admin()?;
        let limit = limit
            .unwrap_or(self.config.admin_list_limit)
            .clamp(1, self.config.admin_list_limit);
        Ok(self.requests.find_all(status, limit).await?)
    }

    /// Platform dashboard.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `NotAuthorized`, `StoreUnavailable`.
    pub async fn admin_stats(&self, principal: Option<&Principal>) -> Result<AdminStats, CareError> {
        Principal::require(principal)?.require_admin()?;
        let stats = self
            .requests
            .stats(StatsScope::Platform, self.start_of_day())
            .await?;
        Ok(AdminStats {
            total_revenue: stats.total_revenue,
            completed_visits: stats.completed_visits,
            active_requests: stats.active_requests,
            unclaimed_requests: stats.unclaimed_requests,
            completed_today: stats.completed_since,
            revenue_today: stats.revenue_since,
        })
    }

    /// The calling provider's dashboard.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `NotAuthorized`, `StoreUnavailable`.
    pub async fn provider_stats(
        &self,
        principal: Option<&Principal>,
    ) -> Result<ProviderStats, CareError> {
        let provider = Principal::require(principal)?.require_provider()?;
        let stats = self
            .requests
            .stats(StatsScope::Provider(provider), self.start_of_day())
            .await?;
        Ok(ProviderStats {
            today_earnings: stats.revenue_since,
            today_visits: stats.completed_since,
            total_visits: stats.completed_visits,
            available_requests: stats.unclaimed_requests,
        })
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Requestable service types, cheapest first.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable`.
    pub async fn service_types(&self) -> Result<Vec<ServiceType>, CareError> {
        Ok(self.catalog.active_service_types().await?)
    }

    /// The symptom catalog, or the matches for `query`.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable`.
    pub async fn symptoms(&self, query: Option<&str>) -> Result<Vec<Symptom>, CareError> {
        match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(query) => Ok(self
                .catalog
                .search_symptoms(query, SYMPTOM_SEARCH_LIMIT)
                .await?),
            None => Ok(self.catalog.list_symptoms().await?),
        }
    }

    // ========================================================================
    // Change feed
    // ========================================================================

    /// Subscribe to changes (`subscribe`).
    ///
    /// - `Request(id)`: anyone who may read the request, for as long as
    ///   they may read it
    /// - `AllUnclaimed`: providers and admins
    /// - `All`: admins
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `NotAuthorized`, `RequestNotFound`,
    /// `StoreUnavailable`.
    pub async fn subscribe(
        &self,
        principal: Option<&Principal>,
        key: FeedKey,
    ) -> Result<Subscription, CareError> {
        let principal = Principal::require(principal)?;
        match key {
            FeedKey::Request(id) => {
                let request = self.load(id).await?;
                LifecycleEngine::authorize_view(&request, principal)?;
                return Ok(self.feed.subscribe(key).for_viewer(*principal));
            }
            FeedKey::AllUnclaimed => {
                if principal.role == Role::Patient {
                    return Err(CareError::not_authorized(
                        "Patients cannot watch the unclaimed pool",
                    ));
                }
            }
            FeedKey::All => {
                principal.require_admin()?;
            }
        }
        Ok(self.feed.subscribe(key))
    }

    /// Readiness probe.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` when the store cannot be reached.
    pub async fn ready(&self) -> Result<(), CareError> {
        Ok(self.requests.ping().await?)
    }

    /// Component health for the readiness endpoint.
    pub async fn health(&self) -> HealthReport {
        let store = match self.requests.ping().await {
            Ok(()) => HealthCheck::healthy("request_store"),
            Err(err) => HealthCheck::unhealthy("request_store", err.to_string()),
        };
        let feed = HealthCheck::healthy("change_feed")
            .with_metadata("active_channels", self.feed.active_channels());
        HealthReport::new(vec![store, feed], self.clock.now())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn load(&self, id: CareRequestId) -> Result<CareRequest, CareError> {
        self.requests
            .find_by_id(id)
            .await?
            .ok_or(CareError::RequestNotFound(id))
    }

    fn start_of_day(&self) -> DateTime<Utc> {
        self.clock
            .now()
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc()
    }

    #[instrument(skip(self, principal, command), fields(request_id = %id, operation = command.name()))]
    async fn transition(
        &self,
        principal: Option<&Principal>,
        id: CareRequestId,
        command: LifecycleCommand,
    ) -> Result<CareRequest, CareError> {
        let started = Instant::now();
        let operation = command.name();
        let principal = Principal::require(principal)?;

        let result = self.try_transition(principal, id, command).await;
        match &result {
            Ok(request) => {
                LifecycleMetrics::record_transition(operation, started.elapsed());
                info!(
                    status = %request.status,
                    version = %request.version,
                    actor = %principal.user_id,
                    role = %principal.role,
                    "Transition applied"
                );
            }
            Err(err) => {
                LifecycleMetrics::record_rejection(operation, err.code());
                if matches!(err, CareError::RequestAlreadyClaimed(_)) {
                    LifecycleMetrics::record_claim_conflict();
                }
                warn!(
                    error = %err,
                    code = err.code(),
                    actor = %principal.user_id,
                    role = %principal.role,
                    "Transition rejected"
                );
            }
        }
        result
    }

    async fn try_transition(
        &self,
        principal: &Principal,
        id: CareRequestId,
        command: LifecycleCommand,
    ) -> Result<CareRequest, CareError> {
        let current = self.load(id).await?;
        let transition =
            LifecycleEngine::decide(&current, principal, command.clone(), self.clock.as_ref())?;

        match self.requests.apply_transition(&transition).await? {
            Some(updated) => {
                self.feed.publish(&ChangeEvent::updated(
                    updated.clone(),
                    current.is_unclaimed(),
                ));
                Ok(updated)
            }
            None => Err(self.explain_rejected_write(principal, id, command).await),
        }
    }

    /// The guard no longer held at write time: re-read and re-decide so the
    /// caller gets the precise reason (lost claim race, moved on, deleted).
    async fn explain_rejected_write(
        &self,
        principal: &Principal,
        id: CareRequestId,
        command: LifecycleCommand,
    ) -> CareError {
        let operation = command.name();
        match self.requests.find_by_id(id).await {
            Err(err) => err.into(),
            Ok(None) => CareError::RequestNotFound(id),
            Ok(Some(fresh)) => {
                match LifecycleEngine::decide(&fresh, principal, command, self.clock.as_ref()) {
                    Err(err) => err,
                    // Raced with a write that has since been undone; report the
                    // state we observed.
                    Ok(_) => CareError::PreconditionFailed {
                        request_id: id,
                        operation,
                        status: fresh.status,
                    },
                }
            }
        }
    }
}

impl std::fmt::Debug for CareService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CareService")
            .field("feed", &self.feed)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
