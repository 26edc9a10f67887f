//! The Lifecycle Engine.
//!
//! The engine is pure: [`LifecycleEngine::decide`] inspects a snapshot of a
//! request, the caller and a [`LifecycleCommand`], and either rejects the
//! command or returns a [`Transition`]. Nothing is mutated here.
//!
//! A transition carries both halves of a conditional write:
//!
//! - [`Guard`]: the predicate the stored row must still satisfy (allowed
//!   source statuses, provider assignment, ownership)
//! - [`Change`]: the column updates to apply when the guard holds
//!
//! Stores evaluate the guard inside the write itself (`UPDATE ... WHERE`), so
//! a decision taken on a stale read can never become a mutation. When the
//! guard no longer holds the store reports zero affected rows and the caller
//! re-decides on a fresh read to report the precise error.
//!
//! # Transition Table
//!
//! | Operation      | Actor                  | From                      | To          |
//! |----------------|------------------------|---------------------------|-------------|
//! | claim          | provider               | pending, searching        | matched     |
//! | start_en_route | assigned provider      | matched                   | en_route    |
//! | mark_arrived   | assigned provider      | en_route                  | arrived     |
//! | start_visit    | assigned provider      | arrived                   | in_progress |
//! | complete       | assigned provider      | in_progress               | completed   |
//! | cancel         | owning patient / admin | pending, searching, matched | cancelled |
//! | reassign       | admin                  | any non-terminal          | matched     |

use crate::environment::Clock;
use crate::error::CareError;
use crate::ids::{
    CareRequestId, CasePatientId, CaseSymptomId, PatientId, ProviderId, SymptomId, Version,
};
use crate::pricing::{Money, Pricing};
use crate::principal::{Principal, Role};
use crate::types::{
    CancelledBy, Cancellation, CareRequest, CareRequestStatus, CasePatient,
    CaseSymptom, NewCareRequest, NewCasePatient, ServiceType, Severity, Symptom, SymptomKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Commands
// ============================================================================

/// Forward steps performed by the assigned provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceOperation {
    /// matched → en_route
    StartEnRoute,
    /// en_route → arrived
    MarkArrived,
    /// arrived → in_progress
    StartVisit,
    /// in_progress → completed
    Complete,
}

impl AdvanceOperation {
    /// Every forward step, in order.
    pub const ALL: [Self; 4] = [
        Self::StartEnRoute,
        Self::MarkArrived,
        Self::StartVisit,
        Self::Complete,
    ];

    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StartEnRoute => "start_en_route",
            Self::MarkArrived => "mark_arrived",
            Self::StartVisit => "start_visit",
            Self::Complete => "complete",
        }
    }

    /// The only status the step may start from.
    #[must_use]
    pub const fn source(&self) -> &'static [CareRequestStatus] {
        match self {
            Self::StartEnRoute => &[CareRequestStatus::Matched],
            Self::MarkArrived => &[CareRequestStatus::EnRoute],
            Self::StartVisit => &[CareRequestStatus::Arrived],
            Self::Complete => &[CareRequestStatus::InProgress],
        }
    }

    /// The status the step leads to.
    #[must_use]
    pub const fn target(&self) -> CareRequestStatus {
        match self {
            Self::StartEnRoute => CareRequestStatus::EnRoute,
            Self::MarkArrived => CareRequestStatus::Arrived,
            Self::StartVisit => CareRequestStatus::InProgress,
            Self::Complete => CareRequestStatus::Completed,
        }
    }
}

impl fmt::Display for AdvanceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to move a care request through its lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleCommand {
    /// A provider claims an unclaimed request.
    Claim,
    /// The assigned provider moves the visit forward.
    Advance {
        /// Which step.
        operation: AdvanceOperation,
        /// Notes stored on completion; ignored for other steps.
        provider_notes: Option<String>,
    },
    /// The owning patient or an admin cancels.
    Cancel {
        /// Optional reason.
        reason: Option<String>,
    },
    /// An admin force-assigns a provider.
    Reassign {
        /// The provider to assign.
        provider_id: ProviderId,
    },
}

impl LifecycleCommand {
    /// Shorthand for an advance without notes.
    #[must_use]
    pub const fn advance(operation: AdvanceOperation) -> Self {
        Self::Advance {
            operation,
            provider_notes: None,
        }
    }

    /// Operation name used in errors, logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Advance { operation, .. } => operation.as_str(),
            Self::Cancel { .. } => "cancel",
            Self::Reassign { .. } => "reassign",
        }
    }
}

// ============================================================================
// Transitions
// ============================================================================

/// Predicate on the stored provider assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderGuard {
    /// No condition.
    Any,
    /// `provider_id IS NULL`
    Unassigned,
    /// `provider_id = $1`
    AssignedTo(ProviderId),
}

/// Condition the stored row must satisfy for the write to apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Guard {
    /// Allowed current statuses.
    pub from: &'static [CareRequestStatus],
    /// Provider assignment condition.
    pub provider: ProviderGuard,
    /// Required owner, for patient-initiated writes.
    pub patient: Option<PatientId>,
}

impl Guard {
    /// Whether `request` satisfies the guard.
    #[must_use]
    pub fn admits(&self, request: &CareRequest) -> bool {
        let provider_ok = match self.provider {
            ProviderGuard::Any => true,
            ProviderGuard::Unassigned => request.provider_id.is_none(),
            ProviderGuard::AssignedTo(provider) => request.provider_id == Some(provider),
        };
        let patient_ok = self
            .patient
            .is_none_or(|patient| patient == request.patient_id);
        self.from.contains(&request.status) && provider_ok && patient_ok
    }
}

/// Update applied to a single nullable column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldChange<T> {
    /// Leave the column as is.
    Keep,
    /// Overwrite the column.
    Set(T),
    /// Set the column to NULL.
    Clear,
}

impl<T: Clone> FieldChange<T> {
    fn apply_to(&self, field: &mut Option<T>) {
        match self {
            Self::Keep => {}
            Self::Set(value) => *field = Some(value.clone()),
            Self::Clear => *field = None,
        }
    }
}

/// Column updates of an accepted transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    /// New status.
    pub status: CareRequestStatus,
    /// Provider assignment.
    pub provider_id: FieldChange<ProviderId>,
    /// Claim / assignment time.
    pub matched_at: FieldChange<DateTime<Utc>>,
    /// Arrival time.
    pub arrived_at: FieldChange<DateTime<Utc>>,
    /// Completion time.
    pub completed_at: FieldChange<DateTime<Utc>>,
    /// Cancellation time.
    pub cancelled_at: FieldChange<DateTime<Utc>>,
    /// Cancellation details.
    pub cancellation: FieldChange<Cancellation>,
    /// Provider notes.
    pub provider_notes: FieldChange<String>,
    /// Time of the write, stored as `updated_at`.
    pub at: DateTime<Utc>,
}

impl Change {
    fn to_status(status: CareRequestStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            provider_id: FieldChange::Keep,
            matched_at: FieldChange::Keep,
            arrived_at: FieldChange::Keep,
            completed_at: FieldChange::Keep,
            cancelled_at: FieldChange::Keep,
            cancellation: FieldChange::Keep,
            provider_notes: FieldChange::Keep,
            at,
        }
    }

    /// Apply the change to an in-memory aggregate and bump its version.
    pub fn apply(&self, request: &mut CareRequest) {
        request.status = self.status;
        self.provider_id.apply_to(&mut request.provider_id);
        self.matched_at.apply_to(&mut request.matched_at);
        self.arrived_at.apply_to(&mut request.arrived_at);
        self.completed_at.apply_to(&mut request.completed_at);
        self.cancelled_at.apply_to(&mut request.cancelled_at);
        self.cancellation.apply_to(&mut request.cancellation);
        self.provider_notes.apply_to(&mut request.provider_notes);
        request.updated_at = self.at;
        request.version = request.version.next();
    }
}

/// A decided transition: guard plus change for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Target request.
    pub request_id: CareRequestId,
    /// Operation name.
    pub operation: &'static str,
    /// Write predicate.
    pub guard: Guard,
    /// Column updates.
    pub change: Change,
}

impl Transition {
    /// Apply to `request` when the guard admits it, as a store would.
    ///
    /// Returns `false` and leaves `request` untouched otherwise.
    pub fn apply_to(&self, request: &mut CareRequest) -> bool {
        if request.id != self.request_id || !self.guard.admits(request) {
            return false;
        }
        self.change.apply(request);
        true
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Validates and produces lifecycle transitions.
#[derive(Clone, Copy, Debug, Default)]
pub struct LifecycleEngine;

impl LifecycleEngine {
    /// Decide whether `principal` may apply `command` to `request`.
    ///
    /// Role and ownership violations are reported before status violations,
    /// except for a claim on an already-assigned request, which reports
    /// [`CareError::RequestAlreadyClaimed`].
    ///
    /// # Errors
    ///
    /// - [`CareError::NotAuthorized`]: wrong role, not the owner, or not the
    ///   assigned provider
    /// - [`CareError::RequestAlreadyClaimed`]: claim on an assigned request
    /// - [`CareError::PreconditionFailed`]: the current status does not permit
    ///   the command
    pub fn decide(
        request: &CareRequest,
        principal: &Principal,
        command: LifecycleCommand,
        clock: &dyn Clock,
    ) -> Result<Transition, CareError> {
        let operation = command.name();
        let at = clock.now().max(request.created_at);

        let (guard, change) = match command {
            LifecycleCommand::Claim => {
                let provider = principal.require_provider()?;
                if request.provider_id.is_some() {
                    return Err(CareError::RequestAlreadyClaimed(request.id));
                }
                require_status(request, operation, &CareRequestStatus::UNCLAIMED)?;

                let mut change = Change::to_status(CareRequestStatus::Matched, at);
                change.provider_id = FieldChange::Set(provider);
                change.matched_at = FieldChange::Set(at);
                let guard = Guard {
                    from: &CareRequestStatus::UNCLAIMED,
                    provider: ProviderGuard::Unassigned,
                    patient: None,
                };
                (guard, change)
            }
            LifecycleCommand::Advance {
                operation: step,
                provider_notes,
            } => {
                let provider = principal.require_provider()?;
                match request.provider_id {
                    Some(assigned) if assigned != provider => {
                        return Err(CareError::not_authorized(format!(
                            "Care request {} is assigned to another provider",
                            request.id
                        )));
                    }
                    Some(_) => require_status(request, operation, step.source())?,
                    None => {
                        require_status(request, operation, step.source())?;
                        return Err(CareError::not_authorized(format!(
                            "Care request {} has no assigned provider",
                            request.id
                        )));
                    }
                }

                let mut change = Change::to_status(step.target(), at);
                match step {
                    AdvanceOperation::MarkArrived => {
                        change.arrived_at = FieldChange::Set(at);
                    }
                    AdvanceOperation::Complete => {
                        change.completed_at = FieldChange::Set(at);
                        if let Some(notes) = provider_notes {
                            change.provider_notes = FieldChange::Set(notes);
                        }
                    }
                    AdvanceOperation::StartEnRoute | AdvanceOperation::StartVisit => {}
                }
                let guard = Guard {
                    from: step.source(),
                    provider: ProviderGuard::AssignedTo(provider),
                    patient: None,
                };
                (guard, change)
            }
            LifecycleCommand::Cancel { reason } => {
                let (cancelled_by, owner) = match principal.role {
                    Role::Patient => {
                        let patient = principal.require_patient()?;
                        if patient != request.patient_id {
                            return Err(CareError::not_authorized(format!(
                                "Care request {} belongs to another patient",
                                request.id
                            )));
                        }
                        (CancelledBy::Patient, Some(patient))
                    }
                    Role::Admin => (CancelledBy::Admin, None),
                    Role::Provider => {
                        return Err(CareError::not_authorized(
                            "Providers cannot cancel care requests",
                        ));
                    }
                };
                require_status(request, operation, &CareRequestStatus::CANCELLABLE)?;

                let mut change = Change::to_status(CareRequestStatus::Cancelled, at);
                change.provider_id = FieldChange::Clear;
                change.cancelled_at = FieldChange::Set(at);
                change.cancellation = FieldChange::Set(Cancellation {
                    cancelled_by,
                    reason: reason.filter(|text| !text.trim().is_empty()),
                });
                let guard = Guard {
                    from: &CareRequestStatus::CANCELLABLE,
                    provider: ProviderGuard::Any,
                    patient: owner,
                };
                (guard, change)
            }
            LifecycleCommand::Reassign { provider_id } => {
                principal.require_admin()?;
                require_status(request, operation, &CareRequestStatus::NON_TERMINAL)?;

                let mut change = Change::to_status(CareRequestStatus::Matched, at);
                change.provider_id = FieldChange::Set(provider_id);
                change.matched_at = FieldChange::Set(at);
                // The visit restarts from matched for the new provider.
                change.arrived_at = FieldChange::Clear;
                let guard = Guard {
                    from: &CareRequestStatus::NON_TERMINAL,
                    provider: ProviderGuard::Any,
                    patient: None,
                };
                (guard, change)
            }
        };

        Ok(Transition {
            request_id: request.id,
            operation,
            guard,
            change,
        })
    }

    /// Build a new request from a patient's submission.
    ///
    /// The request is created `pending` and immediately advanced to
    /// `searching`; it is persisted in the latter state.
    ///
    /// # Arguments
    ///
    /// * `principal` - Must be a patient
    /// * `input` - The submission
    /// * `service_type` - Catalog entry for `input.service_type_id`
    /// * `catalog` - Catalog symptoms referenced by the submission
    /// * `additional_patient_fee` - Fee per case patient beyond the first
    /// * `clock` - Source of `created_at`
    ///
    /// # Errors
    ///
    /// - [`CareError::NotAuthorized`]: the principal is not a patient
    /// - [`CareError::ValidationFailed`]: malformed input, inactive service
    ///   type or unknown symptom id
    pub fn submit(
        principal: &Principal,
        input: NewCareRequest,
        service_type: ServiceType,
        catalog: &[Symptom],
        additional_patient_fee: Money,
        clock: &dyn Clock,
    ) -> Result<CareRequest, CareError> {
        let patient_id = principal.require_patient()?;
        input.validate()?;

        if service_type.id != input.service_type_id {
            return Err(CareError::validation(format!(
                "Service type {} does not match the submission",
                service_type.id
            )));
        }
        if !service_type.is_active {
            return Err(CareError::validation(format!(
                "Service type {} is not available",
                service_type.name
            )));
        }

        let symptoms: HashMap<SymptomId, &Symptom> =
            catalog.iter().map(|symptom| (symptom.id, symptom)).collect();
        let case_patients = input
            .case_patients
            .into_iter()
            .map(|draft| build_case_patient(draft, &symptoms))
            .collect::<Result<Vec<_>, _>>()?;

        let pricing = Pricing::quote(
            service_type.base_price,
            case_patients.len(),
            additional_patient_fee,
            input.donation_amount,
            Money::ZERO,
        )?;

        let now = clock.now();
        let mut request = CareRequest {
            id: CareRequestId::new(),
            patient_id,
            provider_id: None,
            service_type,
            status: CareRequestStatus::Pending,
            location: input.location,
            pricing,
            patient_notes: input.patient_notes.filter(|text| !text.trim().is_empty()),
            provider_notes: None,
            cancellation: None,
            created_at: now,
            matched_at: None,
            arrived_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: now,
            version: Version::INITIAL,
            case_patients,
        };
        begin_search(&mut request);
        Ok(request)
    }

    /// Whether `principal` may read (or subscribe to) `request`.
    ///
    /// Visible to the owning patient, the assigned provider, any provider
    /// while the request is unclaimed, and admins.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::NotAuthorized`] otherwise.
    pub fn authorize_view(request: &CareRequest, principal: &Principal) -> Result<(), CareError> {
        let allowed = match principal.role {
            Role::Admin => true,
            Role::Patient => principal.as_patient() == Some(request.patient_id),
            Role::Provider => {
                request.is_unclaimed()
                    || (request.provider_id.is_some()
                        && principal.as_provider() == request.provider_id)
            }
        };
        if allowed {
            Ok(())
        } else {
            Err(CareError::not_authorized(format!(
                "Care request {} is not visible to this {}",
                request.id, principal.role
            )))
        }
    }
}

/// pending → searching, applied before the first write.
fn begin_search(request: &mut CareRequest) {
    if request.status == CareRequestStatus::Pending {
        request.status = CareRequestStatus::Searching;
    }
}

fn require_status(
    request: &CareRequest,
    operation: &'static str,
    allowed: &[CareRequestStatus],
) -> Result<(), CareError> {
    if allowed.contains(&request.status) {
        Ok(())
    } else {
        Err(CareError::PreconditionFailed {
            request_id: request.id,
            operation,
            status: request.status,
        })
    }
}

fn build_case_patient(
    draft: NewCasePatient,
    catalog: &HashMap<SymptomId, &Symptom>,
) -> Result<CasePatient, CareError> {
    let symptoms = draft
        .symptoms
        .into_iter()
        .map(|entry| {
            let symptom = match (entry.symptom_id, entry.custom_symptom) {
                (Some(id), _) => SymptomKind::Catalog(
                    catalog
                        .get(&id)
                        .map(|symptom| (*symptom).clone())
                        .ok_or_else(|| CareError::validation(format!("Unknown symptom {id}")))?,
                ),
                (None, Some(text)) => SymptomKind::Custom(text.trim().to_string()),
                (None, None) => {
                    return Err(CareError::validation(
                        "A symptom needs a catalog id or custom text",
                    ));
                }
            };
            Ok(CaseSymptom {
                id: CaseSymptomId::new(),
                symptom,
                severity: Severity::new(entry.severity)?,
                duration: entry.duration,
                notes: entry.notes,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CasePatient {
        id: CasePatientId::new(),
        name: draft.name.trim().to_string(),
        relationship: draft.relationship.trim().to_string(),
        date_of_birth: draft.date_of_birth,
        gender: draft.gender,
        notes: draft.notes,
        symptoms,
    })
}
