//! The care-request aggregate, its nested entities and catalog entries.

use crate::error::CareError;
use crate::ids::{
    CareRequestId, CasePatientId, CaseSymptomId, PatientId, ProviderId, ServiceTypeId, SymptomId,
    Version,
};
use crate::pricing::{Money, Pricing};
use crate::urgency::{self, Urgency};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of case patients in one submission.
pub const MAX_CASE_PATIENTS: usize = 10;

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a care request.
///
/// Terminal states are `Completed` and `Cancelled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CareRequestStatus {
    /// Created, not yet visible to providers.
    Pending,
    /// Visible to providers, waiting for a claim.
    Searching,
    /// Claimed by (or assigned to) a provider.
    Matched,
    /// Provider is travelling to the patient.
    EnRoute,
    /// Provider is on site.
    Arrived,
    /// Visit underway.
    InProgress,
    /// Visit finished.
    Completed,
    /// Cancelled by the patient or an admin.
    Cancelled,
}

impl CareRequestStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::Pending,
        Self::Searching,
        Self::Matched,
        Self::EnRoute,
        Self::Arrived,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Statuses from which some transition is still possible.
    pub const NON_TERMINAL: [Self; 6] = [
        Self::Pending,
        Self::Searching,
        Self::Matched,
        Self::EnRoute,
        Self::Arrived,
        Self::InProgress,
    ];

    /// Statuses in which a request waits for a provider.
    pub const UNCLAIMED: [Self; 2] = [Self::Pending, Self::Searching];

    /// Statuses in which a provider is working the request.
    pub const ACTIVE: [Self; 4] = [Self::Matched, Self::EnRoute, Self::Arrived, Self::InProgress];

    /// Statuses from which a request may be cancelled.
    pub const CANCELLABLE: [Self; 3] = [Self::Pending, Self::Searching, Self::Matched];

    /// Get the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Searching => "searching",
            Self::Matched => "matched",
            Self::EnRoute => "en_route",
            Self::Arrived => "arrived",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a status from its string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Whether no further transition is permitted.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        match self {
            Self::Completed | Self::Cancelled => true,
            Self::Pending
            | Self::Searching
            | Self::Matched
            | Self::EnRoute
            | Self::Arrived
            | Self::InProgress => false,
        }
    }

    /// Whether the request is waiting for a provider.
    #[must_use]
    pub const fn is_unclaimed(&self) -> bool {
        matches!(self, Self::Pending | Self::Searching)
    }

    /// Whether a provider must be assigned in this status.
    #[must_use]
    pub const fn requires_provider(&self) -> bool {
        match self {
            Self::Matched | Self::EnRoute | Self::Arrived | Self::InProgress | Self::Completed => {
                true
            }
            Self::Pending | Self::Searching | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for CareRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Location
// ============================================================================

/// Where the visit takes place. Immutable once submitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Street address.
    pub address_line1: String,
    /// Apartment, suite, etc.
    #[serde(default)]
    pub address_line2: Option<String>,
    /// City.
    pub city: String,
    /// State or region.
    pub state: String,
    /// Postal code.
    pub zip_code: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Location {
    /// Validate required fields and coordinate ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::ValidationFailed`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), CareError> {
        for (field, value) in [
            ("address_line1", &self.address_line1),
            ("city", &self.city),
            ("state", &self.state),
            ("zip_code", &self.zip_code),
        ] {
            if value.trim().is_empty() {
                return Err(CareError::validation(format!("Location {field} is required")));
            }
        }
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(CareError::validation(format!(
                "Latitude {} is out of range",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(CareError::validation(format!(
                "Longitude {} is out of range",
                self.longitude
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// A bookable service (read-only catalog entry).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceType {
    /// Identifier.
    pub id: ServiceTypeId,
    /// Display name.
    pub name: String,
    /// Longer description.
    pub description: Option<String>,
    /// Price before additional-patient fees and donations.
    pub base_price: Money,
    /// Expected visit length.
    pub duration_minutes: u32,
    /// Only active service types can be requested.
    pub is_active: bool,
}

/// A catalog symptom (read-only).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symptom {
    /// Identifier.
    pub id: SymptomId,
    /// Display name.
    pub name: String,
    /// Grouping such as "respiratory".
    pub category: Option<String>,
    /// Forces a high urgency classification.
    pub requires_immediate_care: bool,
}

// ============================================================================
// Case patients
// ============================================================================

/// Symptom severity on a 1 to 10 scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Severity(u8);

impl Severity {
    /// Lowest severity.
    pub const MIN: u8 = 1;
    /// Highest severity.
    pub const MAX: u8 = 10;

    /// Create a severity.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::ValidationFailed`] outside `1..=10`.
    pub fn new(value: u8) -> Result<Self, CareError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CareError::validation(format!(
                "Severity {value} is outside {}..={}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    /// The numeric value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Severity {
    type Error = CareError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> Self {
        severity.0
    }
}

/// What a recorded symptom refers to: a catalog entry or free text, never both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SymptomKind {
    /// A catalog symptom, hydrated on read.
    Catalog(Symptom),
    /// A symptom described by the patient.
    Custom(String),
}

impl SymptomKind {
    /// Display name of the symptom.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Catalog(symptom) => &symptom.name,
            Self::Custom(text) => text,
        }
    }

    /// Whether the catalog flags this symptom for immediate care.
    #[must_use]
    pub const fn requires_immediate_care(&self) -> bool {
        match self {
            Self::Catalog(symptom) => symptom.requires_immediate_care,
            Self::Custom(_) => false,
        }
    }
}

/// A symptom recorded for a case patient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSymptom {
    /// Identifier.
    pub id: CaseSymptomId,
    /// Catalog entry or custom text.
    pub symptom: SymptomKind,
    /// Severity 1 to 10.
    pub severity: Severity,
    /// How long the symptom has lasted, as described by the patient.
    pub duration: Option<String>,
    /// Free-text notes.
    pub notes: Option<String>,
}

/// A person receiving care under a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasePatient {
    /// Identifier.
    pub id: CasePatientId,
    /// Full name.
    pub name: String,
    /// Relationship to the requesting account holder ("self", "child", ...).
    pub relationship: String,
    /// Date of birth.
    pub date_of_birth: Option<NaiveDate>,
    /// Gender.
    pub gender: Option<String>,
    /// Free-text notes.
    pub notes: Option<String>,
    /// At least one symptom.
    pub symptoms: Vec<CaseSymptom>,
}

impl CasePatient {
    /// Urgency of this case patient alone.
    #[must_use]
    pub fn urgency(&self) -> Urgency {
        urgency::classify_case_patient(&self.symptoms)
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// Who cancelled a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    /// The requesting patient.
    Patient,
    /// A platform admin.
    Admin,
}

impl CancelledBy {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Admin => "admin",
        }
    }

    /// Parse from the string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "patient" => Some(Self::Patient),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Why and by whom a request was cancelled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    /// Patient and admin cancellations are tagged distinctly.
    pub cancelled_by: CancelledBy,
    /// Optional free-text reason.
    pub reason: Option<String>,
}

/// The care-request aggregate, fully hydrated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CareRequest {
    /// Identifier.
    pub id: CareRequestId,
    /// Requesting patient. Immutable.
    pub patient_id: PatientId,
    /// Assigned provider; set iff the status requires one.
    pub provider_id: Option<ProviderId>,
    /// Requested service.
    pub service_type: ServiceType,
    /// Lifecycle status.
    pub status: CareRequestStatus,
    /// Visit location. Immutable.
    pub location: Location,
    /// Price breakdown computed at submission.
    pub pricing: Pricing,
    /// Notes written by the patient.
    pub patient_notes: Option<String>,
    /// Notes written by the provider on completion.
    pub provider_notes: Option<String>,
    /// Set when cancelled.
    pub cancellation: Option<Cancellation>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Time of the most recent claim or assignment.
    pub matched_at: Option<DateTime<Utc>>,
    /// Time the provider arrived.
    pub arrived_at: Option<DateTime<Utc>>,
    /// Time the visit completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Time the request was cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Time of the last accepted write.
    pub updated_at: DateTime<Utc>,
    /// Server-assigned write sequence.
    pub version: Version,
    /// People receiving care.
    pub case_patients: Vec<CasePatient>,
}

impl CareRequest {
    /// Derived urgency: the highest urgency among the case patients.
    #[must_use]
    pub fn urgency(&self) -> Urgency {
        urgency::classify(&self.case_patients)
    }

    /// Whether the request is waiting for a provider.
    #[must_use]
    pub const fn is_unclaimed(&self) -> bool {
        self.status.is_unclaimed() && self.provider_id.is_none()
    }

    /// Check the aggregate invariants, describing the first violation.
    ///
    /// # Errors
    ///
    /// Returns a description of the violated invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.status.requires_provider() != self.provider_id.is_some() {
            return Err(format!(
                "provider_id is {} in status {}",
                if self.provider_id.is_some() { "set" } else { "unset" },
                self.status
            ));
        }
        match self.status {
            CareRequestStatus::Completed => {
                if self.completed_at.is_none() || self.cancelled_at.is_some() {
                    return Err("completed request must carry only completed_at".to_string());
                }
            }
            CareRequestStatus::Cancelled => {
                if self.cancelled_at.is_none() || self.completed_at.is_some() {
                    return Err("cancelled request must carry only cancelled_at".to_string());
                }
            }
            CareRequestStatus::Pending
            | CareRequestStatus::Searching
            | CareRequestStatus::Matched
            | CareRequestStatus::EnRoute
            | CareRequestStatus::Arrived
            | CareRequestStatus::InProgress => {
                if self.completed_at.is_some() || self.cancelled_at.is_some() {
                    return Err(format!("terminal timestamp set in status {}", self.status));
                }
            }
        }
        let timestamps = [
            self.matched_at,
            self.arrived_at,
            self.completed_at,
            self.cancelled_at,
        ];
        if timestamps.into_iter().flatten().any(|at| at < self.created_at) {
            return Err("transition timestamp precedes created_at".to_string());
        }
        if !self.pricing.is_consistent() {
            return Err("pricing totals are inconsistent".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Submission input
// ============================================================================

/// A symptom as submitted by the patient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCaseSymptom {
    /// Catalog symptom, mutually exclusive with `custom_symptom`.
    #[serde(default)]
    pub symptom_id: Option<SymptomId>,
    /// Free-text symptom, mutually exclusive with `symptom_id`.
    #[serde(default)]
    pub custom_symptom: Option<String>,
    /// Severity 1 to 10.
    pub severity: u8,
    /// Duration.
    #[serde(default)]
    pub duration: Option<String>,
    /// Notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// A case patient as submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCasePatient {
    /// Full name.
    pub name: String,
    /// Relationship to the requester.
    pub relationship: String,
    /// Date of birth.
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    /// Gender.
    #[serde(default)]
    pub gender: Option<String>,
    /// Notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// At least one symptom.
    pub symptoms: Vec<NewCaseSymptom>,
}

/// Input of `createCareRequest`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewCareRequest {
    /// Requested service.
    pub service_type_id: ServiceTypeId,
    /// Visit location.
    pub location: Location,
    /// At least one case patient.
    pub case_patients: Vec<NewCasePatient>,
    /// Notes from the patient.
    #[serde(default)]
    pub patient_notes: Option<String>,
    /// Voluntary donation.
    #[serde(default)]
    pub donation_amount: Money,
}

impl NewCareRequest {
    /// Validate the structure of the submission.
    ///
    /// Catalog lookups (service type, symptom ids) are checked separately by
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::ValidationFailed`] describing the first problem.
    pub fn validate(&self) -> Result<(), CareError> {
        self.location.validate()?;

        if self.donation_amount > Money::MAX {
            return Err(CareError::validation(format!(
                "Donation may not exceed {}",
                Money::MAX
            )));
        }
        if self.case_patients.is_empty() {
            return Err(CareError::validation("At least one case patient is required"));
        }
        if self.case_patients.len() > MAX_CASE_PATIENTS {
            return Err(CareError::validation(format!(
                "At most {MAX_CASE_PATIENTS} case patients are allowed"
            )));
        }

        for (index, patient) in self.case_patients.iter().enumerate() {
            if patient.name.trim().is_empty() {
                return Err(CareError::validation(format!(
                    "Case patient {index}: name is required"
                )));
            }
            if patient.relationship.trim().is_empty() {
                return Err(CareError::validation(format!(
                    "Case patient {index}: relationship is required"
                )));
            }
            if patient.symptoms.is_empty() {
                return Err(CareError::validation(format!(
                    "Case patient {index}: at least one symptom is required"
                )));
            }
            for symptom in &patient.symptoms {
                Severity::new(symptom.severity)?;
                let custom = symptom
                    .custom_symptom
                    .as_deref()
                    .filter(|text| !text.trim().is_empty());
                match (symptom.symptom_id, custom) {
                    (Some(_), None) | (None, Some(_)) => {}
                    (Some(_), Some(_)) => {
                        return Err(CareError::validation(format!(
                            "Case patient {index}: a symptom cannot be both catalog and custom"
                        )));
                    }
                    (None, None) => {
                        return Err(CareError::validation(format!(
                            "Case patient {index}: a symptom needs a catalog id or custom text"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Catalog symptom ids referenced by the submission, deduplicated.
    #[must_use]
    pub fn symptom_ids(&self) -> Vec<SymptomId> {
        let mut ids: Vec<SymptomId> = self
            .case_patients
            .iter()
            .flat_map(|patient| patient.symptoms.iter().filter_map(|s| s.symptom_id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
