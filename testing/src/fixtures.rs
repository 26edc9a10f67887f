//! Catalog entries and submission builders for tests.
//!
//! Catalog ids are fixed so fixtures line up across crates.

use chrono::{DateTime, TimeZone, Utc};
use curare_core::ids::{ServiceTypeId, SymptomId};
use curare_core::pricing::Money;
use curare_core::types::{
    Location, NewCareRequest, NewCasePatient, NewCaseSymptom, ServiceType, Symptom,
};
use uuid::Uuid;

/// 2025-01-01 00:00:00 UTC.
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Id of [`service_type`].
pub const SERVICE_TYPE_ID: ServiceTypeId =
    ServiceTypeId::from_uuid(Uuid::from_u128(0x5e12_0000_0000_4000_8000_0000_0000_0001));

/// Id of the inactive service type in [`inactive_service_type`].
pub const INACTIVE_SERVICE_TYPE_ID: ServiceTypeId =
    ServiceTypeId::from_uuid(Uuid::from_u128(0x5e12_0000_0000_4000_8000_0000_0000_0002));

/// Id of the "Chest pain" symptom, flagged for immediate care.
pub const CHEST_PAIN_ID: SymptomId =
    SymptomId::from_uuid(Uuid::from_u128(0x5e13_0000_0000_4000_8000_0000_0000_0001));

/// Id of the "Fever" symptom.
pub const FEVER_ID: SymptomId =
    SymptomId::from_uuid(Uuid::from_u128(0x5e13_0000_0000_4000_8000_0000_0000_0002));

/// Id of the "Cough" symptom.
pub const COUGH_ID: SymptomId =
    SymptomId::from_uuid(Uuid::from_u128(0x5e13_0000_0000_4000_8000_0000_0000_0003));

/// Active home-visit service priced at $100.00.
#[must_use]
pub fn service_type() -> ServiceType {
    ServiceType {
        id: SERVICE_TYPE_ID,
        name: "Urgent Care Home Visit".to_string(),
        description: Some("A licensed provider visits you at home".to_string()),
        base_price: Money::from_cents(10_000),
        duration_minutes: 60,
        is_active: true,
    }
}

/// A retired service type.
#[must_use]
pub fn inactive_service_type() -> ServiceType {
    ServiceType {
        id: INACTIVE_SERVICE_TYPE_ID,
        name: "Legacy Telehealth".to_string(),
        description: None,
        base_price: Money::from_cents(4_500),
        duration_minutes: 20,
        is_active: false,
    }
}

/// The symptom catalog used by tests.
#[must_use]
pub fn symptoms() -> Vec<Symptom> {
    vec![
        Symptom {
            id: CHEST_PAIN_ID,
            name: "Chest pain".to_string(),
            category: Some("cardiac".to_string()),
            requires_immediate_care: true,
        },
        Symptom {
            id: FEVER_ID,
            name: "Fever".to_string(),
            category: Some("general".to_string()),
            requires_immediate_care: false,
        },
        Symptom {
            id: COUGH_ID,
            name: "Cough".to_string(),
            category: Some("respiratory".to_string()),
            requires_immediate_care: false,
        },
    ]
}

/// A valid visit location.
#[must_use]
pub fn location() -> Location {
    Location {
        address_line1: "500 Market St".to_string(),
        address_line2: Some("Apt 4".to_string()),
        city: "San Francisco".to_string(),
        state: "CA".to_string(),
        zip_code: "94105".to_string(),
        latitude: 37.79,
        longitude: -122.40,
    }
}

/// A catalog symptom entry.
#[must_use]
pub const fn catalog_symptom(id: SymptomId, severity: u8) -> NewCaseSymptom {
    NewCaseSymptom {
        symptom_id: Some(id),
        custom_symptom: None,
        severity,
        duration: None,
        notes: None,
    }
}

/// A free-text symptom entry.
#[must_use]
pub fn custom_symptom(text: &str, severity: u8) -> NewCaseSymptom {
    NewCaseSymptom {
        symptom_id: None,
        custom_symptom: Some(text.to_string()),
        severity,
        duration: None,
        notes: None,
    }
}

/// Builder for [`NewCareRequest`].
///
/// # Example
///
/// ```
/// use curare_testing::fixtures::{custom_symptom, NewCareRequestBuilder};
///
/// let input = NewCareRequestBuilder::new()
///     .case_patient("Ada", vec![custom_symptom("Headache", 3)])
///     .build();
/// assert_eq!(input.case_patients.len(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct NewCareRequestBuilder {
    request: NewCareRequest,
}

impl NewCareRequestBuilder {
    /// Start from the default service type and location with no case patients.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request: NewCareRequest {
                service_type_id: SERVICE_TYPE_ID,
                location: location(),
                case_patients: Vec::new(),
                patient_notes: None,
                donation_amount: Money::ZERO,
            },
        }
    }

    /// Use another service type.
    #[must_use]
    pub const fn service_type(mut self, id: ServiceTypeId) -> Self {
        self.request.service_type_id = id;
        self
    }

    /// Add a case patient.
    #[must_use]
    pub fn case_patient(mut self, name: &str, symptoms: Vec<NewCaseSymptom>) -> Self {
        self.request.case_patients.push(NewCasePatient {
            name: name.to_string(),
            relationship: if self.request.case_patients.is_empty() {
                "self".to_string()
            } else {
                "family".to_string()
            },
            date_of_birth: None,
            gender: None,
            notes: None,
            symptoms,
        });
        self
    }

    /// Add a donation.
    #[must_use]
    pub const fn donation(mut self, amount: Money) -> Self {
        self.request.donation_amount = amount;
        self
    }

    /// Attach patient notes.
    #[must_use]
    pub fn notes(mut self, notes: &str) -> Self {
        self.request.patient_notes = Some(notes.to_string());
        self
    }

    /// Finish.
    #[must_use]
    pub fn build(self) -> NewCareRequest {
        self.request
    }
}

impl Default for NewCareRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One case patient with a mild fever.
#[must_use]
pub fn simple_request() -> NewCareRequest {
    NewCareRequestBuilder::new()
        .case_patient("Ada Lovelace", vec![catalog_symptom(FEVER_ID, 3)])
        .build()
}
