//! Derived urgency classification.
//!
//! Urgency is never persisted. It is a pure function of the symptom set and
//! is recomputed every time a request is read.
//!
//! Per case patient:
//! - any symptom flagged `requires_immediate_care` in the catalog → `High`
//! - otherwise average severity > 7 → `High`, > 4 → `Medium`, else `Low`
//!
//! A request is as urgent as its most urgent case patient.

use crate::types::{CasePatient, CaseSymptom};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Urgency of a case patient or request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Can wait.
    Low,
    /// Should be seen soon.
    Medium,
    /// Needs attention now.
    High,
}

impl Urgency {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a single case patient from their symptoms.
///
/// A case patient without symptoms cannot be persisted; if one is seen it
/// classifies as `Low`.
#[must_use]
pub fn classify_case_patient(symptoms: &[CaseSymptom]) -> Urgency {
    if symptoms
        .iter()
        .any(|symptom| symptom.symptom.requires_immediate_care())
    {
        return Urgency::High;
    }
    if symptoms.is_empty() {
        return Urgency::Low;
    }

    // Compare sum against threshold * count to stay in integers.
    let total: usize = symptoms
        .iter()
        .map(|symptom| usize::from(symptom.severity.value()))
        .sum();
    let count = symptoms.len();
    if total > 7 * count {
        Urgency::High
    } else if total > 4 * count {
        Urgency::Medium
    } else {
        Urgency::Low
    }
}

/// Classify a request: the highest urgency among its case patients.
#[must_use]
pub fn classify(case_patients: &[CasePatient]) -> Urgency {
    case_patients
        .iter()
        .map(CasePatient::urgency)
        .max()
        .unwrap_or(Urgency::Low)
}
