//! Money arithmetic and request quotes.
//!
//! Prices are computed once at submission and persisted; stores never
//! recompute them. All arithmetic is checked so an overflowing input is a
//! validation failure rather than a wrapped total.

use crate::error::CareError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Largest amount a request may carry (the range of a signed 64-bit
    /// cents column).
    pub const MAX: Self = Self(0x7FFF_FFFF_FFFF_FFFF);

    /// Creates a `Money` value from cents.
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents.
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts two money amounts (returns None if result would be negative).
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies by a count with overflow checking.
    #[must_use]
    pub const fn checked_multiply(self, factor: u64) -> Option<Self> {
        match self.0.checked_mul(factor) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Fee charged for every case patient beyond the first.
pub const DEFAULT_ADDITIONAL_PATIENT_FEE: Money = Money::from_cents(5_000);

/// Persisted price breakdown of a care request.
///
/// `total_price = base_price + additional_fees + donation_amount` and
/// `patient_responsibility = total_price - insurance_coverage` hold for every
/// value produced by [`Pricing::quote`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    /// Base price of the requested service type.
    pub base_price: Money,
    /// Fees for additional case patients.
    pub additional_fees: Money,
    /// Voluntary donation added by the patient.
    pub donation_amount: Money,
    /// Sum of base price, fees and donation.
    pub total_price: Money,
    /// Portion covered by insurance.
    pub insurance_coverage: Money,
    /// What the patient owes.
    pub patient_responsibility: Money,
}

impl Pricing {
    /// Quote a request.
    ///
    /// # Arguments
    ///
    /// * `base_price` - Base price of the service type
    /// * `case_patients` - Number of case patients (at least one)
    /// * `additional_patient_fee` - Fee per case patient beyond the first
    /// * `donation` - Voluntary donation
    /// * `insurance_coverage` - Covered amount, at most the total
    ///
    /// # Errors
    ///
    /// Returns [`CareError::ValidationFailed`] when there are no case patients,
    /// the total exceeds [`Money::MAX`], or coverage exceeds the total.
    pub fn quote(
        base_price: Money,
        case_patients: usize,
        additional_patient_fee: Money,
        donation: Money,
        insurance_coverage: Money,
    ) -> Result<Self, CareError> {
        if case_patients == 0 {
            return Err(CareError::validation("At least one case patient is required"));
        }

        let extra_patients = u64::try_from(case_patients - 1)
            .map_err(|_| CareError::validation("Too many case patients"))?;
        let additional_fees = additional_patient_fee
            .checked_multiply(extra_patients)
            .ok_or_else(|| CareError::validation("Additional fees overflow"))?;
        let total_price = base_price
            .checked_add(additional_fees)
            .and_then(|subtotal| subtotal.checked_add(donation))
            .filter(|total| *total <= Money::MAX)
            .ok_or_else(|| CareError::validation(format!("Total price exceeds {}", Money::MAX)))?;
        let patient_responsibility = total_price.checked_sub(insurance_coverage).ok_or_else(|| {
            CareError::validation(format!(
                "Insurance coverage {insurance_coverage} exceeds total {total_price}"
            ))
        })?;

        Ok(Self {
            base_price,
            additional_fees,
            donation_amount: donation,
            total_price,
            insurance_coverage,
            patient_responsibility,
        })
    }

    /// Whether the persisted totals are consistent with their components.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let total = self
            .base_price
            .checked_add(self.additional_fees)
            .and_then(|subtotal| subtotal.checked_add(self.donation_amount));
        total == Some(self.total_price)
            && self.total_price.checked_sub(self.insurance_coverage)
                == Some(self.patient_responsibility)
    }
}
