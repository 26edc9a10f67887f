//! Strongly typed identifiers and the per-request write version.
//!
//! Every entity is keyed by a UUID wrapped in its own newtype so a
//! `PatientId` can never be passed where a `ProviderId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a care request.
    CareRequestId
);
define_id!(
    /// Identifier of the patient account that submitted a request.
    PatientId
);
define_id!(
    /// Identifier of a provider account.
    ProviderId
);
define_id!(
    /// Identifier of an admin account.
    AdminId
);
define_id!(
    /// Identifier of a service-type catalog entry.
    ServiceTypeId
);
define_id!(
    /// Identifier of a symptom catalog entry.
    SymptomId
);
define_id!(
    /// Identifier of a case patient within a request.
    CasePatientId
);
define_id!(
    /// Identifier of a recorded case-patient symptom.
    CaseSymptomId
);

/// Server-assigned write sequence of a care request.
///
/// A request is created at [`Version::INITIAL`] and every accepted write
/// increments it by exactly one. Observers compare versions to apply
/// last-write-wins regardless of delivery order.
///
/// # Examples
///
/// ```
/// use curare_core::ids::Version;
///
/// let v1 = Version::INITIAL;
/// assert_eq!(v1.next(), Version::new(2));
/// assert!(v1.next() > v1);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// The version of a freshly submitted request.
    pub const INITIAL: Self = Self(1);

    /// Create a `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_strings() {
        let id = CareRequestId::new();
        let parsed: CareRequestId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn ids_reject_garbage() {
        assert!("not-a-uuid".parse::<ProviderId>().is_err());
    }

    #[test]
    fn ids_serialize_transparently() {
        let uuid = Uuid::new_v4();
        let id = PatientId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{uuid}\""));
    }

    #[test]
    fn version_increments_by_one() {
        assert_eq!(Version::INITIAL.value(), 1);
        assert_eq!(Version::new(41).next().value(), 42);
        assert_eq!(Version::new(u64::MAX).next().value(), u64::MAX);
    }
}
