//! The authenticated caller.
//!
//! Authentication happens in front of this crate: an identity provider
//! supplies a principal id and a role claim, and the core trusts that id as
//! the `patient_id` / `provider_id` used for ownership checks.

use crate::error::CareError;
use crate::ids::{AdminId, PatientId, ProviderId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Role claim carried by a principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Requests care for themselves or dependants.
    Patient,
    /// Claims and performs visits.
    Provider,
    /// Operates the platform.
    Admin,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Provider => "provider",
            Self::Admin => "admin",
        }
    }

    /// Parse a role from its string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Some(Self::Patient),
            "provider" => Some(Self::Provider),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated principal: user id plus role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Account id issued by the identity provider.
    pub user_id: Uuid,
    /// Role claim.
    pub role: Role,
}

impl Principal {
    /// Create a principal.
    #[must_use]
    pub const fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Create a patient principal.
    #[must_use]
    pub const fn patient(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Patient)
    }

    /// Create a provider principal.
    #[must_use]
    pub const fn provider(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Provider)
    }

    /// Create an admin principal.
    #[must_use]
    pub const fn admin(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Admin)
    }

    /// Reject calls that arrive without a principal.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::NotAuthenticated`] when `principal` is `None`.
    pub fn require(principal: Option<&Self>) -> Result<&Self, CareError> {
        principal.ok_or(CareError::NotAuthenticated)
    }

    /// The principal as a patient, if it carries the patient role.
    #[must_use]
    pub const fn as_patient(&self) -> Option<PatientId> {
        match self.role {
            Role::Patient => Some(PatientId::from_uuid(self.user_id)),
            Role::Provider | Role::Admin => None,
        }
    }

    /// The principal as a provider, if it carries the provider role.
    #[must_use]
    pub const fn as_provider(&self) -> Option<ProviderId> {
        match self.role {
            Role::Provider => Some(ProviderId::from_uuid(self.user_id)),
            Role::Patient | Role::Admin => None,
        }
    }

    /// The principal as an admin, if it carries the admin role.
    #[must_use]
    pub const fn as_admin(&self) -> Option<AdminId> {
        match self.role {
            Role::Admin => Some(AdminId::from_uuid(self.user_id)),
            Role::Patient | Role::Provider => None,
        }
    }

    /// Require the patient role.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::NotAuthorized`] for any other role.
    pub fn require_patient(&self) -> Result<PatientId, CareError> {
        self.as_patient()
            .ok_or_else(|| CareError::not_authorized(format!("{} cannot act as a patient", self.role)))
    }

    /// Require the provider role.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::NotAuthorized`] for any other role.
    pub fn require_provider(&self) -> Result<ProviderId, CareError> {
        self.as_provider()
            .ok_or_else(|| CareError::not_authorized(format!("{} cannot act as a provider", self.role)))
    }

    /// Require the admin role.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::NotAuthorized`] for any other role.
    pub fn require_admin(&self) -> Result<AdminId, CareError> {
        self.as_admin()
            .ok_or_else(|| CareError::not_authorized(format!("{} cannot act as an admin", self.role)))
    }
}
