//! Closed enums validated at the system boundary
//!
//! Plan and role identifiers arrive as strings (request bodies, JWT claims,
//! webhook metadata). They are parsed into these enums during deserialization
//! so invalid values are unrepresentable past the input-parsing stage.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Subscription plan identifier.
///
/// `Master` is the elevated support/ops tier: it cannot be purchased through
/// the payment flow and is only reachable via the elevation guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanId {
    Starter,
    Growth,
    Enterprise,
    Master,
}

impl PlanId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Starter => "starter",
            PlanId::Growth => "growth",
            PlanId::Enterprise => "enterprise",
            PlanId::Master => "master",
        }
    }

    /// Whether this plan can be bought through the gateway checkout flow.
    pub fn is_purchasable(&self) -> bool {
        !matches!(self, PlanId::Master)
    }
}

impl FromStr for PlanId {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starter" => Ok(PlanId::Starter),
            "growth" => Ok(PlanId::Growth),
            "enterprise" => Ok(PlanId::Enterprise),
            "master" => Ok(PlanId::Master),
            other => Err(UnknownVariant {
                kind: "plan",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role of a hospital user, carried in the session token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    HospitalAdmin,
    Clinician,
    Analyst,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::HospitalAdmin => "hospital_admin",
            Role::Clinician => "clinician",
            Role::Analyst => "analyst",
            Role::Viewer => "viewer",
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hospital_admin" => Ok(Role::HospitalAdmin),
            "clinician" => Ok(Role::Clinician),
            "analyst" => Ok(Role::Analyst),
            "viewer" => Ok(Role::Viewer),
            other => Err(UnknownVariant {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error for strings that do not name a known enum variant.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
