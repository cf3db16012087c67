//! Plan catalog
//!
//! The server-side authoritative table of plan pricing and entitlement
//! ceilings. Charge amounts are only ever computed here; a price-like field
//! in a request body has no path into a payment record.

use medsight_shared::PlanId;
use serde::Serialize;

/// USD-to-NGN conversion applied at charge time. The gateway settles in
/// kobo, so the final amount is `price_usd * NGN_RATE * 100`.
pub const NGN_RATE: i64 = 1_500;

/// Minor units per major currency unit (kobo per naira).
pub const MINOR_PER_MAJOR: i64 = 100;

/// Billing cycle for purchased plans.
pub const PAID_CYCLE_DAYS: i64 = 30;

/// Validity of the elevated master tier, effectively unlimited.
pub const ELEVATED_DAYS: i64 = 36_500;

/// Boolean capabilities granted by a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub analytics: bool,
    pub recommendations: bool,
    pub reports: bool,
    pub api_access: bool,
    pub priority_support: bool,
}

/// A single entry in the plan catalog. Immutable at runtime.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PlanDefinition {
    pub plan: PlanId,
    /// Monthly price in USD major units. Authoritative; never accepted from
    /// a client.
    pub price_usd: i64,
    pub max_patients: i32,
    pub max_users: i32,
    pub features: FeatureFlags,
}

const STARTER: PlanDefinition = PlanDefinition {
    plan: PlanId::Starter,
    price_usd: 500,
    max_patients: 500,
    max_users: 5,
    features: FeatureFlags {
        analytics: true,
        recommendations: false,
        reports: true,
        api_access: false,
        priority_support: false,
    },
};

const GROWTH: PlanDefinition = PlanDefinition {
    plan: PlanId::Growth,
    price_usd: 1_200,
    max_patients: 2_000,
    max_users: 20,
    features: FeatureFlags {
        analytics: true,
        recommendations: true,
        reports: true,
        api_access: true,
        priority_support: false,
    },
};

const ENTERPRISE: PlanDefinition = PlanDefinition {
    plan: PlanId::Enterprise,
    price_usd: 3_500,
    max_patients: 10_000,
    max_users: 100,
    features: FeatureFlags {
        analytics: true,
        recommendations: true,
        reports: true,
        api_access: true,
        priority_support: true,
    },
};

const MASTER: PlanDefinition = PlanDefinition {
    plan: PlanId::Master,
    price_usd: 0,
    max_patients: i32::MAX,
    max_users: i32::MAX,
    features: FeatureFlags {
        analytics: true,
        recommendations: true,
        reports: true,
        api_access: true,
        priority_support: true,
    },
};

impl PlanDefinition {
    /// Look up the single definition for a plan id.
    pub fn for_plan(plan: PlanId) -> &'static PlanDefinition {
        match plan {
            PlanId::Starter => &STARTER,
            PlanId::Growth => &GROWTH,
            PlanId::Enterprise => &ENTERPRISE,
            PlanId::Master => &MASTER,
        }
    }

    /// Charge amount in minor units (kobo), computed server-side.
    pub fn amount_minor(&self) -> i64 {
        self.price_usd * NGN_RATE * MINOR_PER_MAJOR
    }

    /// Displayed monthly price in minor units.
    pub fn price_monthly_minor(&self) -> i64 {
        self.amount_minor()
    }
}
