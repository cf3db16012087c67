//! Subscription entitlement state
//!
//! One row per hospital. All plan changes funnel through [`EntitlementService::apply_plan`];
//! nothing else writes the subscriptions table, so ceilings, price, and
//! feature flags are always recomputed together from the plan catalog and can
//! never drift from it.

use medsight_shared::PlanId;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::plans::{ELEVATED_DAYS, PAID_CYCLE_DAYS, PlanDefinition};

/// How a plan came to be applied. Recorded in the billing event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PlanChangeSource {
    /// Synchronous verify confirmed the charge.
    Verify,
    /// Asynchronous webhook confirmed the charge.
    Webhook,
    /// Elevation guard admitted a master-tier grant.
    Elevation,
    /// Worker sweep (expiry, reconcile).
    System,
}

impl PlanChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanChangeSource::Verify => "verify",
            PlanChangeSource::Webhook => "webhook",
            PlanChangeSource::Elevation => "elevation",
            PlanChangeSource::System => "system",
        }
    }
}

impl std::fmt::Display for PlanChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A hospital's current subscription row.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Subscription {
    pub hospital_id: Uuid,
    pub plan: String,
    pub is_active: bool,
    pub max_patients: i32,
    pub max_users: i32,
    pub price_monthly: i64,
    pub feature_flags: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Service owning the subscriptions table.
#[derive(Clone)]
pub struct EntitlementService {
    pool: PgPool,
}

impl EntitlementService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply a plan to a hospital, creating or replacing its subscription
    /// row. Every field is recomputed from the catalog definition; nothing
    /// is carried over from the previous row.
    pub async fn apply_plan(
        &self,
        hospital_id: Uuid,
        plan: PlanId,
        source: PlanChangeSource,
    ) -> BillingResult<Subscription> {
        let def = PlanDefinition::for_plan(plan);
        let now = OffsetDateTime::now_utc();
        let cycle_days = if plan == PlanId::Master {
            ELEVATED_DAYS
        } else {
            PAID_CYCLE_DAYS
        };
        let expires_at = now + Duration::days(cycle_days);
        let feature_flags = serde_json::to_value(def.features)
            .map_err(|e| BillingError::Internal(format!("feature flags: {}", e)))?;

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions
                (hospital_id, plan, is_active, max_patients, max_users,
                 price_monthly, feature_flags, started_at, expires_at, updated_at)
            VALUES ($1, $2, TRUE, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (hospital_id) DO UPDATE SET
                plan = EXCLUDED.plan,
                is_active = TRUE,
                max_patients = EXCLUDED.max_patients,
                max_users = EXCLUDED.max_users,
                price_monthly = EXCLUDED.price_monthly,
                feature_flags = EXCLUDED.feature_flags,
                started_at = EXCLUDED.started_at,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            RETURNING hospital_id, plan, is_active, max_patients, max_users,
                      price_monthly, feature_flags, started_at, expires_at
            "#,
        )
        .bind(hospital_id)
        .bind(plan.as_str())
        .bind(def.max_patients)
        .bind(def.max_users)
        .bind(def.price_monthly_minor())
        .bind(feature_flags)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            hospital_id = %hospital_id,
            plan = %plan,
            source = %source,
            expires_at = %expires_at,
            "Applied subscription plan"
        );

        Ok(subscription)
    }

    /// Fetch a hospital's subscription row, if any.
    pub async fn get_subscription(&self, hospital_id: Uuid) -> BillingResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT hospital_id, plan, is_active, max_patients, max_users,
                   price_monthly, feature_flags, started_at, expires_at
            FROM subscriptions
            WHERE hospital_id = $1
            "#,
        )
        .bind(hospital_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    /// Deactivate every subscription past its expiry. Returns the affected
    /// hospital ids so the sweep can log them.
    pub async fn deactivate_expired(&self) -> BillingResult<Vec<Uuid>> {
        let expired: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET is_active = FALSE, updated_at = NOW()
            WHERE is_active = TRUE AND expires_at < NOW()
            RETURNING hospital_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = expired.into_iter().map(|(id,)| id).collect();
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Deactivated expired subscriptions");
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_change_source_round_trips_as_str() {
        assert_eq!(PlanChangeSource::Verify.as_str(), "verify");
        assert_eq!(PlanChangeSource::Webhook.as_str(), "webhook");
        assert_eq!(PlanChangeSource::Elevation.as_str(), "elevation");
        assert_eq!(PlanChangeSource::System.as_str(), "system");
    }

    #[test]
    fn master_cycle_is_effectively_unlimited() {
        assert!(ELEVATED_DAYS > 365 * 50);
        assert_eq!(PAID_CYCLE_DAYS, 30);
    }
}
