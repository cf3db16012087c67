//! Master-tier elevation guard
//!
//! A hospital admin holding the out-of-band elevation secret can grant their
//! hospital the unlimited master tier without a gateway charge. The guard
//! checks run in a fixed order: role, then rate limit, then secret. The rate
//! limit is consumed before the secret is examined, so failed guesses burn
//! attempts, and every attempt lands in the audit table regardless of
//! outcome.

use medsight_shared::{PlanId, RateLimiter, Role};
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::entitlement::{EntitlementService, PlanChangeSource, Subscription};
use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, BillingEventLogger, BillingEventType};

/// Outcome recorded for every elevation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationOutcome {
    Success,
    Forbidden,
    RateLimited,
    WrongSecret,
}

impl ElevationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElevationOutcome::Success => "success",
            ElevationOutcome::Forbidden => "forbidden",
            ElevationOutcome::RateLimited => "rate_limited",
            ElevationOutcome::WrongSecret => "wrong_secret",
        }
    }
}

/// Elevation guard and audit trail.
#[derive(Clone)]
pub struct ElevationService {
    pool: PgPool,
    entitlement: EntitlementService,
    events: BillingEventLogger,
    limiter: RateLimiter,
    secret: String,
}

impl ElevationService {
    pub fn new(pool: PgPool, limiter: RateLimiter, secret: String) -> Self {
        let entitlement = EntitlementService::new(pool.clone());
        let events = BillingEventLogger::new(pool.clone());
        Self {
            pool,
            entitlement,
            events,
            limiter,
            secret,
        }
    }

    /// Attempt to elevate a hospital to the master tier.
    pub async fn elevate(
        &self,
        user_id: Uuid,
        hospital_id: Uuid,
        role: Role,
        provided_secret: &str,
    ) -> BillingResult<Subscription> {
        if role != Role::HospitalAdmin {
            self.audit(user_id, Some(hospital_id), ElevationOutcome::Forbidden)
                .await;
            tracing::warn!(
                user_id = %user_id,
                role = ?role,
                "Elevation attempt by non-admin role"
            );
            return Err(BillingError::Forbidden(
                "elevation requires the hospital admin role".to_string(),
            ));
        }

        // Consume an attempt before looking at the secret.
        let window = self.limiter.check_elevation(user_id).await?;
        if !window.allowed {
            let retry_after_seconds = window.retry_after_seconds.unwrap_or(1);
            self.audit(user_id, Some(hospital_id), ElevationOutcome::RateLimited)
                .await;
            tracing::warn!(
                user_id = %user_id,
                retry_after = retry_after_seconds,
                "Elevation attempt rate limited"
            );
            return Err(BillingError::RateLimited {
                retry_after_seconds,
            });
        }

        if !Self::secrets_match(&self.secret, provided_secret) {
            self.audit(user_id, Some(hospital_id), ElevationOutcome::WrongSecret)
                .await;
            self.events
                .log_best_effort(
                    BillingEvent::new(hospital_id, BillingEventType::ElevationDenied)
                        .data(serde_json::json!({"user_id": user_id})),
                )
                .await;
            tracing::warn!(user_id = %user_id, "Elevation attempt with wrong secret");
            return Err(BillingError::Forbidden(
                "invalid elevation secret".to_string(),
            ));
        }

        let subscription = self
            .entitlement
            .apply_plan(hospital_id, PlanId::Master, PlanChangeSource::Elevation)
            .await?;

        self.audit(user_id, Some(hospital_id), ElevationOutcome::Success)
            .await;
        self.events
            .log_best_effort(
                BillingEvent::new(hospital_id, BillingEventType::ElevationGranted)
                    .data(serde_json::json!({"user_id": user_id})),
            )
            .await;

        tracing::info!(
            user_id = %user_id,
            hospital_id = %hospital_id,
            "Elevated hospital to master tier"
        );

        Ok(subscription)
    }

    /// Constant-time secret comparison.
    fn secrets_match(expected: &str, provided: &str) -> bool {
        expected.as_bytes().ct_eq(provided.as_bytes()).into()
    }

    async fn audit(&self, user_id: Uuid, hospital_id: Option<Uuid>, outcome: ElevationOutcome) {
        let result = sqlx::query(
            r#"
            INSERT INTO elevation_audit (user_id, hospital_id, outcome)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(hospital_id)
        .bind(outcome.as_str())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(
                user_id = %user_id,
                outcome = %outcome.as_str(),
                error = %e,
                "Failed to write elevation audit record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::unwrap_used)]
    fn unreachable_service(secret: &str) -> ElevationService {
        let pool = sqlx::PgPool::connect_lazy("postgres://127.0.0.1:1/nowhere").unwrap();
        ElevationService::new(pool, RateLimiter::new_in_memory(), secret.to_string())
    }

    #[tokio::test]
    async fn non_admin_is_rejected_even_with_the_correct_secret() {
        let service = unreachable_service("s3cret");

        for role in [Role::Clinician, Role::Analyst, Role::Viewer] {
            let err = service
                .elevate(Uuid::new_v4(), Uuid::new_v4(), role, "s3cret")
                .await
                .unwrap_err();
            assert!(
                matches!(err, BillingError::Forbidden(_)),
                "{:?} should be forbidden",
                role
            );
        }
    }

    #[test]
    fn matching_secrets_pass() {
        assert!(ElevationService::secrets_match("s3cret", "s3cret"));
    }

    #[test]
    fn mismatched_secrets_fail() {
        assert!(!ElevationService::secrets_match("s3cret", "s3cret "));
        assert!(!ElevationService::secrets_match("s3cret", "S3CRET"));
        assert!(!ElevationService::secrets_match("s3cret", ""));
    }

    #[test]
    fn outcome_strings_match_audit_schema() {
        assert_eq!(ElevationOutcome::Success.as_str(), "success");
        assert_eq!(ElevationOutcome::Forbidden.as_str(), "forbidden");
        assert_eq!(ElevationOutcome::RateLimited.as_str(), "rate_limited");
        assert_eq!(ElevationOutcome::WrongSecret.as_str(), "wrong_secret");
    }
}
