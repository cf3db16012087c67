//! Demo request intake
//!
//! Unauthenticated endpoint backing the marketing site's "request a demo"
//! form, so it gets its own per-email rate limit to keep the table from
//! filling with junk.

use medsight_shared::RateLimiter;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// A stored demo request.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct DemoRequest {
    pub id: Uuid,
    pub email: String,
    pub hospital_name: String,
    pub message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct DemoRequestService {
    pool: PgPool,
    limiter: RateLimiter,
}

impl DemoRequestService {
    pub fn new(pool: PgPool, limiter: RateLimiter) -> Self {
        Self { pool, limiter }
    }

    pub async fn submit(
        &self,
        email: &str,
        hospital_name: &str,
        message: Option<&str>,
    ) -> BillingResult<DemoRequest> {
        let email = email.trim();
        let hospital_name = hospital_name.trim();
        if !Self::email_looks_valid(email) {
            return Err(BillingError::Validation(format!("invalid email '{}'", email)));
        }
        if hospital_name.is_empty() {
            return Err(BillingError::Validation(
                "hospital name required".to_string(),
            ));
        }

        let window = self.limiter.check_demo_request(email).await?;
        if !window.allowed {
            tracing::warn!(email = %email, "Demo request rate limited");
            return Err(BillingError::RateLimited {
                retry_after_seconds: window.retry_after_seconds.unwrap_or(1),
            });
        }

        let request = sqlx::query_as::<_, DemoRequest>(
            r#"
            INSERT INTO demo_requests (email, hospital_name, message)
            VALUES ($1, $2, $3)
            RETURNING id, email, hospital_name, message, created_at
            "#,
        )
        .bind(email)
        .bind(hospital_name)
        .bind(message)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(email = %email, hospital = %hospital_name, "Recorded demo request");
        Ok(request)
    }

    fn email_looks_valid(email: &str) -> bool {
        // Deliverability is confirmed by the sales follow-up, not here.
        let Some((local, domain)) = email.split_once('@') else {
            return false;
        };
        !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert!(DemoRequestService::email_looks_valid("ops@stfrancis.ng"));
        assert!(DemoRequestService::email_looks_valid("a.b+c@clinic.example.org"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!DemoRequestService::email_looks_valid("not-an-email"));
        assert!(!DemoRequestService::email_looks_valid("@clinic.org"));
        assert!(!DemoRequestService::email_looks_valid("a@nodot"));
        assert!(!DemoRequestService::email_looks_valid("a@.org"));
        assert!(!DemoRequestService::email_looks_valid(""));
    }
}
