//! Billing error taxonomy
//!
//! Validation failures are rejected before any external call or mutation.
//! Gateway failures are translated here rather than crashing handlers, and a
//! timeout is kept distinct from other gateway failures so callers can tell
//! "the partner said no" from "the partner never answered".

use medsight_shared::PlanId;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid plan: '{0}'")]
    InvalidPlan(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("plan '{0}' cannot be purchased")]
    PlanNotPurchasable(PlanId),

    #[error("too many attempts, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("payment gateway error: {0}")]
    GatewayError(String),

    #[error("payment gateway timed out")]
    GatewayTimeout,

    #[error("webhook signature invalid")]
    SignatureInvalid,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => BillingError::NotFound("row not found".to_string()),
            other => BillingError::Database(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BillingError::GatewayTimeout
        } else {
            BillingError::GatewayError(e.to_string())
        }
    }
}

impl From<medsight_shared::RateLimitError> for BillingError {
    fn from(e: medsight_shared::RateLimitError) -> Self {
        BillingError::Internal(e.to_string())
    }
}
