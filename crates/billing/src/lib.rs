// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! MedSight Billing Module
//!
//! Handles the payment gateway integration for hospital subscriptions.
//!
//! ## Features
//!
//! - **Plan Catalog**: Server-side authoritative pricing and entitlement ceilings
//! - **Payments**: Initialize gateway charges, verify them, keep the ledger
//! - **Webhooks**: HMAC-verified gateway deliveries, idempotent confirmation
//! - **Entitlement**: One subscription row per hospital, recomputed on every change
//! - **Elevation**: Guarded master-tier grant for hospital admins
//! - **Demo Requests**: Rate-limited intake from the marketing site

pub mod demo;
pub mod elevation;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod gateway;
pub mod payments;
pub mod plans;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Error
pub use error::{BillingError, BillingResult};

// Plans
pub use plans::{FeatureFlags, PlanDefinition, NGN_RATE, PAID_CYCLE_DAYS};

// Gateway
pub use gateway::{
    GatewayClient, GatewayConfig, GatewayTransaction, GatewayTxStatus, InitializeTransaction,
    TransactionHandle, TransactionMetadata,
};

// Payments
pub use payments::{
    CheckoutSession, Payment, PaymentService, PaymentStatus, VerifyOutcome, CURRENCY,
};

// Webhooks
pub use webhooks::{WebhookDisposition, WebhookEnvelope, WebhookService, SIGNATURE_HEADER};

// Entitlement
pub use entitlement::{EntitlementService, PlanChangeSource, Subscription};

// Elevation
pub use elevation::{ElevationOutcome, ElevationService};

// Events
pub use events::{BillingEvent, BillingEventLogger, BillingEventType};

// Demo requests
pub use demo::{DemoRequest, DemoRequestService};

use medsight_shared::RateLimiter;
use sqlx::PgPool;

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub payments: PaymentService,
    pub webhooks: WebhookService,
    pub entitlement: EntitlementService,
    pub elevation: ElevationService,
    pub demo: DemoRequestService,
    pub events: BillingEventLogger,
    pub rate_limiter: RateLimiter,
}

impl BillingService {
    /// Create a new billing service from environment variables.
    pub async fn from_env(pool: PgPool) -> BillingResult<Self> {
        let gateway = GatewayClient::from_env()?;
        let elevation_secret = std::env::var("ELEVATION_SECRET")
            .map_err(|_| BillingError::Internal("ELEVATION_SECRET not set".to_string()))?;

        let rate_limiter = match std::env::var("RATE_LIMIT_REDIS_URL") {
            Ok(url) => RateLimiter::new_redis(&url)
                .await
                .map_err(|e| BillingError::Internal(format!("rate limit backend: {}", e)))?,
            Err(_) => RateLimiter::new_in_memory(),
        };

        Ok(Self::new(gateway, elevation_secret, rate_limiter, pool))
    }

    /// Create a new billing service with explicit config.
    pub fn new(
        gateway: GatewayClient,
        elevation_secret: String,
        rate_limiter: RateLimiter,
        pool: PgPool,
    ) -> Self {
        let webhook_secret = gateway.config().webhook_secret.clone();
        let payments = PaymentService::new(pool.clone(), gateway);
        let events = BillingEventLogger::new(pool.clone());

        Self {
            webhooks: WebhookService::new(payments.clone(), events.clone(), webhook_secret),
            entitlement: EntitlementService::new(pool.clone()),
            elevation: ElevationService::new(pool.clone(), rate_limiter.clone(), elevation_secret),
            demo: DemoRequestService::new(pool, rate_limiter.clone()),
            events,
            rate_limiter,
            payments,
        }
    }
}
