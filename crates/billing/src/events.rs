//! Billing event log
//!
//! Append-only trail of billing activity. Logging failures are reported to
//! callers, but callers treat them as non-fatal so a full audit table never
//! blocks a payment.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

/// Event types recorded in the billing event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingEventType {
    PaymentInitialized,
    PaymentSucceeded,
    PaymentFailed,
    PlanApplied,
    SubscriptionExpired,
    WebhookReceived,
    WebhookIgnored,
    ElevationGranted,
    ElevationDenied,
}

impl BillingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventType::PaymentInitialized => "payment.initialized",
            BillingEventType::PaymentSucceeded => "payment.succeeded",
            BillingEventType::PaymentFailed => "payment.failed",
            BillingEventType::PlanApplied => "plan.applied",
            BillingEventType::SubscriptionExpired => "subscription.expired",
            BillingEventType::WebhookReceived => "webhook.received",
            BillingEventType::WebhookIgnored => "webhook.ignored",
            BillingEventType::ElevationGranted => "elevation.granted",
            BillingEventType::ElevationDenied => "elevation.denied",
        }
    }
}

/// Builder for a single billing event.
#[derive(Debug)]
pub struct BillingEvent {
    hospital_id: Uuid,
    event_type: BillingEventType,
    data: serde_json::Value,
    reference: Option<String>,
}

impl BillingEvent {
    pub fn new(hospital_id: Uuid, event_type: BillingEventType) -> Self {
        Self {
            hospital_id,
            event_type,
            data: serde_json::json!({}),
            reference: None,
        }
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn reference(mut self, reference: &str) -> Self {
        self.reference = Some(reference.to_string());
        self
    }
}

/// Writes billing events to the append-only log.
#[derive(Clone)]
pub struct BillingEventLogger {
    pool: PgPool,
}

impl BillingEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log(&self, event: BillingEvent) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_events (hospital_id, event_type, data, reference)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.hospital_id)
        .bind(event.event_type.as_str())
        .bind(&event.data)
        .bind(&event.reference)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Log an event, downgrading failure to a warning. Used on paths where
    /// the audit record must not abort the operation that produced it.
    pub async fn log_best_effort(&self, event: BillingEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.log(event).await {
            tracing::warn!(
                event_type = %event_type.as_str(),
                error = %e,
                "Failed to record billing event"
            );
        }
    }
}
