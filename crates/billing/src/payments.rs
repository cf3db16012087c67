//! Payment lifecycle
//!
//! Owns the payments ledger: opening a charge against the gateway, the
//! verify path that confirms it, and the conditional finalize that both
//! verify and webhook delivery race through. A payment leaves `pending`
//! exactly once; whichever path claims the transition applies the plan, and
//! every other path observes the already-terminal row.

use medsight_shared::PlanId;
use rand::distr::{Alphanumeric, SampleString};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entitlement::{EntitlementService, PlanChangeSource, Subscription};
use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, BillingEventLogger, BillingEventType};
use crate::gateway::{GatewayClient, GatewayTxStatus, InitializeTransaction, TransactionMetadata};
use crate::plans::PlanDefinition;

/// Settlement currency for all gateway charges.
pub const CURRENCY: &str = "NGN";

/// Terminal and non-terminal payment states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// A row in the payments ledger.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub reference: String,
    pub hospital_id: Uuid,
    pub plan: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub gateway_reference: Option<String>,
    /// Raw gateway payload captured when the payment was finalized.
    pub metadata: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Payment {
    pub fn status_parsed(&self) -> PaymentStatus {
        match self.status.as_str() {
            "success" => PaymentStatus::Success,
            "failed" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }
}

/// Result of opening a charge: everything the client needs to redirect.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutSession {
    pub reference: String,
    pub authorization_url: String,
    pub access_code: String,
    pub amount_minor: i64,
    pub currency: String,
    pub plan: PlanId,
}

/// Result of a verify call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyOutcome {
    pub payment: Payment,
    /// True when this call claimed the pending-to-terminal transition and
    /// applied the plan; false when the row was already terminal.
    pub newly_confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
}

/// Payment service: gateway calls plus the payments ledger.
#[derive(Clone)]
pub struct PaymentService {
    pool: PgPool,
    gateway: GatewayClient,
    entitlement: EntitlementService,
    events: BillingEventLogger,
}

impl PaymentService {
    pub fn new(pool: PgPool, gateway: GatewayClient) -> Self {
        let entitlement = EntitlementService::new(pool.clone());
        let events = BillingEventLogger::new(pool.clone());
        Self {
            pool,
            gateway,
            entitlement,
            events,
        }
    }

    /// Mint a payment reference: `MS_{unix_millis}_{random suffix}`. The
    /// timestamp orders references; the suffix disambiguates same-millisecond
    /// mints. Uniqueness is ultimately enforced by the ledger's constraint.
    pub fn generate_reference() -> String {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let suffix = Alphanumeric
            .sample_string(&mut rand::rng(), 6)
            .to_lowercase();
        format!("MS_{}_{}", millis, suffix)
    }

    /// Open a charge for a plan. The amount comes from the plan catalog,
    /// never from the caller. The gateway is contacted first; a ledger row
    /// is only written for transactions the gateway accepted.
    pub async fn initialize(
        &self,
        hospital_id: Uuid,
        email: &str,
        plan: PlanId,
        callback_url: &str,
    ) -> BillingResult<CheckoutSession> {
        if !plan.is_purchasable() {
            return Err(BillingError::PlanNotPurchasable(plan));
        }

        let def = PlanDefinition::for_plan(plan);
        let amount_minor = def.amount_minor();
        let reference = Self::generate_reference();

        let handle = self
            .gateway
            .initialize(&InitializeTransaction {
                email: email.to_string(),
                amount: amount_minor,
                reference: reference.clone(),
                currency: CURRENCY.to_string(),
                callback_url: callback_url.to_string(),
                metadata: TransactionMetadata { hospital_id, plan },
            })
            .await?;

        sqlx::query(
            r#"
            INSERT INTO payments (reference, hospital_id, plan, amount_minor, currency)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&handle.reference)
        .bind(hospital_id)
        .bind(plan.as_str())
        .bind(amount_minor)
        .bind(CURRENCY)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            hospital_id = %hospital_id,
            reference = %handle.reference,
            plan = %plan,
            amount_minor = amount_minor,
            "Initialized payment"
        );

        self.events
            .log_best_effort(
                BillingEvent::new(hospital_id, BillingEventType::PaymentInitialized)
                    .reference(&handle.reference)
                    .data(serde_json::json!({
                        "plan": plan.as_str(),
                        "amount_minor": amount_minor,
                        "currency": CURRENCY,
                    })),
            )
            .await;

        Ok(CheckoutSession {
            reference: handle.reference,
            authorization_url: handle.authorization_url,
            access_code: handle.access_code,
            amount_minor,
            currency: CURRENCY.to_string(),
            plan,
        })
    }

    /// Verify a payment against the gateway and finalize it. Idempotent:
    /// a payment already in a terminal state is returned as-is without
    /// another gateway call.
    ///
    /// When `requester` is set, the payment must belong to that hospital.
    pub async fn verify(
        &self,
        reference: &str,
        requester: Option<Uuid>,
    ) -> BillingResult<VerifyOutcome> {
        let payment = self
            .get_by_reference(reference)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("payment '{}'", reference)))?;

        if let Some(hospital_id) = requester {
            if payment.hospital_id != hospital_id {
                tracing::warn!(
                    reference = %reference,
                    requester = %hospital_id,
                    owner = %payment.hospital_id,
                    "Cross-tenant verify attempt rejected"
                );
                return Err(BillingError::Forbidden(
                    "payment belongs to another hospital".to_string(),
                ));
            }
        }

        if payment.status_parsed().is_terminal() {
            return Ok(VerifyOutcome {
                payment,
                newly_confirmed: false,
                subscription: None,
            });
        }

        let tx = self.gateway.verify(reference).await?;

        let outcome = match tx.status {
            GatewayTxStatus::Success => {
                if tx.amount != payment.amount_minor {
                    tracing::warn!(
                        reference = %reference,
                        expected = payment.amount_minor,
                        reported = tx.amount,
                        "Gateway amount does not match ledger, refusing to confirm"
                    );
                    PaymentStatus::Failed
                } else {
                    PaymentStatus::Success
                }
            }
            GatewayTxStatus::Failed | GatewayTxStatus::Abandoned => PaymentStatus::Failed,
            GatewayTxStatus::Pending => {
                // Still in flight at the gateway; leave the row pending.
                return Ok(VerifyOutcome {
                    payment,
                    newly_confirmed: false,
                    subscription: None,
                });
            }
        };

        let gateway_reference = tx.id.to_string();
        let snapshot = serde_json::to_value(&tx).ok();
        self.finalize(
            reference,
            outcome,
            Some(&gateway_reference),
            snapshot,
            PlanChangeSource::Verify,
        )
        .await
    }

    /// Claim the pending-to-terminal transition for a payment. The UPDATE
    /// is conditional on `status = 'pending'`, so exactly one of the racing
    /// paths (verify, webhook, reconcile sweep) wins; losers observe zero
    /// rows affected and return the already-final row untouched.
    pub async fn finalize(
        &self,
        reference: &str,
        outcome: PaymentStatus,
        gateway_reference: Option<&str>,
        snapshot: Option<serde_json::Value>,
        source: PlanChangeSource,
    ) -> BillingResult<VerifyOutcome> {
        let claimed = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = $1,
                gateway_reference = COALESCE($2, gateway_reference),
                metadata = COALESCE($3, metadata),
                updated_at = NOW()
            WHERE reference = $4 AND status = 'pending'
            RETURNING id, reference, hospital_id, plan, amount_minor, currency,
                      status, gateway_reference, metadata, created_at, updated_at
            "#,
        )
        .bind(outcome.as_str())
        .bind(gateway_reference)
        .bind(snapshot)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        let Some(payment) = claimed else {
            // Lost the race; the row is already terminal.
            let payment = self
                .get_by_reference(reference)
                .await?
                .ok_or_else(|| BillingError::NotFound(format!("payment '{}'", reference)))?;
            tracing::info!(
                reference = %reference,
                status = %payment.status,
                source = %source,
                "Payment already finalized by another path"
            );
            return Ok(VerifyOutcome {
                payment,
                newly_confirmed: false,
                subscription: None,
            });
        };

        let subscription = if outcome == PaymentStatus::Success {
            let plan: PlanId = payment
                .plan
                .parse()
                .map_err(|_| BillingError::InvalidPlan(payment.plan.clone()))?;
            let subscription = self
                .entitlement
                .apply_plan(payment.hospital_id, plan, source)
                .await?;

            self.events
                .log_best_effort(
                    BillingEvent::new(payment.hospital_id, BillingEventType::PaymentSucceeded)
                        .reference(reference)
                        .data(serde_json::json!({
                            "plan": payment.plan,
                            "amount_minor": payment.amount_minor,
                            "source": source.as_str(),
                        })),
                )
                .await;

            Some(subscription)
        } else {
            self.events
                .log_best_effort(
                    BillingEvent::new(payment.hospital_id, BillingEventType::PaymentFailed)
                        .reference(reference)
                        .data(serde_json::json!({
                            "plan": payment.plan,
                            "source": source.as_str(),
                        })),
                )
                .await;
            None
        };

        tracing::info!(
            reference = %reference,
            status = %outcome.as_str(),
            source = %source,
            "Finalized payment"
        );

        Ok(VerifyOutcome {
            payment,
            newly_confirmed: true,
            subscription,
        })
    }

    pub async fn get_by_reference(&self, reference: &str) -> BillingResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, reference, hospital_id, plan, amount_minor, currency,
                   status, gateway_reference, metadata, created_at, updated_at
            FROM payments
            WHERE reference = $1
            "#,
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    /// Payment history for a hospital, newest first.
    pub async fn history(&self, hospital_id: Uuid, limit: i64) -> BillingResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, reference, hospital_id, plan, amount_minor, currency,
                   status, gateway_reference, metadata, created_at, updated_at
            FROM payments
            WHERE hospital_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(hospital_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    /// Pending payments older than the cutoff. The reconcile sweep re-checks
    /// these against the gateway in case both the callback and the webhook
    /// were lost.
    pub async fn stale_pending(&self, cutoff: OffsetDateTime) -> BillingResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, reference, hospital_id, plan, amount_minor, currency,
                   status, gateway_reference, metadata, created_at, updated_at
            FROM payments
            WHERE status = 'pending' AND created_at < $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    pub fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_has_prefix_timestamp_and_suffix() {
        let reference = PaymentService::generate_reference();
        let parts: Vec<&str> = reference.splitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "MS");
        assert!(parts[1].parse::<i128>().is_ok());
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(parts[2], parts[2].to_lowercase());
    }

    #[test]
    fn references_do_not_collide_in_a_tight_loop() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1_000 {
            assert!(seen.insert(PaymentService::generate_reference()));
        }
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Success.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }

    #[tokio::test]
    async fn non_purchasable_plan_never_reaches_the_gateway() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/transaction/initialize")
            .expect(0)
            .create_async()
            .await;

        let gateway = GatewayClient::new(crate::gateway::GatewayConfig {
            secret_key: "sk_test_abc".to_string(),
            webhook_secret: "whsec_test".to_string(),
            base_url: server.url(),
        })
        .unwrap();
        // Lazy pool: never connects, and this path must not touch it anyway.
        let pool = PgPool::connect_lazy("postgres://localhost/unreachable").unwrap();
        let service = PaymentService::new(pool, gateway);

        let err = service
            .initialize(
                Uuid::new_v4(),
                "admin@stfrancis.example",
                PlanId::Master,
                "https://app.medsight.example/billing/callback",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::PlanNotPurchasable(PlanId::Master)));
        mock.assert_async().await;
    }
}
