//! Gateway webhook handling
//!
//! The gateway signs each delivery with HMAC-SHA512 over the raw request
//! body. Signature verification happens before any parsing, against the raw
//! bytes exactly as received; the comparison is constant-time. Deliveries
//! are processed idempotently, so gateway retries of an already-handled
//! event are harmless.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::entitlement::PlanChangeSource;
use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, BillingEventLogger, BillingEventType};
use crate::payments::{PaymentService, PaymentStatus};

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the hex-encoded HMAC-SHA512 of the body.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Parsed webhook envelope.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    pub data: WebhookData,
}

/// Transaction payload inside a webhook delivery.
#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub reference: String,
    pub id: Option<i64>,
    pub amount: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}

/// What the handler did with a delivery. Every disposition answers 200 so
/// the gateway stops retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDisposition {
    /// Claimed the payment and applied the plan.
    Confirmed,
    /// Payment was already terminal; nothing to do.
    AlreadyFinal,
    /// Event type we don't act on, or a reference we don't know.
    Ignored,
    /// Amount mismatch; payment marked failed instead of confirmed.
    Rejected,
    /// Signature was valid but processing failed (unparseable body or a
    /// store error). Still acknowledged; the reconcile sweep picks up any
    /// payment this left pending.
    Failed,
}

/// Webhook verification and dispatch.
#[derive(Clone)]
pub struct WebhookService {
    payments: PaymentService,
    events: BillingEventLogger,
    secret: String,
}

impl WebhookService {
    pub fn new(payments: PaymentService, events: BillingEventLogger, secret: String) -> Self {
        Self {
            payments,
            events,
            secret,
        }
    }

    /// Check the delivery signature against the raw body.
    pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
        let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(body);
        let expected = hex::encode(mac.finalize().into_bytes());
        expected
            .as_bytes()
            .ct_eq(signature_hex.to_lowercase().as_bytes())
            .into()
    }

    fn parse_envelope(body: &[u8]) -> BillingResult<WebhookEnvelope> {
        serde_json::from_slice(body)
            .map_err(|e| BillingError::Validation(format!("webhook body: {}", e)))
    }

    /// Verify and dispatch a delivery. A bad signature is the only error
    /// this returns; once the signature checks out, the delivery is always
    /// acknowledged, even when processing fails, so the gateway does not
    /// enter a redelivery loop over our internal problems. Processing is
    /// idempotent, and a payment a failed delivery leaves pending is
    /// covered by the reconcile sweep.
    pub async fn process(
        &self,
        body: &[u8],
        signature_hex: &str,
    ) -> BillingResult<WebhookDisposition> {
        if !Self::verify_signature(&self.secret, body, signature_hex) {
            tracing::warn!("Webhook delivery with invalid signature rejected");
            return Err(BillingError::SignatureInvalid);
        }

        match self.dispatch(body).await {
            Ok(disposition) => Ok(disposition),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Webhook processing failed; delivery acknowledged anyway"
                );
                Ok(WebhookDisposition::Failed)
            }
        }
    }

    async fn dispatch(&self, body: &[u8]) -> BillingResult<WebhookDisposition> {
        let envelope = Self::parse_envelope(body)?;

        match envelope.event.as_str() {
            "charge.success" => self.handle_charge_success(envelope.data).await,
            other => {
                tracing::info!(event = %other, "Ignoring webhook event type");
                Ok(WebhookDisposition::Ignored)
            }
        }
    }

    async fn handle_charge_success(&self, data: WebhookData) -> BillingResult<WebhookDisposition> {
        let Some(payment) = self.payments.get_by_reference(&data.reference).await? else {
            tracing::warn!(
                reference = %data.reference,
                "Webhook for unknown payment reference ignored"
            );
            return Ok(WebhookDisposition::Ignored);
        };

        self.events
            .log_best_effort(
                BillingEvent::new(payment.hospital_id, BillingEventType::WebhookReceived)
                    .reference(&data.reference)
                    .data(serde_json::json!({"event": "charge.success"})),
            )
            .await;

        if payment.status_parsed().is_terminal() {
            tracing::info!(
                reference = %data.reference,
                status = %payment.status,
                "Webhook retry for finalized payment"
            );
            return Ok(WebhookDisposition::AlreadyFinal);
        }

        // The gateway's reported amount must match the ledger before the
        // charge counts as confirmed.
        let outcome = match data.amount {
            Some(amount) if amount == payment.amount_minor => PaymentStatus::Success,
            Some(amount) => {
                tracing::warn!(
                    reference = %data.reference,
                    expected = payment.amount_minor,
                    reported = amount,
                    "Webhook amount does not match ledger"
                );
                PaymentStatus::Failed
            }
            None => {
                tracing::warn!(
                    reference = %data.reference,
                    "Webhook charge.success without an amount"
                );
                PaymentStatus::Failed
            }
        };

        let gateway_reference = data.id.map(|id| id.to_string());
        let snapshot = serde_json::json!({
            "event": "charge.success",
            "id": data.id,
            "amount": data.amount,
            "metadata": data.metadata,
        });
        let result = self
            .payments
            .finalize(
                &data.reference,
                outcome,
                gateway_reference.as_deref(),
                Some(snapshot),
                PlanChangeSource::Webhook,
            )
            .await?;

        if !result.newly_confirmed {
            return Ok(WebhookDisposition::AlreadyFinal);
        }
        if outcome == PaymentStatus::Success {
            Ok(WebhookDisposition::Confirmed)
        } else {
            Ok(WebhookDisposition::Rejected)
        }
    }

    /// Hospital id embedded in the delivery metadata, when present. Used
    /// only for logging; the ledger row is the authority on ownership.
    pub fn metadata_hospital_id(data: &WebhookData) -> Option<Uuid> {
        data.metadata
            .as_ref()
            .and_then(|m| m.get("hospital_id"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayClient, GatewayConfig};

    const SECRET: &str = "whsec_test_secret";

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Service over a pool that refuses connections, for exercising the
    /// paths where the store is unavailable.
    fn unreachable_service() -> WebhookService {
        let gateway = GatewayClient::new(GatewayConfig {
            secret_key: "sk_test_abc".to_string(),
            webhook_secret: SECRET.to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
        })
        .unwrap();
        let pool = sqlx::PgPool::connect_lazy("postgres://127.0.0.1:1/nowhere").unwrap();
        WebhookService::new(
            PaymentService::new(pool.clone(), gateway),
            BillingEventLogger::new(pool),
            SECRET.to_string(),
        )
    }

    #[test]
    fn valid_signature_passes() {
        let body = br#"{"event":"charge.success","data":{"reference":"MS_r"}}"#;
        let signature = sign(SECRET, body);
        assert!(WebhookService::verify_signature(SECRET, body, &signature));
    }

    #[test]
    fn uppercase_hex_signature_passes() {
        let body = br#"{"event":"charge.success","data":{"reference":"MS_r"}}"#;
        let signature = sign(SECRET, body).to_uppercase();
        assert!(WebhookService::verify_signature(SECRET, body, &signature));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let body = br#"{"event":"charge.success","data":{"reference":"MS_r","amount":100}}"#;
        let signature = sign(SECRET, body);
        let tampered = br#"{"event":"charge.success","data":{"reference":"MS_r","amount":999}}"#;
        assert!(!WebhookService::verify_signature(SECRET, tampered, &signature));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let body = br#"{"event":"charge.success","data":{"reference":"MS_r"}}"#;
        let signature = sign("some_other_secret", body);
        assert!(!WebhookService::verify_signature(SECRET, body, &signature));
    }

    #[test]
    fn garbage_signature_fails_verification() {
        let body = br#"{}"#;
        assert!(!WebhookService::verify_signature(SECRET, body, "not-hex"));
        assert!(!WebhookService::verify_signature(SECRET, body, ""));
    }

    #[test]
    fn envelope_parses_charge_success() {
        let body = br#"{
            "event": "charge.success",
            "data": {
                "reference": "MS_1700000000000_ab12cd",
                "id": 4099260516,
                "amount": 180000000,
                "metadata": {"hospital_id": "7c9e6679-7425-40de-944b-e07fc1f90ae7", "plan": "growth"}
            }
        }"#;
        let envelope = WebhookService::parse_envelope(body).unwrap();
        assert_eq!(envelope.event, "charge.success");
        assert_eq!(envelope.data.reference, "MS_1700000000000_ab12cd");
        assert_eq!(envelope.data.amount, Some(180_000_000));
        assert_eq!(
            WebhookService::metadata_hospital_id(&envelope.data),
            "7c9e6679-7425-40de-944b-e07fc1f90ae7".parse().ok()
        );
    }

    #[tokio::test]
    async fn signed_but_unparseable_body_is_acknowledged() {
        let service = unreachable_service();
        let body = b"definitely not json";
        let signature = sign(SECRET, body);

        let disposition = service.process(body, &signature).await.unwrap();
        assert_eq!(disposition, WebhookDisposition::Failed);
    }

    #[tokio::test]
    async fn store_failure_after_valid_signature_is_acknowledged() {
        let service = unreachable_service();
        let body = br#"{"event":"charge.success","data":{"reference":"MS_1700000000000_ab12cd"}}"#;
        let signature = sign(SECRET, body);

        // Ledger lookup fails against the unreachable pool; the delivery is
        // still acknowledged rather than bounced back to the gateway.
        let disposition = service.process(body, &signature).await.unwrap();
        assert_eq!(disposition, WebhookDisposition::Failed);
    }

    #[tokio::test]
    async fn invalid_signature_is_still_rejected_outright() {
        let service = unreachable_service();
        let body = br#"{"event":"charge.success","data":{"reference":"MS_x"}}"#;

        let err = service.process(body, "deadbeef").await.unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }

    #[test]
    fn envelope_tolerates_missing_optional_fields() {
        let body = br#"{"event":"charge.dispute.create","data":{"reference":"MS_x"}}"#;
        let envelope = WebhookService::parse_envelope(body).unwrap();
        assert_eq!(envelope.data.id, None);
        assert_eq!(envelope.data.amount, None);
        assert!(envelope.data.metadata.is_none());
    }
}
