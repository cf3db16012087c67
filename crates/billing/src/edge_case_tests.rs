// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing System
//!
//! Boundary conditions and race conditions in:
//! - Elevation and demo-request rate limiting
//! - Webhook signature verification
//! - Plan pricing and amount computation
//! - Webhook envelope parsing

mod elevation_rate_limit_tests {
    use medsight_shared::{RateLimiter, ELEVATION_MAX_ATTEMPTS};
    use uuid::Uuid;

    // =========================================================================
    // First elevation attempt opens a fresh window
    // =========================================================================
    #[tokio::test]
    async fn first_attempt_opens_window() {
        let limiter = RateLimiter::new_in_memory();
        let user_id = Uuid::new_v4();

        let result = limiter.check_elevation(user_id).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, ELEVATION_MAX_ATTEMPTS - 1);
    }

    // =========================================================================
    // Attempt after the limit is rejected with a retry hint
    // =========================================================================
    #[tokio::test]
    async fn attempt_past_limit_rejected() {
        let limiter = RateLimiter::new_in_memory();
        let user_id = Uuid::new_v4();

        for i in 0..ELEVATION_MAX_ATTEMPTS {
            let result = limiter.check_elevation(user_id).await.unwrap();
            assert!(result.allowed, "attempt {} should be admitted", i);
        }

        let result = limiter.check_elevation(user_id).await.unwrap();
        assert!(!result.allowed);
        assert!(result.retry_after_seconds.is_some());
    }

    // =========================================================================
    // Parallel attempts never admit more than the window allows
    // =========================================================================
    #[tokio::test]
    async fn concurrent_attempts_respect_limit() {
        use std::sync::Arc;
        use tokio::sync::Barrier;

        let limiter = Arc::new(RateLimiter::new_in_memory());
        let user_id = Uuid::new_v4();

        let barrier = Arc::new(Barrier::new(10));
        let mut handles = vec![];
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                limiter.check_elevation(user_id).await.unwrap()
            }));
        }

        let mut admitted: u32 = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, ELEVATION_MAX_ATTEMPTS);
    }

    // =========================================================================
    // Windows are per user; one user's failures don't burn another's budget
    // =========================================================================
    #[tokio::test]
    async fn windows_are_per_user() {
        let limiter = RateLimiter::new_in_memory();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        for _ in 0..=ELEVATION_MAX_ATTEMPTS {
            limiter.check_elevation(first).await.unwrap();
        }
        assert!(!limiter.check_elevation(first).await.unwrap().allowed);
        assert!(limiter.check_elevation(second).await.unwrap().allowed);
    }
}

mod demo_rate_limit_tests {
    use medsight_shared::{RateLimiter, DEMO_REQUEST_MAX_ATTEMPTS};

    // =========================================================================
    // Demo requests are keyed by normalized email
    // =========================================================================
    #[tokio::test]
    async fn email_case_does_not_reset_the_window() {
        let limiter = RateLimiter::new_in_memory();

        for _ in 0..DEMO_REQUEST_MAX_ATTEMPTS {
            let result = limiter.check_demo_request("Ops@Clinic.NG").await.unwrap();
            assert!(result.allowed);
        }
        let result = limiter.check_demo_request("ops@clinic.ng").await.unwrap();
        assert!(!result.allowed);
    }
}

mod webhook_signature_tests {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    use crate::webhooks::WebhookService;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    // =========================================================================
    // Empty body is still a signable message
    // =========================================================================
    #[test]
    fn empty_body_verifies_when_signed() {
        let signature = sign("secret", b"");
        assert!(WebhookService::verify_signature("secret", b"", &signature));
    }

    // =========================================================================
    // A single flipped byte anywhere in the body invalidates the signature
    // =========================================================================
    #[test]
    fn one_byte_change_invalidates() {
        let body = br#"{"event":"charge.success","data":{"reference":"MS_a","amount":75000000}}"#;
        let signature = sign("secret", body);

        let mut tampered = body.to_vec();
        let last = tampered.len() - 2;
        tampered[last] ^= 0x01;
        assert!(!WebhookService::verify_signature(
            "secret", &tampered, &signature
        ));
    }

    // =========================================================================
    // Truncated signature never passes, regardless of prefix match
    // =========================================================================
    #[test]
    fn truncated_signature_rejected() {
        let body = b"payload";
        let signature = sign("secret", body);
        let truncated = &signature[..signature.len() - 2];
        assert!(!WebhookService::verify_signature("secret", body, truncated));
    }

    // =========================================================================
    // Large bodies verify the same as small ones
    // =========================================================================
    #[test]
    fn large_body_verifies() {
        let body = vec![b'x'; 1 << 20];
        let signature = sign("secret", &body);
        assert!(WebhookService::verify_signature("secret", &body, &signature));
    }
}

mod pricing_tests {
    use medsight_shared::PlanId;

    use crate::plans::{PlanDefinition, MINOR_PER_MAJOR, NGN_RATE};

    // =========================================================================
    // Amounts stay far below i64 range even for the top tier
    // =========================================================================
    #[test]
    fn amounts_cannot_overflow() {
        let enterprise = PlanDefinition::for_plan(PlanId::Enterprise);
        let amount = enterprise
            .price_usd
            .checked_mul(NGN_RATE)
            .and_then(|n| n.checked_mul(MINOR_PER_MAJOR));
        assert_eq!(amount, Some(enterprise.amount_minor()));
    }

    // =========================================================================
    // The master tier is granted, never sold
    // =========================================================================
    #[test]
    fn master_has_no_charge_amount() {
        assert!(!PlanId::Master.is_purchasable());
        assert_eq!(PlanDefinition::for_plan(PlanId::Master).amount_minor(), 0);
    }

    // =========================================================================
    // Purchasable plans all parse back from their wire names
    // =========================================================================
    #[test]
    fn purchasable_plans_round_trip() {
        for plan in [PlanId::Starter, PlanId::Growth, PlanId::Enterprise] {
            assert!(plan.is_purchasable());
            assert_eq!(plan.as_str().parse::<PlanId>().unwrap(), plan);
        }
    }
}

mod webhook_envelope_tests {
    use crate::webhooks::WebhookEnvelope;

    // =========================================================================
    // Unknown fields from the gateway are tolerated
    // =========================================================================
    #[test]
    fn extra_fields_are_ignored() {
        let body = br#"{
            "event": "charge.success",
            "data": {
                "reference": "MS_x",
                "id": 9,
                "amount": 75000000,
                "channel": "card",
                "fees": 105000,
                "customer": {"email": "a@b.example"}
            },
            "order": null
        }"#;
        let envelope: WebhookEnvelope = serde_json::from_slice(body).unwrap();
        assert_eq!(envelope.data.amount, Some(75_000_000));
    }

    // =========================================================================
    // Missing reference is a parse failure, not a default
    // =========================================================================
    #[test]
    fn missing_reference_fails_parse() {
        let body = br#"{"event":"charge.success","data":{"amount":100}}"#;
        assert!(serde_json::from_slice::<WebhookEnvelope>(body).is_err());
    }
}
