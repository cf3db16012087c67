//! Payment lifecycle tests against a real Postgres schema
//!
//! Each test runs on its own database provisioned by `#[sqlx::test]` from
//! the workspace migrations, exercising the conditional finalize claim, the
//! verify short-circuits, and the single-row entitlement upsert.

// Test code patterns:
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use medsight_billing::{
    BillingError, EntitlementService, GatewayClient, GatewayConfig, PaymentService, PaymentStatus,
    PlanChangeSource,
};
use medsight_shared::PlanId;
use sqlx::PgPool;
use uuid::Uuid;

fn gateway_for(base_url: &str) -> GatewayClient {
    GatewayClient::new(GatewayConfig {
        secret_key: "sk_test_abc".to_string(),
        webhook_secret: "whsec_test".to_string(),
        base_url: base_url.to_string(),
    })
    .unwrap()
}

async fn insert_payment(
    pool: &PgPool,
    reference: &str,
    hospital_id: Uuid,
    plan: PlanId,
    amount_minor: i64,
    status: &str,
) {
    sqlx::query(
        r#"
        INSERT INTO payments (reference, hospital_id, plan, amount_minor, currency, status)
        VALUES ($1, $2, $3, $4, 'NGN', $5)
        "#,
    )
    .bind(reference)
    .bind(hospital_id)
    .bind(plan.as_str())
    .bind(amount_minor)
    .bind(status)
    .execute(pool)
    .await
    .unwrap();
}

#[sqlx::test(migrations = "../../migrations")]
async fn verify_returns_terminal_rows_without_a_gateway_call(pool: PgPool) {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/transaction/verify/MS_1700000000000_final1")
        .expect(0)
        .create_async()
        .await;

    let hospital_id = Uuid::new_v4();
    insert_payment(
        &pool,
        "MS_1700000000000_final1",
        hospital_id,
        PlanId::Growth,
        180_000_000,
        "success",
    )
    .await;

    let service = PaymentService::new(pool, gateway_for(&server.url()));
    let outcome = service
        .verify("MS_1700000000000_final1", Some(hospital_id))
        .await
        .unwrap();

    assert!(!outcome.newly_confirmed);
    assert_eq!(outcome.payment.status, "success");
    assert!(outcome.subscription.is_none());
    mock.assert_async().await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn finalize_claims_the_transition_exactly_once(pool: PgPool) {
    let hospital_id = Uuid::new_v4();
    insert_payment(
        &pool,
        "MS_1700000000000_race01",
        hospital_id,
        PlanId::Growth,
        180_000_000,
        "pending",
    )
    .await;

    let service = PaymentService::new(pool.clone(), gateway_for("http://127.0.0.1:1"));

    let first = service
        .finalize(
            "MS_1700000000000_race01",
            PaymentStatus::Success,
            Some("4099260516"),
            Some(serde_json::json!({"id": 4099260516_i64, "status": "success"})),
            PlanChangeSource::Verify,
        )
        .await
        .unwrap();

    assert!(first.newly_confirmed);
    assert_eq!(first.payment.status, "success");
    assert!(first.payment.metadata.is_some());
    let subscription = first.subscription.unwrap();
    assert_eq!(subscription.plan, "growth");
    assert!(subscription.is_active);
    assert_eq!(subscription.max_patients, 2_000);

    // A late webhook for the same reference loses the race and cannot move
    // the row again, not even to a different terminal state.
    let second = service
        .finalize(
            "MS_1700000000000_race01",
            PaymentStatus::Failed,
            None,
            None,
            PlanChangeSource::Webhook,
        )
        .await
        .unwrap();

    assert!(!second.newly_confirmed);
    assert_eq!(second.payment.status, "success");
    assert!(second.subscription.is_none());

    let subscription_rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE hospital_id = $1")
            .bind(hospital_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(subscription_rows, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn failed_charge_leaves_subscription_untouched(pool: PgPool) {
    let hospital_id = Uuid::new_v4();
    insert_payment(
        &pool,
        "MS_1700000000000_fail01",
        hospital_id,
        PlanId::Starter,
        75_000_000,
        "pending",
    )
    .await;

    let service = PaymentService::new(pool.clone(), gateway_for("http://127.0.0.1:1"));
    let outcome = service
        .finalize(
            "MS_1700000000000_fail01",
            PaymentStatus::Failed,
            None,
            None,
            PlanChangeSource::Webhook,
        )
        .await
        .unwrap();

    assert!(outcome.newly_confirmed);
    assert_eq!(outcome.payment.status, "failed");
    assert!(outcome.subscription.is_none());

    let entitlement = EntitlementService::new(pool);
    assert!(entitlement
        .get_subscription(hospital_id)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn verify_rejects_cross_tenant_requester(pool: PgPool) {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/transaction/verify/MS_1700000000000_tenant")
        .expect(0)
        .create_async()
        .await;

    let owner = Uuid::new_v4();
    insert_payment(
        &pool,
        "MS_1700000000000_tenant",
        owner,
        PlanId::Growth,
        180_000_000,
        "pending",
    )
    .await;

    let service = PaymentService::new(pool, gateway_for(&server.url()));
    let err = service
        .verify("MS_1700000000000_tenant", Some(Uuid::new_v4()))
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::Forbidden(_)));
    mock.assert_async().await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn apply_plan_recomputes_the_single_row(pool: PgPool) {
    let hospital_id = Uuid::new_v4();
    let entitlement = EntitlementService::new(pool.clone());

    let starter = entitlement
        .apply_plan(hospital_id, PlanId::Starter, PlanChangeSource::Verify)
        .await
        .unwrap();
    assert_eq!(starter.plan, "starter");
    assert_eq!(starter.max_patients, 500);
    assert_eq!(starter.max_users, 5);

    let growth = entitlement
        .apply_plan(hospital_id, PlanId::Growth, PlanChangeSource::Webhook)
        .await
        .unwrap();
    assert_eq!(growth.plan, "growth");
    assert_eq!(growth.max_patients, 2_000);
    assert_eq!(growth.max_users, 20);
    assert!(growth.is_active);
    assert!(growth.started_at >= starter.started_at);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE hospital_id = $1")
        .bind(hospital_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}
