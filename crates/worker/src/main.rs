//! MedSight Background Worker
//!
//! Handles scheduled jobs including:
//! - Subscription expiry sweep (hourly)
//! - Stale pending-payment reconciliation against the gateway (every 30 minutes)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use medsight_billing::{BillingEvent, BillingEventType, BillingService};
use medsight_shared::create_pool;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{error, info, warn};

/// Pending payments older than this are re-checked against the gateway, in
/// case both the browser callback and the webhook were lost.
const STALE_PENDING_AFTER: time::Duration = time::Duration::minutes(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting MedSight Worker");

    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;

    let billing = BillingService::from_env(pool.clone())
        .await
        .map(Arc::new)
        .map_err(|e| anyhow::anyhow!("billing service: {}", e))?;

    let scheduler = JobScheduler::new().await?;

    // Job 1: Deactivate expired subscriptions (hourly, on the hour)
    let expiry_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let billing = expiry_billing.clone();
            Box::pin(async move {
                info!("Running subscription expiry sweep");
                run_expiry_sweep(&billing).await;
            })
        })?)
        .await?;
    info!("Scheduled: Subscription expiry sweep (hourly)");

    // Job 2: Reconcile stale pending payments (every 30 minutes)
    let reconcile_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 */30 * * * *", move |_uuid, _l| {
            let billing = reconcile_billing.clone();
            Box::pin(async move {
                info!("Running stale payment reconciliation");
                run_reconcile_sweep(&billing).await;
            })
        })?)
        .await?;
    info!("Scheduled: Stale payment reconciliation (every 30 minutes)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("MedSight Worker started successfully with 3 scheduled jobs");

    // Keep the main task running; the scheduler runs jobs in background tasks.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

/// Deactivate subscriptions past their expiry and record an event for each.
async fn run_expiry_sweep(billing: &BillingService) {
    match billing.entitlement.deactivate_expired().await {
        Ok(hospital_ids) => {
            for hospital_id in &hospital_ids {
                billing
                    .events
                    .log_best_effort(BillingEvent::new(
                        *hospital_id,
                        BillingEventType::SubscriptionExpired,
                    ))
                    .await;
            }
            info!(
                deactivated = hospital_ids.len(),
                "Subscription expiry sweep complete"
            );
        }
        Err(e) => error!(error = %e, "Subscription expiry sweep failed"),
    }
}

/// Re-check old pending payments against the gateway. Each payment is
/// verified with retry/backoff; the conditional finalize in the billing
/// core makes a concurrent webhook harmless.
async fn run_reconcile_sweep(billing: &BillingService) {
    let cutoff = OffsetDateTime::now_utc() - STALE_PENDING_AFTER;
    let stale = match billing.payments.stale_pending(cutoff).await {
        Ok(stale) => stale,
        Err(e) => {
            error!(error = %e, "Failed to list stale pending payments");
            return;
        }
    };

    if stale.is_empty() {
        info!("No stale pending payments to reconcile");
        return;
    }

    let total = stale.len();
    let mut finalized = 0;
    let mut still_pending = 0;
    let mut errors = 0;

    for payment in stale {
        let strategy = ExponentialBackoff::from_millis(500).map(jitter).take(3);
        let reference = payment.reference.clone();

        let result = Retry::spawn(strategy, || {
            billing.payments.verify(&reference, None)
        })
        .await;

        match result {
            Ok(outcome) if outcome.newly_confirmed => {
                finalized += 1;
                info!(
                    reference = %reference,
                    status = %outcome.payment.status,
                    "Reconciled stale payment"
                );
            }
            Ok(outcome) if !outcome.payment.status_parsed().is_terminal() => {
                still_pending += 1;
            }
            Ok(_) => {
                // Another path finalized it between the listing and now.
                finalized += 1;
            }
            Err(e) => {
                errors += 1;
                warn!(reference = %reference, error = %e, "Failed to reconcile payment");
            }
        }
    }

    info!(
        total = total,
        finalized = finalized,
        still_pending = still_pending,
        errors = errors,
        "Stale payment reconciliation complete"
    );
}
