//! Payment endpoints

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use medsight_billing::{CheckoutSession, Payment, VerifyOutcome};
use medsight_shared::PlanId;
use serde::Deserialize;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    pub plan: String,
    pub email: String,
    pub callback_url: Option<String>,
    // No amount field: the charge is always priced server-side.
}

/// POST /api/payments/initialize
///
/// Opens a gateway charge for the caller's hospital and returns the
/// checkout redirect. Admin only.
pub async fn initialize(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<InitializeRequest>,
) -> ApiResult<Json<CheckoutSession>> {
    user.require_admin()?;

    let plan: PlanId = body
        .plan
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid plan '{}'", body.plan)))?;
    let callback_url = body
        .callback_url
        .unwrap_or_else(|| state.config.default_callback_url());

    let session = state
        .billing
        .payments
        .initialize(user.hospital_id, &body.email, plan, &callback_url)
        .await?;

    Ok(Json(session))
}

/// GET /api/payments/verify/{reference}
///
/// Confirms a payment against the gateway. The verify-and-apply tail runs
/// on a spawned task and the handler awaits its handle, so a client that
/// disconnects mid-request cannot abandon the subscription update half-done.
pub async fn verify(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(reference): Path<String>,
) -> ApiResult<Json<VerifyOutcome>> {
    let billing = state.billing.clone();
    let hospital_id = user.hospital_id;

    let outcome = tokio::spawn(async move {
        billing
            .payments
            .verify(&reference, Some(hospital_id))
            .await
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("verify task: {}", e)))??;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// GET /api/payments/history
pub async fn history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Payment>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let payments = state
        .billing
        .payments
        .history(user.hospital_id, limit)
        .await?;
    Ok(Json(payments))
}
