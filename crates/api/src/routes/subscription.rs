//! Subscription endpoints

use axum::{
    extract::{Extension, State},
    Json,
};
use medsight_billing::{BillingError, Subscription};
use serde::Deserialize;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

/// GET /api/subscription
pub async fn current(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .billing
        .entitlement
        .get_subscription(user.hospital_id)
        .await?
        .ok_or_else(|| {
            ApiError::Billing(BillingError::NotFound("no active subscription".to_string()))
        })?;
    Ok(Json(subscription))
}

#[derive(Debug, Deserialize)]
pub struct ElevateRequest {
    pub secret: String,
}

/// POST /api/subscription/elevate
///
/// Grant the caller's hospital the master tier. The guard chain (role,
/// rate limit, secret) lives in the billing crate; like verify, the
/// side-effecting work is awaited on a spawned task so a disconnect cannot
/// leave the grant half-applied.
pub async fn elevate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ElevateRequest>,
) -> ApiResult<Json<Subscription>> {
    let billing = state.billing.clone();

    let subscription = tokio::spawn(async move {
        billing
            .elevation
            .elevate(user.user_id, user.hospital_id, user.role, &body.secret)
            .await
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("elevation task: {}", e)))??;

    Ok(Json(subscription))
}
