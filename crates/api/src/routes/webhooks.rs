//! Gateway webhook endpoint

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use medsight_billing::{WebhookDisposition, SIGNATURE_HEADER};
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// POST /api/webhooks/gateway
///
/// Body must be the raw bytes the gateway signed; any re-serialization
/// would break verification. Processing is awaited on a spawned task so the
/// gateway's own client timeout cannot abandon a half-applied confirmation.
pub async fn gateway(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?
        .to_string();

    let billing = state.billing.clone();
    let disposition: WebhookDisposition = tokio::spawn(async move {
        billing.webhooks.process(&body, &signature).await
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("webhook task: {}", e)))??;

    Ok(Json(json!({ "received": true, "status": disposition })))
}
