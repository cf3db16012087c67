//! Demo request intake endpoint

use axum::{extract::State, http::StatusCode, Json};
use medsight_billing::DemoRequest;
use serde::Deserialize;

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct DemoRequestBody {
    pub email: String,
    pub hospital_name: String,
    pub message: Option<String>,
}

/// POST /api/demo-requests
///
/// Public endpoint; abuse is bounded by the per-email rate limit.
pub async fn submit(
    State(state): State<AppState>,
    Json(body): Json<DemoRequestBody>,
) -> ApiResult<(StatusCode, Json<DemoRequest>)> {
    let request = state
        .billing
        .demo
        .submit(&body.email, &body.hospital_name, body.message.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}
