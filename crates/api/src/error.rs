//! API error responses
//!
//! Maps [`BillingError`] and auth failures onto HTTP statuses. Rate-limit
//! rejections carry a `Retry-After` header; gateway failures distinguish a
//! partner refusal (502) from a partner that never answered (504).

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use medsight_billing::BillingError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("internal server error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "authentication required".into())
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Billing(e) => match e {
                BillingError::Unauthenticated => {
                    (StatusCode::UNAUTHORIZED, "authentication required".into())
                }
                BillingError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
                BillingError::InvalidPlan(_)
                | BillingError::PlanNotPurchasable(_)
                | BillingError::Validation(_) => (StatusCode::BAD_REQUEST, e.to_string()),
                BillingError::RateLimited { .. } => {
                    (StatusCode::TOO_MANY_REQUESTS, e.to_string())
                }
                BillingError::GatewayError(_) => {
                    (StatusCode::BAD_GATEWAY, "payment gateway error".into())
                }
                BillingError::GatewayTimeout => {
                    (StatusCode::GATEWAY_TIMEOUT, "payment gateway timed out".into())
                }
                BillingError::SignatureInvalid => {
                    (StatusCode::UNAUTHORIZED, "invalid signature".into())
                }
                BillingError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
                BillingError::Database(_) | BillingError::Internal(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".into())
                }
            },
            ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".into())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            tracing::error!(status = %status, error = ?self, "Request failed");
        }

        let body = Json(json!({ "error": message }));
        let mut response = (status, body).into_response();

        if let ApiError::Billing(BillingError::RateLimited {
            retry_after_seconds,
        }) = &self
        {
            if let Ok(value) = header::HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
