//! Authentication middleware for Axum
//!
//! Session tokens are bearer JWTs. The middleware verifies the token and
//! injects an [`AuthUser`] extension; handlers read the tenant and role from
//! there, never from the request body.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use medsight_shared::Role;
use uuid::Uuid;

use super::jwt::JwtManager;
use crate::error::ApiError;

/// Authenticated user information extracted from the session token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub hospital_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    /// Require the hospital admin role.
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role == Role::HospitalAdmin {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "hospital admin role required".to_string(),
            ))
        }
    }
}

/// State needed for authentication.
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
}

/// Extract the bearer token from an Authorization header value.
fn bearer_token(header_value: &str) -> Option<&str> {
    let token = header_value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Middleware requiring a valid session token.
pub async fn require_auth(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or(ApiError::Unauthorized)?;

    let claims = auth.jwt_manager.verify_token(token).map_err(|e| {
        tracing::debug!(error = %e, "Session token rejected");
        ApiError::Unauthorized
    })?;

    request.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        hospital_id: claims.hospital_id,
        role: claims.role,
    });

    Ok(next.run(request).await)
}
