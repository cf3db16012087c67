//! HTTP routes
//!
//! The billing surface splits into a protected group behind the session
//! middleware and a public group (health, gateway webhooks, demo intake).

pub mod demo;
pub mod payments;
pub mod subscription;
pub mod webhooks;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::{auth::require_auth, state::AppState};

pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    let protected = Router::new()
        .route("/api/payments/initialize", post(payments::initialize))
        .route("/api/payments/verify/{reference}", get(payments::verify))
        .route("/api/payments/history", get(payments::history))
        .route("/api/subscription", get(subscription::current))
        .route("/api/subscription/elevate", post(subscription::elevate))
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    let public = Router::new()
        .route("/health", get(health))
        .route("/api/webhooks/gateway", post(webhooks::gateway))
        .route("/api/demo-requests", post(demo::submit));

    protected.merge(public).with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
