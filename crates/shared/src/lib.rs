// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! MedSight Shared
//!
//! Types and infrastructure shared by the API server, billing core, and
//! background worker: closed plan/role enums, database pool construction,
//! and the pluggable fixed-window rate limiter.

pub mod db;
pub mod rate_limit;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use rate_limit::{
    RateLimitError, RateLimitResult, RateLimiter, DEMO_REQUEST_MAX_ATTEMPTS, DEMO_REQUEST_WINDOW,
    ELEVATION_MAX_ATTEMPTS, ELEVATION_WINDOW,
};
pub use types::{PlanId, Role};
