//! Fixed-window rate limiting with a pluggable backing store
//!
//! Window discipline is a fixed window: the first attempt opens a window and
//! every attempt inside it counts against the limit; the window resets only
//! once its full duration has elapsed. The backing store is a deployment
//! choice, not a hardcoded assumption: the in-process map is correct for
//! single-instance deployments, while multi-instance deployments point
//! `RATE_LIMIT_REDIS_URL` at a shared Redis so counters apply across
//! instances and survive restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Elevation guard: 5 attempts per 15 minutes per user id.
pub const ELEVATION_MAX_ATTEMPTS: u32 = 5;
pub const ELEVATION_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Demo-request intake: 3 submissions per hour per email.
pub const DEMO_REQUEST_MAX_ATTEMPTS: u32 = 3;
pub const DEMO_REQUEST_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit store error: {0}")]
    Store(#[from] redis::RedisError),
}

/// Outcome of a rate limit check. The attempt has already been counted.
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Attempts left in the current window (0 when rejected).
    pub remaining: u32,
    /// Seconds until the window resets, set when rejected.
    pub retry_after_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    window_start: OffsetDateTime,
}

#[derive(Clone)]
enum Backend {
    Memory(Arc<RwLock<HashMap<String, Window>>>),
    Redis(redis::aio::ConnectionManager),
}

/// Fixed-window rate limiter keyed by caller-scoped strings.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Backend,
}

impl RateLimiter {
    /// In-process counters. Suitable for single-instance deployments.
    pub fn new_in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(RwLock::new(HashMap::new()))),
        }
    }

    /// Shared Redis counters with TTL, for multi-instance deployments.
    pub async fn new_redis(url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url)?;
        let manager = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self {
            backend: Backend::Redis(manager),
        })
    }

    /// Count one attempt against `key` and report whether it is allowed.
    pub async fn check(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitResult, RateLimitError> {
        match &self.backend {
            Backend::Memory(map) => Ok(self.check_memory(map, key, limit, window).await),
            Backend::Redis(manager) => self.check_redis(manager, key, limit, window).await,
        }
    }

    /// Elevation guard attempts, keyed by user id.
    pub async fn check_elevation(&self, user_id: Uuid) -> Result<RateLimitResult, RateLimitError> {
        self.check(
            &format!("elevation:{}", user_id),
            ELEVATION_MAX_ATTEMPTS,
            ELEVATION_WINDOW,
        )
        .await
    }

    /// Demo-request intake attempts, keyed by submitter email.
    pub async fn check_demo_request(&self, email: &str) -> Result<RateLimitResult, RateLimitError> {
        self.check(
            &format!("demo:{}", email.to_lowercase()),
            DEMO_REQUEST_MAX_ATTEMPTS,
            DEMO_REQUEST_WINDOW,
        )
        .await
    }

    async fn check_memory(
        &self,
        map: &Arc<RwLock<HashMap<String, Window>>>,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitResult {
        let now = OffsetDateTime::now_utc();
        let mut windows = map.write().await;

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            window_start: now,
        });

        if now - entry.window_start >= window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;

        if entry.count <= limit {
            RateLimitResult {
                allowed: true,
                remaining: limit - entry.count,
                retry_after_seconds: None,
            }
        } else {
            let elapsed = (now - entry.window_start).whole_seconds().max(0) as u64;
            let retry_after = window.as_secs().saturating_sub(elapsed).max(1);
            RateLimitResult {
                allowed: false,
                remaining: 0,
                retry_after_seconds: Some(retry_after),
            }
        }
    }

    async fn check_redis(
        &self,
        manager: &redis::aio::ConnectionManager,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitResult, RateLimitError> {
        let mut conn = manager.clone();
        let redis_key = format!("ratelimit:{}", key);

        let count: u32 = conn.incr(&redis_key, 1u32).await?;
        // EXPIRE NX sets the TTL only when the key has none, so the window
        // opens on the first attempt and a counter whose TTL never landed
        // (crash between INCR and EXPIRE) is repaired on the next check
        // instead of counting forever.
        let _: i64 = redis::cmd("EXPIRE")
            .arg(&redis_key)
            .arg(window.as_secs() as i64)
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        if count <= limit {
            Ok(RateLimitResult {
                allowed: true,
                remaining: limit - count,
                retry_after_seconds: None,
            })
        } else {
            let ttl: i64 = conn.ttl(&redis_key).await?;
            Ok(RateLimitResult {
                allowed: false,
                remaining: 0,
                retry_after_seconds: Some(ttl.max(1) as u64),
            })
        }
    }

    /// Drop in-memory windows that have fully elapsed. No-op for Redis,
    /// where TTLs handle expiry.
    pub async fn cleanup(&self, window: Duration) {
        if let Backend::Memory(map) = &self.backend {
            let now = OffsetDateTime::now_utc();
            let mut windows = map.write().await;
            windows.retain(|_, w| now - w.window_start < window);
        }
    }
}
