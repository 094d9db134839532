//! # Rate Limiting
//!
//! Fixed-window rate limiting with blocking, built directly on the
//! [`CacheClient`].
//!
//! Each `(route, identifier)` pair owns a counter key
//! `<prefix><route>:<identifier>` and a sibling `...:blocked` key:
//! - **Open**: `consume` increments the counter; the first increment in a
//!   window sets the counter's expiry to the window duration.
//! - **Blocking**: an increment past `points` sets the block key (holding
//!   the block expiry timestamp) for `block_duration`.
//! - **Blocked**: while the block key exists, `consume` answers from it
//!   without touching the counter.
//! - **Reset**: once the keys expire the pair starts over with a fresh counter.
//!
//! A route with `block_duration == 0` never blocks. Requests over the limit
//! get `remaining: 0` but `blocked: false`; this is logged as a warning since
//! it effectively disables enforcement for the route.
//!
//! Cache failures degrade to "not blocked".
//!
//! ## Usage Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use newsroom_data::caching::{CacheClient, InMemoryCache};
//! use newsroom_data::middleware::rate_limiting::{RateLimitConfig, RateLimiter};
//!
//! # async fn demo() {
//! let client = Arc::new(CacheClient::new(Arc::new(InMemoryCache::new())));
//! let limiter = RateLimiter::new(client, RateLimitConfig::default());
//!
//! let decision = limiter.consume("login", "203.0.113.7").await;
//! if decision.blocked {
//!     println!("retry after {:?}", decision.retry_after());
//! }
//! # }
//! ```

use crate::caching::CacheClient;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Limits for one route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLimit {
    /// Requests allowed per window
    pub points: u32,

    /// Window length
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// How long an identifier stays blocked once over the limit; zero disables blocking
    #[serde(with = "humantime_serde", default)]
    pub block_duration: Duration,
}

impl RouteLimit {
    pub fn new(points: u32, duration: Duration, block_duration: Duration) -> Self {
        Self {
            points,
            duration,
            block_duration,
        }
    }
}

/// Configuration for rate limiting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Prepended to every counter key
    pub key_prefix: String,

    /// Limits for routes without an override
    pub default: RouteLimit,

    /// Per-route overrides
    pub routes: HashMap<String, RouteLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut routes = HashMap::new();
        routes.insert(
            "login".to_string(),
            RouteLimit::new(5, Duration::from_secs(15 * 60), Duration::from_secs(15 * 60)),
        );
        routes.insert(
            "register".to_string(),
            RouteLimit::new(3, Duration::from_secs(3600), Duration::from_secs(3600)),
        );
        routes.insert(
            "api".to_string(),
            RouteLimit::new(100, Duration::from_secs(60), Duration::ZERO),
        );

        Self {
            key_prefix: "ratelimit:".to_string(),
            default: RouteLimit::new(100, Duration::from_secs(60), Duration::ZERO),
            routes,
        }
    }
}

impl RateLimitConfig {
    /// Add or replace a route override
    pub fn with_route<S: Into<String>>(mut self, route: S, limit: RouteLimit) -> Self {
        self.routes.insert(route.into(), limit);
        self
    }
}

/// Outcome of a `consume` or `peek`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub blocked: bool,
    pub remaining: u32,
    /// When the window (or block) ends
    pub reset_at: DateTime<Utc>,
    /// Points per window for the route
    pub limit: u32,
}

impl RateLimitDecision {
    /// Time until a blocked caller may try again
    pub fn retry_after(&self) -> Option<Duration> {
        if !self.blocked {
            return None;
        }
        Some(
            (self.reset_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO),
        )
    }
}

/// Rate limiting metrics
#[derive(Debug, Default)]
pub struct RateLimitMetrics {
    pub requests_allowed: AtomicU64,
    pub requests_blocked: AtomicU64,
    pub requests_soft_capped: AtomicU64,
    pub cache_failures: AtomicU64,
}

/// Snapshot of rate limiting metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub requests_allowed: u64,
    pub requests_blocked: u64,
    pub requests_soft_capped: u64,
    pub cache_failures: u64,
}

/// Fixed-window rate limiter with blocking
#[derive(Debug)]
pub struct RateLimiter {
    client: Arc<CacheClient>,
    config: RateLimitConfig,
    metrics: RateLimitMetrics,
}

impl RateLimiter {
    pub fn new(client: Arc<CacheClient>, config: RateLimitConfig) -> Self {
        Self {
            client,
            config,
            metrics: RateLimitMetrics::default(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Limits in force for `route`; unconfigured routes get the default
    pub fn limits_for(&self, route: &str) -> &RouteLimit {
        self.config.routes.get(route).unwrap_or(&self.config.default)
    }

    pub fn counter_key(&self, route: &str, identifier: &str) -> String {
        format!("{}{}:{}", self.config.key_prefix, route, identifier)
    }

    pub fn block_key(&self, route: &str, identifier: &str) -> String {
        format!("{}:blocked", self.counter_key(route, identifier))
    }

    /// Count one request for `identifier` on `route`
    pub async fn consume(&self, route: &str, identifier: &str) -> RateLimitDecision {
        let limits = self.limits_for(route).clone();
        let counter_key = self.counter_key(route, identifier);
        let block_key = self.block_key(route, identifier);

        if let Some(until) = self.blocked_until(&block_key).await {
            self.metrics.requests_blocked.fetch_add(1, Ordering::Relaxed);
            debug!(route, identifier, "Request rejected, identifier is blocked");
            return RateLimitDecision {
                blocked: true,
                remaining: 0,
                reset_at: until,
                limit: limits.points,
            };
        }

        let count = match self.client.increment(&counter_key).await {
            Some(count) => count,
            None => {
                self.metrics.cache_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.requests_allowed.fetch_add(1, Ordering::Relaxed);
                warn!(route, identifier, "Rate limit counter unavailable, allowing request");
                return RateLimitDecision {
                    blocked: false,
                    remaining: limits.points,
                    reset_at: Utc::now() + to_chrono(limits.duration),
                    limit: limits.points,
                };
            }
        };

        if count == 1 {
            self.client.expire(&counter_key, limits.duration).await;
        }
        let reset_at = self.window_reset(&counter_key, &limits).await;

        if count <= i64::from(limits.points) {
            self.metrics.requests_allowed.fetch_add(1, Ordering::Relaxed);
            return RateLimitDecision {
                blocked: false,
                remaining: limits.points - count as u32,
                reset_at,
                limit: limits.points,
            };
        }

        if limits.block_duration.is_zero() {
            self.metrics
                .requests_soft_capped
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                route,
                identifier,
                count,
                points = limits.points,
                "Rate limit exceeded on a route without block duration; request not blocked"
            );
            return RateLimitDecision {
                blocked: false,
                remaining: 0,
                reset_at,
                limit: limits.points,
            };
        }

        let until = Utc::now() + to_chrono(limits.block_duration);
        self.client
            .set_with_ttl(&block_key, &until.timestamp_millis(), limits.block_duration)
            .await;
        self.metrics.requests_blocked.fetch_add(1, Ordering::Relaxed);
        debug!(
            route,
            identifier,
            block_secs = limits.block_duration.as_secs(),
            "Rate limit exceeded, identifier blocked"
        );

        RateLimitDecision {
            blocked: true,
            remaining: 0,
            reset_at: until,
            limit: limits.points,
        }
    }

    /// Current state for `identifier` on `route` without counting a request
    pub async fn peek(&self, route: &str, identifier: &str) -> RateLimitDecision {
        let limits = self.limits_for(route).clone();

        if let Some(until) = self.blocked_until(&self.block_key(route, identifier)).await {
            return RateLimitDecision {
                blocked: true,
                remaining: 0,
                reset_at: until,
                limit: limits.points,
            };
        }

        let counter_key = self.counter_key(route, identifier);
        let count: i64 = self.client.get_untracked(&counter_key).await.unwrap_or(0);
        let remaining = (i64::from(limits.points) - count).max(0) as u32;
        let reset_at = match self.client.ttl(&counter_key).await {
            Some(ttl) => Utc::now() + to_chrono(ttl),
            None => Utc::now() + to_chrono(limits.duration),
        };

        RateLimitDecision {
            blocked: false,
            remaining,
            reset_at,
            limit: limits.points,
        }
    }

    /// Forget the counter and any block for `identifier` on `route`
    pub async fn reset(&self, route: &str, identifier: &str) -> bool {
        let counter = self.client.delete(&self.counter_key(route, identifier)).await;
        let block = self.client.delete(&self.block_key(route, identifier)).await;
        counter && block
    }

    pub fn metrics(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            requests_allowed: self.metrics.requests_allowed.load(Ordering::Relaxed),
            requests_blocked: self.metrics.requests_blocked.load(Ordering::Relaxed),
            requests_soft_capped: self.metrics.requests_soft_capped.load(Ordering::Relaxed),
            cache_failures: self.metrics.cache_failures.load(Ordering::Relaxed),
        }
    }

    async fn blocked_until(&self, block_key: &str) -> Option<DateTime<Utc>> {
        let millis: i64 = self.client.get_untracked(block_key).await?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// End of the counter's window, repairing a missing expiry
    async fn window_reset(&self, counter_key: &str, limits: &RouteLimit) -> DateTime<Utc> {
        match self.client.ttl(counter_key).await {
            Some(ttl) => Utc::now() + to_chrono(ttl),
            None => {
                // The first increment's EXPIRE was lost; without it the counter never resets
                self.client.expire(counter_key, limits.duration).await;
                Utc::now() + to_chrono(limits.duration)
            }
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::InMemoryCache;

    fn limiter(config: RateLimitConfig) -> RateLimiter {
        let client = Arc::new(CacheClient::new(Arc::new(InMemoryCache::new())));
        RateLimiter::new(client, config)
    }

    #[test]
    fn test_unconfigured_route_uses_default() {
        let limiter = limiter(RateLimitConfig::default());
        assert_eq!(limiter.limits_for("search"), &limiter.config().default);
        assert_eq!(limiter.limits_for("login").points, 5);
    }

    #[test]
    fn test_key_layout() {
        let limiter = limiter(RateLimitConfig::default());
        assert_eq!(limiter.counter_key("login", "u1"), "ratelimit:login:u1");
        assert_eq!(limiter.block_key("login", "u1"), "ratelimit:login:u1:blocked");
    }

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let limiter = limiter(RateLimitConfig::default());

        limiter.consume("register", "u1").await;
        let before = limiter.peek("register", "u1").await;
        let after = limiter.peek("register", "u1").await;

        assert_eq!(before.remaining, 2);
        assert_eq!(after.remaining, 2);
        assert!(!after.blocked);
    }

    #[tokio::test]
    async fn test_reset_clears_block() {
        let limiter = limiter(RateLimitConfig::default());
        for _ in 0..4 {
            limiter.consume("register", "u1").await;
        }
        assert!(limiter.consume("register", "u1").await.blocked);

        limiter.reset("register", "u1").await;

        let decision = limiter.consume("register", "u1").await;
        assert!(!decision.blocked);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let limiter = limiter(RateLimitConfig::default());
        for _ in 0..4 {
            limiter.consume("register", "a").await;
        }
        let other = limiter.consume("register", "b").await;
        assert!(!other.blocked);
        assert_eq!(other.remaining, 2);
    }

    #[test]
    fn test_retry_after() {
        let decision = RateLimitDecision {
            blocked: true,
            remaining: 0,
            reset_at: Utc::now() + chrono::Duration::seconds(30),
            limit: 5,
        };
        let retry = decision.retry_after().unwrap();
        assert!(retry <= Duration::from_secs(30));
        assert!(retry > Duration::from_secs(25));

        let open = RateLimitDecision {
            blocked: false,
            ..decision
        };
        assert!(open.retry_after().is_none());
    }

    #[test]
    fn test_route_limit_yaml() {
        let limit: RouteLimit = serde_yaml::from_str("points: 3\nduration: 1h\n").unwrap();
        assert_eq!(limit.points, 3);
        assert_eq!(limit.duration, Duration::from_secs(3600));
        assert_eq!(limit.block_duration, Duration::ZERO);
    }
}
