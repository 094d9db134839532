//! Request-path guards built on the cache client.

pub mod rate_limiting;

pub use rate_limiting::{
    RateLimitConfig, RateLimitDecision, RateLimitMetricsSnapshot, RateLimiter, RouteLimit,
};
