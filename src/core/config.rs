//! # Configuration Module
//!
//! Loading and validation of the data-layer configuration.
//!
//! ## Key Features
//! - YAML configuration parsing with serde
//! - Environment variable overrides (`REDIS_HOST`, `RATE_LIMIT_POINTS`, ...)
//! - Human-readable durations (`15m`, `1h`) via `humantime`
//! - Validation that reports every problem at once

use crate::core::error::{DataError, DataResult};
use crate::middleware::rate_limiting::{RateLimitConfig, RouteLimit};
use crate::observability::config::{LogConfig, LogFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete data-layer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLayerConfig {
    /// Key-value cache connection settings
    pub cache: CacheConfig,

    /// Default TTLs per domain area
    pub ttl: CacheTtlConfig,

    /// Rate limiter defaults and per-route overrides
    pub rate_limit: RateLimitConfig,

    /// Relational store connection pool
    pub database: DatabaseConfig,

    pub logging: LogConfig,
}

impl DataLayerConfig {
    /// Load configuration from a YAML file, then apply environment overrides
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> DataResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DataError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: DataLayerConfig = serde_yaml::from_str(&content)
            .map_err(|e| DataError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> DataResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> DataResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> DataResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Cache connection
        if let Some(backend) = lookup("CACHE_BACKEND") {
            self.cache.backend = match backend.to_lowercase().as_str() {
                "redis" => CacheBackendKind::Redis,
                "memory" => CacheBackendKind::Memory,
                other => {
                    return Err(DataError::config(format!(
                        "Invalid CACHE_BACKEND: {}",
                        other
                    )))
                }
            };
        }
        if let Some(host) = lookup("REDIS_HOST") {
            self.cache.host = host;
        }
        if let Some(port) = lookup("REDIS_PORT") {
            self.cache.port = port
                .parse()
                .map_err(|e| DataError::config(format!("Invalid REDIS_PORT: {}", e)))?;
        }
        if let Some(password) = lookup("REDIS_PASSWORD") {
            self.cache.password = if password.is_empty() {
                None
            } else {
                Some(password)
            };
        }
        if let Some(db) = lookup("REDIS_DB") {
            self.cache.db = db
                .parse()
                .map_err(|e| DataError::config(format!("Invalid REDIS_DB: {}", e)))?;
        }
        if let Some(prefix) = lookup("REDIS_KEY_PREFIX") {
            self.cache.key_prefix = prefix;
        }

        // TTLs
        if let Some(value) = lookup("CACHE_TTL_SESSION") {
            self.ttl.session = parse_duration("CACHE_TTL_SESSION", &value)?;
        }
        if let Some(value) = lookup("CACHE_TTL_ENTITY") {
            self.ttl.entity = parse_duration("CACHE_TTL_ENTITY", &value)?;
        }
        if let Some(value) = lookup("CACHE_TTL_POPULAR") {
            self.ttl.popular = parse_duration("CACHE_TTL_POPULAR", &value)?;
        }
        if let Some(value) = lookup("CACHE_TTL_USER_PREFERENCES") {
            self.ttl.user_preferences = parse_duration("CACHE_TTL_USER_PREFERENCES", &value)?;
        }

        // Rate limit defaults
        if let Some(points) = lookup("RATE_LIMIT_POINTS") {
            self.rate_limit.default.points = points
                .parse()
                .map_err(|e| DataError::config(format!("Invalid RATE_LIMIT_POINTS: {}", e)))?;
        }
        if let Some(value) = lookup("RATE_LIMIT_DURATION") {
            self.rate_limit.default.duration = parse_duration("RATE_LIMIT_DURATION", &value)?;
        }
        if let Some(value) = lookup("RATE_LIMIT_BLOCK_DURATION") {
            self.rate_limit.default.block_duration =
                parse_duration("RATE_LIMIT_BLOCK_DURATION", &value)?;
        }

        // Database
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = if url.is_empty() { None } else { Some(url) };
        }
        if let Some(size) = lookup("DATABASE_POOL_SIZE") {
            self.database.pool_size = size
                .parse()
                .map_err(|e| DataError::config(format!("Invalid DATABASE_POOL_SIZE: {}", e)))?;
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(DataError::config(format!("Invalid LOG_FORMAT: {}", other)))
                }
            };
        }

        Ok(())
    }

    /// Validate the configuration, collecting every problem found
    pub fn validate(&self) -> DataResult<()> {
        let mut errors = Vec::new();

        if self.cache.backend == CacheBackendKind::Redis && self.cache.host.is_empty() {
            errors.push("cache.host cannot be empty when using the redis backend".to_string());
        }

        for (name, ttl) in [
            ("session", self.ttl.session),
            ("entity", self.ttl.entity),
            ("popular", self.ttl.popular),
            ("user_preferences", self.ttl.user_preferences),
        ] {
            if ttl.as_secs() == 0 {
                errors.push(format!("ttl.{} must be at least one second", name));
            }
        }

        validate_route_limit("rate_limit.default", &self.rate_limit.default, &mut errors);
        for (route, limit) in &self.rate_limit.routes {
            if route.is_empty() {
                errors.push("rate_limit.routes contains an empty route name".to_string());
            }
            validate_route_limit(&format!("rate_limit.routes.{}", route), limit, &mut errors);
        }

        if self.database.pool_size == 0 {
            errors.push("database.pool_size must be greater than 0".to_string());
        }
        if let Some(min) = self.database.min_connections {
            if min > self.database.pool_size {
                errors.push(format!(
                    "database.min_connections ({}) exceeds pool_size ({})",
                    min, self.database.pool_size
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DataError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )))
        }
    }
}

fn validate_route_limit(name: &str, limit: &RouteLimit, errors: &mut Vec<String>) {
    if limit.points == 0 {
        errors.push(format!("{}.points must be greater than 0", name));
    }
    if limit.duration.as_secs() == 0 {
        errors.push(format!("{}.duration must be at least one second", name));
    }
}

/// Accepts bare seconds (`900`) or humantime strings (`15m`)
fn parse_duration(name: &str, value: &str) -> DataResult<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value.trim())
        .map_err(|e| DataError::config(format!("Invalid {}: {}", name, e)))
}

/// Which cache store backs the cache client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Redis,
    Memory,
}

/// Cache store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Logical database index
    pub db: u32,
    /// Prefix applied by the store to every key
    pub key_prefix: String,
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
    pub max_retries: u32,
}

impl CacheConfig {
    /// Connection URL in `redis://[:password@]host:port/db` form, with the
    /// password percent-encoded
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                urlencoding::encode(password),
                self.host,
                self.port,
                self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Redis,
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            key_prefix: "newsroom:".to_string(),
            connection_timeout: Duration::from_secs(5),
            max_retries: 2,
        }
    }
}

/// Default cache TTLs per domain area
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtlConfig {
    #[serde(with = "humantime_serde")]
    pub session: Duration,
    /// Articles, users, organizations
    #[serde(with = "humantime_serde")]
    pub entity: Duration,
    /// Aggregated "popular" listings
    #[serde(with = "humantime_serde")]
    pub popular: Duration,
    #[serde(with = "humantime_serde")]
    pub user_preferences: Duration,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            session: Duration::from_secs(24 * 60 * 60),
            entity: Duration::from_secs(60 * 60),
            popular: Duration::from_secs(10 * 60),
            user_preferences: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Relational store connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `postgres://` URL; `None` disables the relational backend
    pub url: Option<String>,
    pub pool_size: u32,
    pub min_connections: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Option<Duration>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 20,
            min_connections: None,
            connect_timeout: Duration::from_secs(2),
            idle_timeout: Some(Duration::from_secs(30)),
            max_lifetime: Some(Duration::from_secs(30 * 60)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config_validation() {
        let config = DataLayerConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_route_overrides() {
        let config = DataLayerConfig::default();
        let login = config.rate_limit.routes.get("login").unwrap();
        let api = config.rate_limit.routes.get("api").unwrap();
        assert!(login.points < api.points);
        assert!(login.block_duration > Duration::ZERO);
        assert!(config.rate_limit.routes.contains_key("register"));
    }

    #[test]
    fn test_cache_url() {
        let mut cache = CacheConfig::default();
        assert_eq!(cache.url(), "redis://localhost:6379/0");

        cache.password = Some("s3cret".to_string());
        cache.db = 2;
        assert_eq!(cache.url(), "redis://:s3cret@localhost:6379/2");
    }

    #[test]
    fn test_cache_url_encodes_password() {
        let cache = CacheConfig {
            password: Some("p@ss/w:rd".to_string()),
            ..Default::default()
        };
        assert_eq!(cache.url(), "redis://:p%40ss%2Fw%3Ard@localhost:6379/0");

        let client = redis::Client::open(cache.url()).unwrap();
        let info = client.get_connection_info();
        assert_eq!(info.redis.password.as_deref(), Some("p@ss/w:rd"));
        assert_eq!(info.redis.db, 0);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = DataLayerConfig::default();
        config
            .apply_overrides_from(lookup_from(&[
                ("REDIS_HOST", "cache.internal"),
                ("REDIS_PORT", "6380"),
                ("REDIS_DB", "3"),
                ("CACHE_TTL_ENTITY", "15m"),
                ("CACHE_TTL_POPULAR", "120"),
                ("RATE_LIMIT_POINTS", "50"),
                ("RATE_LIMIT_BLOCK_DURATION", "5m"),
                ("DATABASE_URL", "postgres://news:pw@db/news"),
                ("LOG_FORMAT", "text"),
            ]))
            .unwrap();

        assert_eq!(config.cache.host, "cache.internal");
        assert_eq!(config.cache.port, 6380);
        assert_eq!(config.cache.db, 3);
        assert_eq!(config.ttl.entity, Duration::from_secs(900));
        assert_eq!(config.ttl.popular, Duration::from_secs(120));
        assert_eq!(config.rate_limit.default.points, 50);
        assert_eq!(
            config.rate_limit.default.block_duration,
            Duration::from_secs(300)
        );
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://news:pw@db/news")
        );
        assert!(matches!(config.logging.format, LogFormat::Text));
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = DataLayerConfig::default();
        let result = config.apply_overrides_from(lookup_from(&[("REDIS_PORT", "not-a-port")]));
        assert!(matches!(result, Err(DataError::Configuration { .. })));

        let result = config.apply_overrides_from(lookup_from(&[("CACHE_BACKEND", "memcached")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = DataLayerConfig::default();
        config.ttl.entity = Duration::ZERO;
        config.rate_limit.default.points = 0;
        config.database.pool_size = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("ttl.entity"));
        assert!(err.contains("rate_limit.default.points"));
        assert!(err.contains("database.pool_size"));
    }

    #[tokio::test]
    async fn test_load_config_from_yaml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("newsroom.yaml");

        let config_content = r#"
cache:
  backend: memory
  key_prefix: "test:"
ttl:
  entity: "30m"
rate_limit:
  key_prefix: "rl:"
  default:
    points: 10
    duration: "1m"
    block_duration: "0s"
  routes:
    login:
      points: 3
      duration: "10m"
      block_duration: "10m"
database:
  pool_size: 5
  min_connections: 1
logging:
  level: debug
  format: text
"#;
        tokio::fs::write(&config_path, config_content).await.unwrap();

        let config = DataLayerConfig::load_from_file(&config_path).await.unwrap();
        assert_eq!(config.cache.backend, CacheBackendKind::Memory);
        assert_eq!(config.cache.key_prefix, "test:");
        assert_eq!(config.ttl.entity, Duration::from_secs(1800));
        // Unspecified sections keep their defaults
        assert_eq!(config.ttl.session, Duration::from_secs(86400));
        assert_eq!(config.rate_limit.default.points, 10);
        assert_eq!(config.rate_limit.routes.len(), 1);
        assert_eq!(config.database.pool_size, 5);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_sample_config_parses() {
        let config: DataLayerConfig =
            serde_yaml::from_str(include_str!("../../config/newsroom.yaml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit, RateLimitConfig::default());
        assert_eq!(config.ttl.user_preferences, Duration::from_secs(7 * 86400));
    }

    #[tokio::test]
    async fn test_load_config_missing_file() {
        let result = DataLayerConfig::load_from_file("/nonexistent/newsroom.yaml").await;
        assert!(matches!(result, Err(DataError::Configuration { .. })));
    }
}
