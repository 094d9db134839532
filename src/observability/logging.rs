//! # Structured Logging
//!
//! Installs the process-wide `tracing` subscriber.
//!
//! The level comes from `RUST_LOG` when it is set, otherwise from
//! [`LogConfig::level`]. Output is either JSON lines or human-readable text.

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::error::{DataError, DataResult};
use crate::observability::config::{LogConfig, LogFormat};

/// Initialize the tracing subscriber.
///
/// Returns `Ok(false)` when a global subscriber was already installed (tests,
/// embedding applications); that is not treated as an error.
pub fn init_logging(config: &LogConfig) -> DataResult<bool> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            DataError::config(format!("Invalid log level '{}': {}", config.level, e))
        })?,
    };

    let installed = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
            .is_ok(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
            .is_ok(),
    };

    if installed {
        info!(level = %config.level, format = ?config.format, "Structured logging initialized");
    } else {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }

    Ok(installed)
}

/// Mask the password in a connection URL before logging it.
pub fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if colon_pos >= scheme_end {
                return format!("{}:****{}", &url[..colon_pos], &url[at_pos..]);
            }
        }
    }
    url.to_string()
}
