// src/observability/mod.rs
//! Logging and metrics setup
//!
//! Library code only emits `tracing` events and `metrics` counters; the
//! binary decides where they go.

use crate::utils::config::LoggingConfig;
use crate::utils::errors::{Result, SockyError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Sockets constructed, labelled by provider
pub const SOCKETS_CREATED: &str = "socky_sockets_created_total";

/// Interception enable/disable transitions, labelled by transition
pub const TRANSITIONS: &str = "socky_interception_transitions_total";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| SockyError::Configuration(format!("invalid log level {}: {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| SockyError::Configuration(format!("failed to install tracing subscriber: {}", e)))
}
