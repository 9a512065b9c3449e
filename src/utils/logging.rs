//! Logging initialization
//!
//! - Respects the RUST_LOG environment variable
//! - Falls back to the filter from `LoggingConfig`, then to "info"
//! - Optional JSON output behind the `json-logging` feature
//!
//! # Usage
//! ```rust,no_run
//! use tenant_module_engine::utils::init_logging;
//!
//! init_logging(None); // Uses RUST_LOG or defaults to "info"
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Pick the effective filter: RUST_LOG, then config, then "info"
fn resolve_filter(filter: Option<&str>) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(filter.unwrap_or("info"))
}

/// Initialize human-readable logging to stderr
///
/// # Arguments
/// * `filter` - Optional log filter from config (e.g., "info",
///   "tenant_module_engine::module=debug"). RUST_LOG takes precedence.
pub fn init_logging(filter: Option<&str>) {
    // try_init so repeated initialization (tests, embedding) is not fatal
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(resolve_filter(filter))
        .try_init();
}

/// Initialize logging with JSON output (for log aggregation)
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(resolve_filter(filter))
        .try_init();
}

/// Initialize logging from `EngineConfig.logging`
///
/// ```rust,no_run
/// use tenant_module_engine::config::EngineConfig;
/// use tenant_module_engine::utils::init_logging_from_config;
///
/// let config = EngineConfig::default();
/// init_logging_from_config(config.logging.as_ref());
/// ```
pub fn init_logging_from_config(config: Option<&crate::config::LoggingConfig>) {
    let filter = config.and_then(|c| c.filter.as_deref());

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            tracing::warn!("json_format requested but json-logging feature is disabled");
            init_logging(filter);
        }
    } else {
        init_logging(filter);
    }
}
