//! Utility modules: time, retry, caching, logging and process plumbing

pub mod env;
pub mod error;
pub mod logging;
pub mod retry;
pub mod signal;
pub mod time;
pub mod ttl_cache;

// Re-export commonly used items
pub use env::{env_bool, env_int, env_opt};
pub use error::log_error_async;
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
pub use retry::{retry_if_retryable, IsRetryable, RetryConfig};
pub use signal::create_shutdown_receiver;
pub use time::{Clock, ManualClock, SystemClock};
pub use ttl_cache::TtlCache;
