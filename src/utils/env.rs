//! Environment variable utilities
//!
//! Provides helpers for reading optional environment overrides.

/// Get environment variable as Option
///
/// Returns `Some(value)` if set and non-empty, `None` otherwise.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get environment variable as boolean
///
/// Returns `true` if value is "true", "1", "yes", "on" (case-insensitive).
/// Returns `false` otherwise or if not set.
pub fn env_bool(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(false)
}

/// Get environment variable as integer
///
/// Returns `Some(value)` if set and parseable, `None` otherwise.
pub fn env_int<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    std::env::var(key).ok()?.parse().ok()
}
