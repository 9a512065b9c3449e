//! Configuration management for the module engine
//!
//! Handles configuration loading (TOML or JSON), environment overrides and validation.

use crate::module::registry::ImplementationDescriptor;
use crate::storage::database::{default_backend, DatabaseBackend};
use crate::utils::{env_opt, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Overrides `storage.data_dir`
pub const ENV_DATA_DIR: &str = "MODULE_ENGINE_DATA_DIR";
/// Overrides `storage.database_backend`
pub const ENV_BACKEND: &str = "MODULE_ENGINE_BACKEND";

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration (None = RUST_LOG or "info")
    #[serde(default)]
    pub logging: Option<LoggingConfig>,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,

    #[serde(default)]
    pub validation: ConfigValidationConfig,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database backend
    #[serde(default = "default_database_backend")]
    pub database_backend: DatabaseBackendConfig,

    /// Data directory for durable backends
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

/// Database backend configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackendConfig {
    /// Use sled database
    Sled,
    /// Use redb database (default, recommended)
    Redb,
    /// Ephemeral in-memory store
    Memory,
    /// Auto-select based on availability
    Auto,
}

impl DatabaseBackendConfig {
    pub fn resolve(self) -> DatabaseBackend {
        match self {
            DatabaseBackendConfig::Sled => DatabaseBackend::Sled,
            DatabaseBackendConfig::Redb => DatabaseBackend::Redb,
            DatabaseBackendConfig::Memory => DatabaseBackend::Memory,
            DatabaseBackendConfig::Auto => default_backend(),
        }
    }
}

impl std::str::FromStr for DatabaseBackendConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sled" => Ok(Self::Sled),
            "redb" => Ok(Self::Redb),
            "memory" => Ok(Self::Memory),
            "auto" => Ok(Self::Auto),
            other => Err(anyhow::anyhow!("Unknown database backend: {}", other)),
        }
    }
}

fn default_database_backend() -> DatabaseBackendConfig {
    DatabaseBackendConfig::Auto
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_backend: DatabaseBackendConfig::Auto,
            data_dir: "data".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive (e.g. "info", "tenant_module_engine::module=debug")
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Archive/backup lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// How long pre-archive backups are kept (seconds)
    #[serde(default = "default_backup_retention_secs")]
    pub backup_retention_secs: u64,

    /// Administrators are notified when a sweep frees more than this many bytes
    #[serde(default = "default_notify_threshold_bytes")]
    pub notify_threshold_bytes: u64,

    /// `backup_type` recorded on cascade backups
    #[serde(default = "default_backup_type")]
    pub backup_type: String,
}

fn default_backup_retention_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_notify_threshold_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_backup_type() -> String {
    "pre_archive".to_string()
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            backup_retention_secs: default_backup_retention_secs(),
            notify_threshold_bytes: default_notify_threshold_bytes(),
            backup_type: default_backup_type(),
        }
    }
}

/// Variant resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Reserved implementation key used when no audience match exists
    #[serde(default = "default_implementation_key")]
    pub default_implementation_key: String,

    /// tenant_id -> audience
    #[serde(default)]
    pub tenant_audiences: HashMap<String, String>,

    /// audience -> implementation_key
    #[serde(default)]
    pub audience_keys: HashMap<String, String>,

    /// Known implementations, keyed by `implementation_key`
    #[serde(default)]
    pub registry: Vec<ImplementationDescriptor>,
}

fn default_implementation_key() -> String {
    "standard".to_string()
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            default_implementation_key: default_implementation_key(),
            tenant_audiences: HashMap::new(),
            audience_keys: HashMap::new(),
            registry: Vec::new(),
        }
    }
}

/// Limits applied to tenant config documents and overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValidationConfig {
    /// Maximum encoded size of a config document
    #[serde(default = "default_max_config_bytes")]
    pub max_config_bytes: usize,

    /// Maximum nesting depth
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_config_bytes() -> usize {
    64 * 1024
}

fn default_max_depth() -> usize {
    16
}

impl Default for ConfigValidationConfig {
    fn default() -> Self {
        Self {
            max_config_bytes: default_max_config_bytes(),
            max_depth: default_max_depth(),
        }
    }
}

/// Compare-and-swap retry policy for assignment writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    25
}

fn default_max_backoff_ms() -> u64 {
    500
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ConcurrencyConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

/// Administrator notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Static administrator recipients
    #[serde(default)]
    pub administrators: Vec<String>,

    /// How long the resolved recipient list is cached (seconds)
    #[serde(default = "default_recipients_cache_ttl_secs")]
    pub recipients_cache_ttl_secs: u64,

    /// Webhook endpoint (used with the `webhook` feature)
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_recipients_cache_ttl_secs() -> u64 {
    300
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            administrators: Vec::new(),
            recipients_cache_ttl_secs: default_recipients_cache_ttl_secs(),
            webhook_url: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a file, choosing the format by extension
    ///
    /// `.json` is parsed as JSON, everything else as TOML.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_toml_file(path),
        }
    }

    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `MODULE_ENGINE_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Some(dir) = env_opt(ENV_DATA_DIR) {
            self.storage.data_dir = dir;
        }
        if let Some(backend) = env_opt(ENV_BACKEND) {
            self.storage.database_backend = backend.parse()?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.resolution.default_implementation_key.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "resolution.default_implementation_key must not be empty"
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for descriptor in &self.resolution.registry {
            if !seen.insert(descriptor.key.as_str()) {
                return Err(anyhow::anyhow!(
                    "Duplicate implementation key in registry: {}",
                    descriptor.key
                ));
            }
        }

        if self.lifecycle.backup_retention_secs == 0 {
            return Err(anyhow::anyhow!(
                "lifecycle.backup_retention_secs must be greater than 0"
            ));
        }

        if self.concurrency.max_attempts == 0 {
            return Err(anyhow::anyhow!(
                "concurrency.max_attempts must be greater than 0"
            ));
        }

        if self.concurrency.initial_backoff_ms > self.concurrency.max_backoff_ms {
            return Err(anyhow::anyhow!(
                "concurrency.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.concurrency.initial_backoff_ms,
                self.concurrency.max_backoff_ms
            ));
        }

        if self.validation.max_depth == 0 || self.validation.max_config_bytes == 0 {
            return Err(anyhow::anyhow!(
                "validation limits must be greater than 0"
            ));
        }

        if self.storage.database_backend != DatabaseBackendConfig::Memory
            && self.storage.data_dir.trim().is_empty()
        {
            return Err(anyhow::anyhow!(
                "storage.data_dir is required for durable backends"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lifecycle.backup_retention_secs, 2_592_000);
        assert_eq!(config.lifecycle.notify_threshold_bytes, 104_857_600);
        assert_eq!(config.resolution.default_implementation_key, "standard");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [storage]
            database_backend = "memory"

            [resolution.audience_keys]
            enterprise = "advanced"

            [[resolution.registry]]
            key = "advanced"
            display_name = "Advanced"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.database_backend, DatabaseBackendConfig::Memory);
        assert_eq!(config.storage.data_dir, "data");
        assert_eq!(config.resolution.audience_keys["enterprise"], "advanced");
        assert_eq!(config.resolution.registry.len(), 1);
        assert_eq!(config.concurrency.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_registry_key_rejected() {
        let mut config = EngineConfig::default();
        let descriptor = ImplementationDescriptor::new("standard", "Standard");
        config.resolution.registry = vec![descriptor.clone(), descriptor];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let mut config = EngineConfig::default();
        config.concurrency.initial_backoff_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!(
            "REDB".parse::<DatabaseBackendConfig>().unwrap(),
            DatabaseBackendConfig::Redb
        );
        assert!("postgres".parse::<DatabaseBackendConfig>().is_err());
    }

    #[test]
    fn test_json_config_file_loads() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("engine.json");
        let mut config = EngineConfig::default();
        config.notifications.administrators = vec!["ops@example.com".to_string()];
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.notifications.administrators, config.notifications.administrators);
    }
}
