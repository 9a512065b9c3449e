//! Tenant config validation
//!
//! Config documents are opaque to the engine except for shape limits: they
//! must be JSON objects, bounded in encoded size and nesting depth, with
//! non-empty keys.

use serde_json::Value;
use tracing::debug;

use crate::config::ConfigValidationConfig;
use crate::module::validation::ValidationResult;

/// Config document validator
#[derive(Debug, Clone)]
pub struct ConfigValidator {
    max_config_bytes: usize,
    max_depth: usize,
}

impl ConfigValidator {
    pub fn new(config: &ConfigValidationConfig) -> Self {
        Self {
            max_config_bytes: config.max_config_bytes,
            max_depth: config.max_depth,
        }
    }

    /// Validate a config document
    pub fn validate(&self, config: &Value) -> ValidationResult {
        let mut errors = Vec::new();

        if !config.is_object() {
            errors.push(format!(
                "Config must be a JSON object, got {}",
                json_type_name(config)
            ));
            return ValidationResult::Invalid(errors);
        }

        let size = serde_json::to_vec(config).map(|b| b.len()).unwrap_or(usize::MAX);
        if size > self.max_config_bytes {
            errors.push(format!(
                "Config is {} bytes, exceeds limit of {} bytes",
                size, self.max_config_bytes
            ));
        }

        let depth = depth_of(config);
        if depth > self.max_depth {
            errors.push(format!(
                "Config nesting depth {} exceeds limit of {}",
                depth, self.max_depth
            ));
        }

        collect_empty_keys(config, "$", &mut errors);

        if !errors.is_empty() {
            debug!("Config validation failed: {:?}", errors);
        }
        ValidationResult::from_errors(errors)
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new(&ConfigValidationConfig::default())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn depth_of(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(depth_of).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(depth_of).max().unwrap_or(0),
        _ => 0,
    }
}

fn collect_empty_keys(value: &Value, path: &str, errors: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key.trim().is_empty() {
                    errors.push(format!("Empty key at {}", path));
                }
                collect_empty_keys(child, &format!("{}.{}", path, key), errors);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_empty_keys(child, &format!("{}[{}]", path, i), errors);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_required() {
        let validator = ConfigValidator::default();
        assert!(validator.validate(&json!({"a": 1})).is_valid());
        assert!(validator.validate(&json!({})).is_valid());
        assert!(!validator.validate(&json!([1, 2])).is_valid());
        assert!(!validator.validate(&json!("x")).is_valid());
    }

    #[test]
    fn test_depth_limit() {
        let validator = ConfigValidator::new(&ConfigValidationConfig {
            max_config_bytes: 1024,
            max_depth: 2,
        });
        assert!(validator.validate(&json!({"a": {"b": 1}})).is_valid());
        assert!(!validator.validate(&json!({"a": {"b": {"c": 1}}})).is_valid());
    }

    #[test]
    fn test_size_limit() {
        let validator = ConfigValidator::new(&ConfigValidationConfig {
            max_config_bytes: 16,
            max_depth: 4,
        });
        assert!(!validator
            .validate(&json!({"message": "this is far too long"}))
            .is_valid());
    }

    #[test]
    fn test_empty_keys_reported_with_path() {
        let validator = ConfigValidator::default();
        match validator.validate(&json!({"a": {"": 1}})) {
            ValidationResult::Invalid(errors) => assert_eq!(errors, vec!["Empty key at $.a"]),
            ValidationResult::Valid => panic!("expected invalid"),
        }
    }
}
