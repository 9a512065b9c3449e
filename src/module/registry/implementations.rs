//! Implementation registry
//!
//! Explicit mapping from `implementation_key` to the descriptor the rendering
//! layer needs. Populated once at startup. Unknown keys map to the default
//! entry; that is a presentation fallback and is unrelated to variant
//! availability, which the resolver checks separately.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::ResolutionConfig;
use crate::module::traits::ModuleError;

/// What the UI layer needs to know about an implementation key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationDescriptor {
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Features this implementation exposes
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ImplementationDescriptor {
    pub fn new(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            description: String::new(),
            capabilities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImplementationRegistry {
    entries: HashMap<String, ImplementationDescriptor>,
    default_key: String,
}

impl ImplementationRegistry {
    /// Registry holding only a default entry for `default_key`
    pub fn new(default_key: impl Into<String>) -> Self {
        let default_key = default_key.into();
        let mut entries = HashMap::new();
        entries.insert(
            default_key.clone(),
            ImplementationDescriptor::new(default_key.clone(), "Standard"),
        );
        Self {
            entries,
            default_key,
        }
    }

    /// Build from configuration; configured entries replace the built-in default
    pub fn from_config(config: &ResolutionConfig) -> Self {
        let mut registry = Self::new(config.default_implementation_key.clone());
        for descriptor in &config.registry {
            // The default entry may be described in config; any other key only once
            if descriptor.key == registry.default_key {
                registry
                    .entries
                    .insert(descriptor.key.clone(), descriptor.clone());
            } else if let Err(e) = registry.register(descriptor.clone()) {
                warn!("Ignoring registry entry: {}", e);
            }
        }
        debug!("Implementation registry initialized: {:?}", registry.keys());
        registry
    }

    /// Add a new entry
    pub fn register(&mut self, descriptor: ImplementationDescriptor) -> Result<(), ModuleError> {
        if self.entries.contains_key(&descriptor.key) {
            return Err(ModuleError::AlreadyExists(format!(
                "implementation key {}",
                descriptor.key
            )));
        }
        self.entries.insert(descriptor.key.clone(), descriptor);
        Ok(())
    }

    /// Descriptor for `key`, or the default entry when the key is unknown
    pub fn get(&self, key: &str) -> &ImplementationDescriptor {
        self.entries
            .get(key)
            .unwrap_or_else(|| self.default_descriptor())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    pub fn default_descriptor(&self) -> &ImplementationDescriptor {
        // The default entry is inserted by `new` and never removed
        &self.entries[&self.default_key]
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for ImplementationRegistry {
    fn default() -> Self {
        Self::new("standard")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_key_maps_to_default_entry() {
        let registry = ImplementationRegistry::default();
        assert_eq!(registry.get("does-not-exist").key, "standard");
        assert!(!registry.contains("does-not-exist"));
    }

    #[test]
    fn test_config_entries_override_default() {
        let mut config = ResolutionConfig::default();
        let mut standard = ImplementationDescriptor::new("standard", "Classic");
        standard.capabilities = vec!["email".into()];
        config.registry = vec![standard, ImplementationDescriptor::new("advanced", "Advanced")];

        let registry = ImplementationRegistry::from_config(&config);
        assert_eq!(registry.get("standard").display_name, "Classic");
        assert_eq!(registry.get("advanced").display_name, "Advanced");
        assert_eq!(registry.keys(), vec!["advanced", "standard"]);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = ImplementationRegistry::default();
        assert!(registry
            .register(ImplementationDescriptor::new("lite", "Lite"))
            .is_ok());
        assert!(matches!(
            registry.register(ImplementationDescriptor::new("lite", "Lite")),
            Err(ModuleError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_duplicate_config_entry_keeps_first() {
        let mut config = ResolutionConfig::default();
        config.registry = vec![
            ImplementationDescriptor::new("advanced", "Advanced"),
            ImplementationDescriptor::new("advanced", "Shadowed"),
        ];

        let registry = ImplementationRegistry::from_config(&config);
        assert_eq!(registry.get("advanced").display_name, "Advanced");
    }
}
