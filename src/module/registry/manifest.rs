//! Catalog manifest parsing
//!
//! A catalog manifest is a TOML file listing modules and their variants for
//! bulk import:
//!
//! ```toml
//! [[modules]]
//! slug = "alerts"
//! name = "Alerts"
//! category = "operations"
//!
//! [[modules.variants]]
//! implementation_key = "standard"
//! component_path = "alerts/StandardAlerts"
//!
//! [modules.variants.default_config]
//! channel = "email"
//! ```

use crate::module::traits::ModuleError;
use crate::module::types::{NewModule, NewVariant};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Catalog manifest (catalog.toml structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogManifest {
    #[serde(default)]
    pub modules: Vec<ManifestModule>,
}

/// One module entry in a manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestModule {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub variants: Vec<NewVariant>,
}

impl ManifestModule {
    pub fn to_new_module(&self) -> NewModule {
        NewModule {
            slug: self.slug.clone(),
            name: self.name.clone(),
            category: self.category.clone(),
        }
    }
}

impl CatalogManifest {
    /// Load manifest from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModuleError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ModuleError::InvalidManifest(format!("Failed to read manifest file: {}", e))
        })?;
        Self::parse(&contents)
    }

    /// Parse manifest TOML
    pub fn parse(contents: &str) -> Result<Self, ModuleError> {
        toml::from_str(contents).map_err(|e| {
            ModuleError::InvalidManifest(format!("Failed to parse manifest TOML: {}", e))
        })
    }
}
