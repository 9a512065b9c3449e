//! Catalog manifest validation
//!
//! Validates manifests for structure before any row is written.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::module::registry::manifest::CatalogManifest;
use crate::module::types::NewVariant;
use crate::module::validation::{ConfigValidator, ValidationResult};

/// Validate slug / implementation key format
///
/// Alphanumeric with dashes and underscores, starting alphanumeric, at most 64 chars.
#[inline]
pub fn is_valid_slug(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }

    if !name.chars().next().map_or(false, |c| c.is_ascii_alphanumeric()) {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Manifest validator
pub struct ManifestValidator {
    config_validator: ConfigValidator,
    /// Maximum number of modules in one manifest
    max_modules: usize,
}

impl ManifestValidator {
    /// Create a new manifest validator
    pub fn new(config_validator: ConfigValidator) -> Self {
        Self {
            config_validator,
            max_modules: 1024,
        }
    }

    /// Validate a catalog manifest
    pub fn validate(&self, manifest: &CatalogManifest) -> ValidationResult {
        let mut errors = Vec::new();

        if manifest.modules.len() > self.max_modules {
            errors.push(format!(
                "Manifest lists {} modules, limit is {}",
                manifest.modules.len(),
                self.max_modules
            ));
        }

        let mut slugs = HashSet::new();
        for module in &manifest.modules {
            if !is_valid_slug(&module.slug) {
                errors.push(format!(
                    "Invalid module slug: {} (must be alphanumeric with dashes/underscores)",
                    module.slug
                ));
            }
            if !slugs.insert(module.slug.as_str()) {
                errors.push(format!("Duplicate module slug: {}", module.slug));
            }
            if module.name.trim().is_empty() {
                errors.push(format!("Module name cannot be empty ({})", module.slug));
            }

            let mut keys = HashSet::new();
            for variant in &module.variants {
                if !keys.insert(variant.implementation_key.as_str()) {
                    errors.push(format!(
                        "Duplicate implementation key {} in module {}",
                        variant.implementation_key, module.slug
                    ));
                }
                errors.extend(
                    self.variant_errors(variant)
                        .into_iter()
                        .map(|e| format!("{}: {}", module.slug, e)),
                );
            }
        }

        if errors.is_empty() {
            debug!(
                "Manifest validation passed for {} modules",
                manifest.modules.len()
            );
        } else {
            warn!("Manifest validation failed: {:?}", errors);
        }
        ValidationResult::from_errors(errors)
    }

    /// Problems with a single variant definition
    pub fn variant_errors(&self, variant: &NewVariant) -> Vec<String> {
        let mut errors = Vec::new();
        if !is_valid_slug(&variant.implementation_key) {
            errors.push(format!(
                "Invalid implementation key: {}",
                variant.implementation_key
            ));
        }
        if variant.component_path.trim().is_empty() {
            errors.push(format!(
                "Component path cannot be empty ({})",
                variant.implementation_key
            ));
        }
        if let ValidationResult::Invalid(config_errors) =
            self.config_validator.validate(&variant.default_config)
        {
            errors.extend(config_errors.into_iter().map(|e| {
                format!("default_config of {}: {}", variant.implementation_key, e)
            }));
        }
        errors
    }
}

impl Default for ManifestValidator {
    fn default() -> Self {
        Self::new(ConfigValidator::default())
    }
}
