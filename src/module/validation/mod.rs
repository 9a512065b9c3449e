//! Validation framework
//!
//! Validates tenant config documents and catalog manifests before they reach
//! storage.

pub mod config_validator;
pub mod manifest_validator;

pub use config_validator::ConfigValidator;
pub use manifest_validator::{is_valid_slug, ManifestValidator};

use crate::module::traits::ModuleError;

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Input is valid
    Valid,
    /// Input is invalid with specific errors
    Invalid(Vec<String>),
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<String>) -> Self {
        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(errors)
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// Map to `ModuleError::ConfigValidation`
    pub fn into_config_result(self) -> Result<(), ModuleError> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(errors) => Err(ModuleError::ConfigValidation(errors)),
        }
    }

    /// Map to `ModuleError::InvalidManifest`
    pub fn into_manifest_result(self) -> Result<(), ModuleError> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(errors) => {
                Err(ModuleError::InvalidManifest(errors.join("; ")))
            }
        }
    }
}
