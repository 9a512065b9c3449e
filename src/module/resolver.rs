//! Request-time variant resolution
//!
//! Given (tenant, module slug, optional overrides) decide which variant the
//! tenant receives and with what configuration. Pure reads and a pure merge:
//! no writes, no locks, safe to call from any number of request handlers.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::module::registry::{AudiencePolicy, ImplementationRegistry};
use crate::module::traits::ModuleError;
use crate::module::types::{BaseModule, ImplementationVariant, ResolvedModule, TenantAssignment};
use crate::module::validation::ConfigValidator;
use crate::storage::assignments::AssignmentStore;
use crate::storage::catalog::CatalogStore;

/// Merge config layers, later layers winning.
///
/// Top-level keys are merged. When a key holds an object in both the
/// accumulated value and the next layer, that object is merged key-by-key;
/// anything below that level, and every array or scalar, is replaced wholesale.
/// Non-object layers are ignored.
pub fn merge_config(layers: &[&Value]) -> Value {
    let mut merged = Map::new();
    for layer in layers {
        let Some(layer) = layer.as_object() else {
            continue;
        };
        for (key, value) in layer {
            match (merged.get_mut(key), value) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    for (inner_key, inner_value) in incoming {
                        existing.insert(inner_key.clone(), inner_value.clone());
                    }
                }
                _ => {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
    }
    Value::Object(merged)
}

pub struct ResolutionEngine {
    catalog: Arc<CatalogStore>,
    assignments: Arc<AssignmentStore>,
    registry: Arc<ImplementationRegistry>,
    audience: Arc<dyn AudiencePolicy>,
    config_validator: ConfigValidator,
}

impl ResolutionEngine {
    pub fn new(
        catalog: Arc<CatalogStore>,
        assignments: Arc<AssignmentStore>,
        registry: Arc<ImplementationRegistry>,
        audience: Arc<dyn AudiencePolicy>,
        config_validator: ConfigValidator,
    ) -> Self {
        Self {
            catalog,
            assignments,
            registry,
            audience,
            config_validator,
        }
    }

    pub fn registry(&self) -> &ImplementationRegistry {
        &self.registry
    }

    /// Resolve the variant and merged config a tenant receives for a module
    ///
    /// NotFound: module absent, deleted, or deactivated without being
    /// archived; no assignment; assignment hidden.
    /// ImplementationUnavailable: pinned variant unusable, or no usable default.
    /// An inactive status still resolves, with `is_active = false`.
    pub fn resolve(
        &self,
        tenant_id: &str,
        module_slug: &str,
        overrides: Option<&Value>,
    ) -> Result<ResolvedModule, ModuleError> {
        let module = self
            .catalog
            .get_module_by_slug(module_slug)?
            .filter(BaseModule::is_resolvable)
            .ok_or_else(|| ModuleError::NotFound(format!("module {}", module_slug)))?;

        let assignment = self
            .assignments
            .get(tenant_id, &module.id)?
            .map(|row| row.value)
            .filter(|a| a.is_visible)
            .ok_or_else(|| {
                ModuleError::NotFound(format!("assignment {}/{}", tenant_id, module_slug))
            })?;

        let variant = self.select_variant(&module, &assignment)?;

        if let Some(overrides) = overrides {
            self.config_validator.validate(overrides).into_config_result()?;
        }
        let empty = Value::Object(Map::new());
        let config = merge_config(&[
            &variant.default_config,
            &assignment.custom_config,
            overrides.unwrap_or(&empty),
        ]);

        if !self.registry.contains(&variant.implementation_key) {
            debug!(
                "No descriptor registered for {}, using {}",
                variant.implementation_key,
                self.registry.default_key()
            );
        }
        let implementation = self.registry.get(&variant.implementation_key).clone();
        debug!(
            "Resolved {} for tenant {} to {} (status {})",
            module.slug, tenant_id, variant.implementation_key, assignment.status
        );

        Ok(ResolvedModule {
            is_active: assignment.status.is_active(),
            status: assignment.status,
            module,
            variant,
            implementation,
            config,
        })
    }

    fn select_variant(
        &self,
        module: &BaseModule,
        assignment: &TenantAssignment,
    ) -> Result<ImplementationVariant, ModuleError> {
        // A pinned implementation never falls back
        if let Some(id) = &assignment.implementation_id {
            return self
                .catalog
                .get_variant(id)?
                .filter(|v| v.base_module_id == module.id && v.is_usable(module))
                .ok_or_else(|| {
                    ModuleError::ImplementationUnavailable(format!(
                        "{} for module {}",
                        id, module.slug
                    ))
                });
        }

        // The audience policy only ever sees candidates that can be served
        let usable: Vec<ImplementationVariant> = self
            .catalog
            .list_variants(&module.id)?
            .into_iter()
            .filter(|v| v.is_usable(module))
            .collect();
        let usable_by_key =
            |key: &str| usable.iter().find(|v| v.implementation_key == key).cloned();

        let audience_match = self
            .audience
            .preferred_key(&assignment.tenant_id, &usable)
            .and_then(|key| usable_by_key(&key));

        audience_match
            .or_else(|| usable_by_key(self.registry.default_key()))
            .ok_or_else(|| {
                ModuleError::ImplementationUnavailable(format!(
                    "no usable default implementation for module {}",
                    module.slug
                ))
            })
    }
}
