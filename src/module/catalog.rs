//! Catalog service
//!
//! Read paths over modules and variants (deleted rows are invisible) plus the
//! catalog administration operations: create, add variant, delete, remove
//! variant and manifest import.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::module::registry::CatalogManifest;
use crate::module::sinks::{AuditAction, SinkDispatcher};
use crate::module::traits::ModuleError;
use crate::module::types::{ActorContext, BaseModule, ImplementationVariant, NewModule, NewVariant};
use crate::module::validation::{is_valid_slug, ManifestValidator};
use crate::storage::catalog::CatalogStore;
use crate::utils::Clock;

/// Outcome of `import_manifest`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub created_modules: Vec<String>,
    pub created_variants: usize,
    /// Slugs that already existed and were left untouched
    pub skipped: Vec<String>,
}

pub struct CatalogService {
    store: Arc<CatalogStore>,
    validator: ManifestValidator,
    sinks: Arc<SinkDispatcher>,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
    pub fn new(
        store: Arc<CatalogStore>,
        validator: ManifestValidator,
        sinks: Arc<SinkDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            validator,
            sinks,
            clock,
        }
    }

    /// Modules open for new assignments, ordered by name
    pub fn list_modules(&self) -> Result<Vec<BaseModule>, ModuleError> {
        let mut modules: Vec<BaseModule> = self
            .store
            .list_modules()?
            .into_iter()
            .filter(|m| !m.is_deleted() && !m.is_archived())
            .collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.slug.cmp(&b.slug)));
        Ok(modules)
    }

    pub fn get_module_by_slug(&self, slug: &str) -> Result<BaseModule, ModuleError> {
        self.store
            .get_module_by_slug(slug)?
            .filter(|m| !m.is_deleted())
            .ok_or_else(|| ModuleError::NotFound(format!("module {}", slug)))
    }

    pub fn get_module(&self, id: &str) -> Result<BaseModule, ModuleError> {
        self.store
            .get_module(id)?
            .filter(|m| !m.is_deleted())
            .ok_or_else(|| ModuleError::NotFound(format!("module {}", id)))
    }

    /// Variants of a live module, ordered by implementation key
    pub fn list_variants(
        &self,
        base_module_id: &str,
    ) -> Result<Vec<ImplementationVariant>, ModuleError> {
        self.get_module(base_module_id)?;
        Ok(self.store.list_variants(base_module_id)?)
    }

    pub async fn create_module(
        &self,
        new_module: NewModule,
        actor: &ActorContext,
    ) -> Result<BaseModule, ModuleError> {
        if !is_valid_slug(&new_module.slug) {
            return Err(ModuleError::InvalidInput(format!(
                "Invalid module slug: {}",
                new_module.slug
            )));
        }
        if new_module.name.trim().is_empty() {
            return Err(ModuleError::InvalidInput(
                "Module name cannot be empty".to_string(),
            ));
        }

        let module = BaseModule {
            id: Uuid::new_v4().to_string(),
            slug: new_module.slug,
            name: new_module.name,
            category: new_module.category,
            is_active: true,
            archived_at: None,
            deleted_at: None,
            created_at: self.clock.now(),
        };

        if !self.store.insert_module(&module)? {
            return Err(ModuleError::AlreadyExists(format!("module {}", module.slug)));
        }

        info!("Created module {} ({})", module.slug, module.id);
        self.sinks
            .audit(
                actor,
                AuditAction::ModuleCreated,
                "base_module",
                &module.id,
                json!({ "slug": module.slug }),
            )
            .await;
        Ok(module)
    }

    pub async fn add_variant(
        &self,
        base_module_id: &str,
        new_variant: NewVariant,
        actor: &ActorContext,
    ) -> Result<ImplementationVariant, ModuleError> {
        let module = self.get_module(base_module_id)?;
        if module.is_archived() {
            return Err(ModuleError::ModuleArchived(module.slug));
        }

        if !is_valid_slug(&new_variant.implementation_key) {
            return Err(ModuleError::InvalidInput(format!(
                "Invalid implementation key: {}",
                new_variant.implementation_key
            )));
        }
        if new_variant.component_path.trim().is_empty() {
            return Err(ModuleError::InvalidInput(
                "Component path cannot be empty".to_string(),
            ));
        }
        let errors = self.validator.variant_errors(&new_variant);
        if !errors.is_empty() {
            return Err(ModuleError::ConfigValidation(errors));
        }

        let variant = ImplementationVariant {
            id: Uuid::new_v4().to_string(),
            base_module_id: module.id.clone(),
            implementation_key: new_variant.implementation_key,
            component_path: new_variant.component_path,
            target_audience: new_variant.target_audience,
            complexity_tier: new_variant.complexity_tier,
            is_active: true,
            archived_at: None,
            default_config: new_variant.default_config,
        };

        if !self.store.insert_variant(&variant)? {
            return Err(ModuleError::AlreadyExists(format!(
                "implementation {} of module {}",
                variant.implementation_key, module.slug
            )));
        }

        debug!(
            "Added variant {} ({}) to module {}",
            variant.implementation_key, variant.id, module.slug
        );
        self.sinks
            .audit(
                actor,
                AuditAction::VariantAdded,
                "implementation_variant",
                &variant.id,
                json!({ "module": module.slug, "implementation_key": variant.implementation_key }),
            )
            .await;
        Ok(variant)
    }

    /// Soft-delete a module. Irreversible; a second call is NotFound.
    pub async fn delete_module(
        &self,
        id: &str,
        actor: &ActorContext,
    ) -> Result<BaseModule, ModuleError> {
        let now = self.clock.now();
        let (module, changed) = self
            .store
            .update_module(id, |m| {
                if m.is_deleted() {
                    return false;
                }
                m.deleted_at = Some(now);
                true
            })?
            .ok_or_else(|| ModuleError::NotFound(format!("module {}", id)))?;

        if !changed {
            return Err(ModuleError::NotFound(format!("module {}", id)));
        }

        info!("Deleted module {} ({})", module.slug, module.id);
        self.sinks
            .audit(
                actor,
                AuditAction::ModuleDeleted,
                "base_module",
                id,
                json!({ "slug": module.slug }),
            )
            .await;
        Ok(module)
    }

    /// Physically remove a variant; its backups become orphans for the next sweep
    pub async fn remove_variant(
        &self,
        variant_id: &str,
        actor: &ActorContext,
    ) -> Result<ImplementationVariant, ModuleError> {
        let variant = self
            .store
            .remove_variant(variant_id)?
            .ok_or_else(|| ModuleError::NotFound(format!("implementation {}", variant_id)))?;

        info!(
            "Removed variant {} ({}) from module {}",
            variant.implementation_key, variant.id, variant.base_module_id
        );
        self.sinks
            .audit(
                actor,
                AuditAction::VariantRemoved,
                "implementation_variant",
                variant_id,
                json!({ "base_module_id": variant.base_module_id }),
            )
            .await;
        Ok(variant)
    }

    /// Create every module in the manifest whose slug is not already taken
    pub async fn import_manifest(
        &self,
        manifest: &CatalogManifest,
        actor: &ActorContext,
    ) -> Result<ImportReport, ModuleError> {
        self.validator.validate(manifest).into_manifest_result()?;

        let mut report = ImportReport::default();
        for entry in &manifest.modules {
            if self.store.get_module_by_slug(&entry.slug)?.is_some() {
                debug!("Skipping existing module {}", entry.slug);
                report.skipped.push(entry.slug.clone());
                continue;
            }

            let module = match self.create_module(entry.to_new_module(), actor).await {
                Ok(module) => module,
                // Lost a race with a concurrent import
                Err(ModuleError::AlreadyExists(_)) => {
                    report.skipped.push(entry.slug.clone());
                    continue;
                }
                Err(e) => return Err(e),
            };

            for variant in &entry.variants {
                self.add_variant(&module.id, variant.clone(), actor).await?;
                report.created_variants += 1;
            }
            report.created_modules.push(module.slug);
        }

        info!(
            "Imported catalog manifest: {} modules created, {} skipped",
            report.created_modules.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}
