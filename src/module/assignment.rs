//! Tenant assignment service
//!
//! Every mutation is a single-row read-modify-write: read the row and its
//! bytes, validate against what was read, then compare-and-swap. A lost swap
//! is `ConcurrentModification`, retried with backoff after a fresh read.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::module::sinks::{AuditAction, SinkDispatcher};
use crate::module::status::{validate_transition, OperationalStatus};
use crate::module::traits::{ModuleError, TransitionPolicy};
use crate::module::types::{ActorContext, AssignedModule, BaseModule, TenantAssignment};
use crate::module::validation::ConfigValidator;
use crate::storage::assignments::AssignmentStore;
use crate::storage::catalog::CatalogStore;
use crate::utils::{retry_if_retryable, Clock, RetryConfig};

pub struct AssignmentService {
    catalog: Arc<CatalogStore>,
    store: Arc<AssignmentStore>,
    policy: Arc<dyn TransitionPolicy>,
    config_validator: ConfigValidator,
    retry: RetryConfig,
    sinks: Arc<SinkDispatcher>,
    clock: Arc<dyn Clock>,
}

impl AssignmentService {
    pub fn new(
        catalog: Arc<CatalogStore>,
        store: Arc<AssignmentStore>,
        policy: Arc<dyn TransitionPolicy>,
        config_validator: ConfigValidator,
        retry: RetryConfig,
        sinks: Arc<SinkDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            store,
            policy,
            config_validator,
            retry,
            sinks,
            clock,
        }
    }

    /// A tenant's assignments joined with their modules, ordered by module name.
    /// Rows whose module was deleted are omitted.
    pub fn list_assigned_modules(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<AssignedModule>, ModuleError> {
        let mut assigned = Vec::new();
        for assignment in self.store.list_for_tenant(tenant_id)? {
            let module = match self.catalog.get_module(&assignment.base_module_id)? {
                Some(module) if !module.is_deleted() => module,
                _ => continue,
            };
            let variant = match &assignment.implementation_id {
                Some(id) => self.catalog.get_variant(id)?,
                None => None,
            };
            assigned.push(AssignedModule {
                is_active: assignment.status.is_active(),
                module,
                assignment,
                variant,
            });
        }
        assigned.sort_by(|a, b| a.module.name.cmp(&b.module.name));
        Ok(assigned)
    }

    pub fn get_assignment(
        &self,
        tenant_id: &str,
        base_module_id: &str,
    ) -> Result<TenantAssignment, ModuleError> {
        self.store
            .get(tenant_id, base_module_id)?
            .map(|row| row.value)
            .ok_or_else(|| not_found(tenant_id, base_module_id))
    }

    /// Create a REQUESTED assignment for a tenant
    pub async fn request_assignment(
        &self,
        tenant_id: &str,
        module_slug: &str,
        implementation_id: Option<String>,
        actor: &ActorContext,
    ) -> Result<TenantAssignment, ModuleError> {
        let module = self
            .catalog
            .get_module_by_slug(module_slug)?
            .filter(|m| !m.is_deleted())
            .ok_or_else(|| ModuleError::NotFound(format!("module {}", module_slug)))?;
        if module.is_archived() {
            return Err(ModuleError::ModuleArchived(module.slug));
        }
        if !module.is_active {
            return Err(ModuleError::NotFound(format!("module {}", module_slug)));
        }
        if let Some(id) = &implementation_id {
            self.check_implementation(&module, id)?;
        }

        let now = self.clock.now();
        let assignment = TenantAssignment {
            tenant_id: tenant_id.to_string(),
            base_module_id: module.id.clone(),
            implementation_id,
            status: OperationalStatus::INITIAL,
            is_visible: true,
            custom_config: json!({}),
            assigned_by: actor.actor_id.clone(),
            activated_at: None,
            updated_at: now,
        };

        if !self.store.insert_new(&assignment)? {
            return Err(ModuleError::AlreadyAssigned {
                tenant_id: tenant_id.to_string(),
                module_id: module.id,
            });
        }

        info!("Tenant {} requested module {}", tenant_id, module.slug);
        self.sinks
            .audit(
                actor,
                AuditAction::AssignmentRequested,
                "tenant_assignment",
                &assignment_resource(tenant_id, &module.id),
                json!({ "module": module.slug }),
            )
            .await;
        Ok(assignment)
    }

    /// Move an assignment one step through the status machine
    pub async fn update_assignment_status(
        &self,
        tenant_id: &str,
        base_module_id: &str,
        next: OperationalStatus,
        actor: &ActorContext,
    ) -> Result<TenantAssignment, ModuleError> {
        let now = self.clock.now();
        let (previous, updated) = self
            .mutate(tenant_id, base_module_id, |current| {
                self.policy.authorize(actor, current.status, next)?;
                validate_transition(current.status, next)?;
                let mut updated = current.clone();
                updated.status = next;
                updated.updated_at = now;
                if next == OperationalStatus::Enabled {
                    updated.activated_at = Some(now);
                }
                Ok(updated)
            })
            .await?;

        info!(
            "Assignment {}/{} moved {} -> {}",
            tenant_id, base_module_id, previous.status, updated.status
        );
        self.sinks
            .audit(
                actor,
                AuditAction::AssignmentStatusChanged,
                "tenant_assignment",
                &assignment_resource(tenant_id, base_module_id),
                json!({ "from": previous.status, "to": updated.status }),
            )
            .await;
        Ok(updated)
    }

    /// Replace an assignment's custom config
    pub async fn update_assignment_config(
        &self,
        tenant_id: &str,
        base_module_id: &str,
        config: Value,
        actor: &ActorContext,
    ) -> Result<TenantAssignment, ModuleError> {
        self.config_validator.validate(&config).into_config_result()?;

        let now = self.clock.now();
        let (_, updated) = self
            .mutate(tenant_id, base_module_id, |current| {
                let mut updated = current.clone();
                updated.custom_config = config.clone();
                updated.updated_at = now;
                Ok(updated)
            })
            .await?;

        debug!("Updated config for assignment {}/{}", tenant_id, base_module_id);
        self.sinks
            .audit(
                actor,
                AuditAction::AssignmentConfigUpdated,
                "tenant_assignment",
                &assignment_resource(tenant_id, base_module_id),
                json!({ "keys": config.as_object().map(|o| o.len()).unwrap_or(0) }),
            )
            .await;
        Ok(updated)
    }

    /// Show or hide a module for a tenant without touching its status
    pub async fn set_assignment_visibility(
        &self,
        tenant_id: &str,
        base_module_id: &str,
        is_visible: bool,
        actor: &ActorContext,
    ) -> Result<TenantAssignment, ModuleError> {
        let now = self.clock.now();
        let (_, updated) = self
            .mutate(tenant_id, base_module_id, |current| {
                let mut updated = current.clone();
                updated.is_visible = is_visible;
                updated.updated_at = now;
                Ok(updated)
            })
            .await?;

        self.sinks
            .audit(
                actor,
                AuditAction::AssignmentVisibilityChanged,
                "tenant_assignment",
                &assignment_resource(tenant_id, base_module_id),
                json!({ "is_visible": is_visible }),
            )
            .await;
        Ok(updated)
    }

    /// Pin an assignment to a variant, or clear the pin with `None`
    pub async fn set_assignment_implementation(
        &self,
        tenant_id: &str,
        base_module_id: &str,
        implementation_id: Option<String>,
        actor: &ActorContext,
    ) -> Result<TenantAssignment, ModuleError> {
        if let Some(id) = &implementation_id {
            let module = self
                .catalog
                .get_module(base_module_id)?
                .filter(|m| !m.is_deleted())
                .ok_or_else(|| ModuleError::NotFound(format!("module {}", base_module_id)))?;
            self.check_implementation(&module, id)?;
        }

        let now = self.clock.now();
        let (_, updated) = self
            .mutate(tenant_id, base_module_id, |current| {
                let mut updated = current.clone();
                updated.implementation_id = implementation_id.clone();
                updated.updated_at = now;
                Ok(updated)
            })
            .await?;

        self.sinks
            .audit(
                actor,
                AuditAction::AssignmentImplementationChanged,
                "tenant_assignment",
                &assignment_resource(tenant_id, base_module_id),
                json!({ "implementation_id": implementation_id }),
            )
            .await;
        Ok(updated)
    }

    fn check_implementation(
        &self,
        module: &BaseModule,
        implementation_id: &str,
    ) -> Result<(), ModuleError> {
        match self.catalog.get_variant(implementation_id)? {
            Some(variant) if variant.base_module_id == module.id && variant.is_usable(module) => {
                Ok(())
            }
            _ => Err(ModuleError::ImplementationUnavailable(format!(
                "{} for module {}",
                implementation_id, module.slug
            ))),
        }
    }

    /// Retry `try_mutate` while the row keeps changing underneath us
    async fn mutate<F>(
        &self,
        tenant_id: &str,
        base_module_id: &str,
        apply: F,
    ) -> Result<(TenantAssignment, TenantAssignment), ModuleError>
    where
        F: Fn(&TenantAssignment) -> Result<TenantAssignment, ModuleError>,
    {
        let apply = &apply;
        retry_if_retryable(&self.retry, || async move {
            self.try_mutate(tenant_id, base_module_id, apply)
        })
        .await
    }

    fn try_mutate<F>(
        &self,
        tenant_id: &str,
        base_module_id: &str,
        apply: &F,
    ) -> Result<(TenantAssignment, TenantAssignment), ModuleError>
    where
        F: Fn(&TenantAssignment) -> Result<TenantAssignment, ModuleError>,
    {
        let current = self
            .store
            .get(tenant_id, base_module_id)?
            .ok_or_else(|| not_found(tenant_id, base_module_id))?;
        let updated = apply(&current.value)?;
        if self.store.compare_and_swap(&current, &updated)? {
            Ok((current.value, updated))
        } else {
            Err(ModuleError::ConcurrentModification(assignment_resource(
                tenant_id,
                base_module_id,
            )))
        }
    }
}

fn assignment_resource(tenant_id: &str, base_module_id: &str) -> String {
    format!("{}/{}", tenant_id, base_module_id)
}

fn not_found(tenant_id: &str, base_module_id: &str) -> ModuleError {
    ModuleError::NotFound(format!("assignment {}", assignment_resource(tenant_id, base_module_id)))
}
