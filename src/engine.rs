//! Module engine
//!
//! Wires storage, services and collaborators together and exposes the
//! operations callers use. All services share one `Storage` and one
//! `SinkDispatcher`.

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::config::{DatabaseBackendConfig, EngineConfig};
use crate::module::assignment::AssignmentService;
use crate::module::catalog::{CatalogService, ImportReport};
use crate::module::manager::{LifecycleManager, SweepStats};
use crate::module::registry::{
    AudiencePolicy, CatalogManifest, ConfiguredAudiencePolicy, ImplementationRegistry,
};
use crate::module::resolver::ResolutionEngine;
use crate::module::sinks::{
    LogNotificationSink, SinkDispatcher, StaticAdminDirectory, TracingAuditSink,
};
use crate::module::status::OperationalStatus;
use crate::module::traits::{
    AdminDirectory, AuditSink, ModuleError, NotificationSink, PermitAllTransitions,
    TransitionPolicy,
};
use crate::module::types::{
    ActorContext, ArchiveResult, AssignedModule, BaseModule, CleanupReport, ImplementationVariant,
    NewModule, NewVariant, ResolvedModule, RestoreResult, TenantAssignment,
};
use crate::module::validation::{ConfigValidator, ManifestValidator};
use crate::storage::Storage;
use crate::utils::{Clock, SystemClock};

/// Module lifecycle and resolution engine
pub struct ModuleEngine {
    config: EngineConfig,
    storage: Storage,
    catalog: CatalogService,
    assignments: AssignmentService,
    resolver: ResolutionEngine,
    lifecycle: LifecycleManager,
    sinks: Arc<SinkDispatcher>,
    clock: Arc<dyn Clock>,
}

impl ModuleEngine {
    pub fn builder(config: EngineConfig) -> ModuleEngineBuilder {
        ModuleEngineBuilder::new(config)
    }

    /// Open an engine with the configured storage and default collaborators
    pub fn open(config: EngineConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ImplementationRegistry {
        self.resolver.registry()
    }

    pub fn sinks(&self) -> &SinkDispatcher {
        &self.sinks
    }

    /// Time source shared by every component
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn sweep_stats(&self) -> SweepStats {
        self.lifecycle.get_stats()
    }

    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }

    // Catalog

    pub fn list_modules(&self) -> Result<Vec<BaseModule>, ModuleError> {
        self.catalog.list_modules()
    }

    pub fn get_module_by_slug(&self, slug: &str) -> Result<BaseModule, ModuleError> {
        self.catalog.get_module_by_slug(slug)
    }

    pub fn get_module(&self, id: &str) -> Result<BaseModule, ModuleError> {
        self.catalog.get_module(id)
    }

    pub fn list_variants(
        &self,
        base_module_id: &str,
    ) -> Result<Vec<ImplementationVariant>, ModuleError> {
        self.catalog.list_variants(base_module_id)
    }

    pub async fn create_module(
        &self,
        new_module: NewModule,
        actor: &ActorContext,
    ) -> Result<BaseModule, ModuleError> {
        self.catalog.create_module(new_module, actor).await
    }

    pub async fn add_variant(
        &self,
        base_module_id: &str,
        new_variant: NewVariant,
        actor: &ActorContext,
    ) -> Result<ImplementationVariant, ModuleError> {
        self.catalog.add_variant(base_module_id, new_variant, actor).await
    }

    pub async fn delete_module(
        &self,
        id: &str,
        actor: &ActorContext,
    ) -> Result<BaseModule, ModuleError> {
        self.catalog.delete_module(id, actor).await
    }

    pub async fn remove_variant(
        &self,
        variant_id: &str,
        actor: &ActorContext,
    ) -> Result<ImplementationVariant, ModuleError> {
        self.catalog.remove_variant(variant_id, actor).await
    }

    pub async fn import_manifest(
        &self,
        manifest: &CatalogManifest,
        actor: &ActorContext,
    ) -> Result<ImportReport, ModuleError> {
        self.catalog.import_manifest(manifest, actor).await
    }

    // Assignments

    pub fn list_assigned_modules(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<AssignedModule>, ModuleError> {
        self.assignments.list_assigned_modules(tenant_id)
    }

    pub fn get_assignment(
        &self,
        tenant_id: &str,
        base_module_id: &str,
    ) -> Result<TenantAssignment, ModuleError> {
        self.assignments.get_assignment(tenant_id, base_module_id)
    }

    pub async fn request_assignment(
        &self,
        tenant_id: &str,
        module_slug: &str,
        implementation_id: Option<String>,
        actor: &ActorContext,
    ) -> Result<TenantAssignment, ModuleError> {
        self.assignments
            .request_assignment(tenant_id, module_slug, implementation_id, actor)
            .await
    }

    pub async fn update_assignment_status(
        &self,
        tenant_id: &str,
        base_module_id: &str,
        next: OperationalStatus,
        actor: &ActorContext,
    ) -> Result<TenantAssignment, ModuleError> {
        self.assignments
            .update_assignment_status(tenant_id, base_module_id, next, actor)
            .await
    }

    pub async fn update_assignment_config(
        &self,
        tenant_id: &str,
        base_module_id: &str,
        config: Value,
        actor: &ActorContext,
    ) -> Result<TenantAssignment, ModuleError> {
        self.assignments
            .update_assignment_config(tenant_id, base_module_id, config, actor)
            .await
    }

    pub async fn set_assignment_visibility(
        &self,
        tenant_id: &str,
        base_module_id: &str,
        is_visible: bool,
        actor: &ActorContext,
    ) -> Result<TenantAssignment, ModuleError> {
        self.assignments
            .set_assignment_visibility(tenant_id, base_module_id, is_visible, actor)
            .await
    }

    pub async fn set_assignment_implementation(
        &self,
        tenant_id: &str,
        base_module_id: &str,
        implementation_id: Option<String>,
        actor: &ActorContext,
    ) -> Result<TenantAssignment, ModuleError> {
        self.assignments
            .set_assignment_implementation(tenant_id, base_module_id, implementation_id, actor)
            .await
    }

    // Resolution

    pub fn resolve(
        &self,
        tenant_id: &str,
        module_slug: &str,
        overrides: Option<&Value>,
    ) -> Result<ResolvedModule, ModuleError> {
        self.resolver.resolve(tenant_id, module_slug, overrides)
    }

    // Lifecycle

    pub async fn archive_module(
        &self,
        base_module_id: &str,
        actor: &ActorContext,
    ) -> Result<ArchiveResult, ModuleError> {
        self.lifecycle.archive_module(base_module_id, actor).await
    }

    pub async fn restore_module(
        &self,
        base_module_id: &str,
        actor: &ActorContext,
    ) -> Result<RestoreResult, ModuleError> {
        self.lifecycle.restore_module(base_module_id, actor).await
    }

    pub async fn cleanup_expired_backups(&self) -> Result<CleanupReport, ModuleError> {
        self.lifecycle.cleanup_expired_backups().await
    }
}

/// Builder for `ModuleEngine`
///
/// Anything not supplied comes from the config: storage from `storage`,
/// recipients from `notifications`, audiences from `resolution`.
pub struct ModuleEngineBuilder {
    config: EngineConfig,
    storage: Option<Storage>,
    clock: Option<Arc<dyn Clock>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    notification_sink: Option<Arc<dyn NotificationSink>>,
    directory: Option<Arc<dyn AdminDirectory>>,
    transition_policy: Option<Arc<dyn TransitionPolicy>>,
    audience_policy: Option<Arc<dyn AudiencePolicy>>,
    registry: Option<ImplementationRegistry>,
}

impl ModuleEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            storage: None,
            clock: None,
            audit_sink: None,
            notification_sink: None,
            directory: None,
            transition_policy: None,
            audience_policy: None,
            registry: None,
        }
    }

    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notification_sink = Some(sink);
        self
    }

    pub fn admin_directory(mut self, directory: Arc<dyn AdminDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn transition_policy(mut self, policy: Arc<dyn TransitionPolicy>) -> Self {
        self.transition_policy = Some(policy);
        self
    }

    pub fn audience_policy(mut self, policy: Arc<dyn AudiencePolicy>) -> Self {
        self.audience_policy = Some(policy);
        self
    }

    pub fn registry(mut self, registry: ImplementationRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<ModuleEngine> {
        let config = self.config;
        config.validate()?;

        let storage = match self.storage {
            Some(storage) => storage,
            None => open_storage(&config)?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let audit_sink = self.audit_sink.unwrap_or_else(|| Arc::new(TracingAuditSink));
        let notification_sink = self
            .notification_sink
            .unwrap_or_else(|| default_notification_sink(&config));
        let directory = self.directory.unwrap_or_else(|| {
            Arc::new(StaticAdminDirectory::new(
                config.notifications.administrators.clone(),
            ))
        });
        let sinks = Arc::new(SinkDispatcher::new(
            audit_sink,
            notification_sink,
            directory,
            config.notifications.recipients_cache_ttl_secs,
            Arc::clone(&clock),
        ));

        let config_validator = ConfigValidator::new(&config.validation);
        let registry = Arc::new(
            self.registry
                .unwrap_or_else(|| ImplementationRegistry::from_config(&config.resolution)),
        );
        let audience = self
            .audience_policy
            .unwrap_or_else(|| Arc::new(ConfiguredAudiencePolicy::from_config(&config.resolution)));
        let policy = self
            .transition_policy
            .unwrap_or_else(|| Arc::new(PermitAllTransitions));

        let catalog = CatalogService::new(
            storage.catalog(),
            ManifestValidator::new(config_validator.clone()),
            Arc::clone(&sinks),
            Arc::clone(&clock),
        );
        let assignments = AssignmentService::new(
            storage.catalog(),
            storage.assignments(),
            policy,
            config_validator.clone(),
            config.concurrency.retry_config(),
            Arc::clone(&sinks),
            Arc::clone(&clock),
        );
        let resolver = ResolutionEngine::new(
            storage.catalog(),
            storage.assignments(),
            registry,
            audience,
            config_validator,
        );
        let lifecycle = LifecycleManager::new(
            storage.catalog(),
            storage.backups(),
            config.lifecycle.clone(),
            Arc::clone(&sinks),
            Arc::clone(&clock),
        );

        info!(
            "Module engine ready (backend {:?}, default implementation {})",
            config.storage.database_backend, config.resolution.default_implementation_key
        );

        Ok(ModuleEngine {
            config,
            storage,
            catalog,
            assignments,
            resolver,
            lifecycle,
            sinks,
            clock,
        })
    }
}

fn open_storage(config: &EngineConfig) -> Result<Storage> {
    let data_dir = &config.storage.data_dir;
    match config.storage.database_backend {
        // Auto gets the fallback chain; an explicit choice fails loudly
        DatabaseBackendConfig::Auto => Storage::new(data_dir),
        backend => Storage::with_backend(data_dir, backend.resolve()),
    }
}

#[cfg(feature = "webhook")]
fn default_notification_sink(config: &EngineConfig) -> Arc<dyn NotificationSink> {
    match &config.notifications.webhook_url {
        Some(url) => Arc::new(crate::module::sinks::WebhookNotificationSink::new(url.clone())),
        None => Arc::new(LogNotificationSink),
    }
}

#[cfg(not(feature = "webhook"))]
fn default_notification_sink(_config: &EngineConfig) -> Arc<dyn NotificationSink> {
    Arc::new(LogNotificationSink)
}
