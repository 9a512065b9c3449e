//! Lifecycle manager for catalog entries
//!
//! Archive and restore cascades over a module and its variants, and the
//! retention sweep over pre-archive backups.
//!
//! The cascades are not one transaction. Each step is idempotent and the
//! order is chosen so that re-invoking after a partial failure resumes where
//! the previous call stopped:
//! - archive: backups, then the module, then the variants
//! - restore: the variants, then the module

use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LifecycleConfig;
use crate::module::sinks::{AuditAction, SinkDispatcher};
use crate::module::traits::ModuleError;
use crate::module::types::{
    ActorContext, ArchiveResult, BaseModule, CleanupError, CleanupReport, ImplementationVariant,
    ModuleBackup, RestoreResult,
};
use crate::storage::backups::BackupStore;
use crate::storage::catalog::CatalogStore;
use crate::storage::Versioned;
use crate::utils::Clock;

/// Backup sweep statistics
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct SweepStats {
    /// Number of sweeps run
    pub sweeps: u64,
    /// Backups deleted across all sweeps
    pub backups_deleted: u64,
    /// Bytes freed across all sweeps
    pub bytes_freed: u64,
    /// Per-row failures across all sweeps
    pub errors: u64,
    /// When the last sweep finished
    pub last_sweep_at: Option<u64>,
}

/// Lifecycle manager
pub struct LifecycleManager {
    catalog: Arc<CatalogStore>,
    backups: Arc<BackupStore>,
    config: LifecycleConfig,
    sinks: Arc<SinkDispatcher>,
    clock: Arc<dyn Clock>,
    stats: Mutex<SweepStats>,
}

impl LifecycleManager {
    /// Create a new lifecycle manager
    pub fn new(
        catalog: Arc<CatalogStore>,
        backups: Arc<BackupStore>,
        config: LifecycleConfig,
        sinks: Arc<SinkDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            backups,
            config,
            sinks,
            clock,
            stats: Mutex::new(SweepStats::default()),
        }
    }

    /// Get sweep statistics
    pub fn get_stats(&self) -> SweepStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn live_module(&self, id: &str) -> Result<BaseModule, ModuleError> {
        self.catalog
            .get_module(id)?
            .filter(|m| !m.is_deleted())
            .ok_or_else(|| ModuleError::NotFound(format!("module {}", id)))
    }

    /// Archive a module and every variant it owns
    ///
    /// Tenant assignments are left untouched, so tenants already running the
    /// module keep resolving it. Calling again on an archived module is a
    /// successful no-op with an empty delta.
    pub async fn archive_module(
        &self,
        base_module_id: &str,
        actor: &ActorContext,
    ) -> Result<ArchiveResult, ModuleError> {
        let module = self.live_module(base_module_id)?;
        let variants = self.catalog.list_variants(base_module_id)?;
        let now = self.clock.now();

        let mut result = ArchiveResult {
            module_id: module.id.clone(),
            ..Default::default()
        };
        let cascade_failure = |archived: &[String], step: &str, e: ModuleError| {
            warn!(
                "Archive of module {} failed during {}: {}",
                base_module_id, step, e
            );
            ModuleError::CascadeFailure {
                module_id: base_module_id.to_string(),
                archived: archived.to_vec(),
                message: format!("{}: {}", step, e),
            }
        };

        // Step 1: restoration records. Once the module row is archived this
        // step has already completed.
        if !module.is_archived() {
            for variant in variants
                .iter()
                .filter(|v| v.is_active && v.archived_at.is_none())
            {
                match self.backup_variant(variant, now) {
                    Ok(Some(backup_id)) => result.backups_created.push(backup_id),
                    Ok(None) => {}
                    Err(e) => return Err(cascade_failure(&result.newly_archived, "backup", e)),
                }
            }
        }

        // Step 2: the module itself
        match self.catalog.update_module(base_module_id, |m| {
            if m.is_archived() {
                return false;
            }
            m.archived_at = Some(now);
            m.is_active = false;
            true
        }) {
            Ok(Some((_, changed))) => result.module_newly_archived = changed,
            Ok(None) => {
                return Err(ModuleError::NotFound(format!("module {}", base_module_id)));
            }
            Err(e) => return Err(cascade_failure(&result.newly_archived, "module", e.into())),
        }

        // Step 3: every owned variant
        for variant in &variants {
            match self.catalog.update_variant(&variant.id, |v| {
                if v.archived_at.is_some() {
                    return false;
                }
                v.archived_at = Some(now);
                true
            }) {
                Ok(Some((_, true))) => result.newly_archived.push(variant.id.clone()),
                Ok(_) => {}
                Err(e) => {
                    return Err(cascade_failure(&result.newly_archived, "variants", e.into()));
                }
            }
        }

        if result.is_noop() {
            debug!("Module {} already archived", module.slug);
            return Ok(result);
        }

        info!(
            "Archived module {} ({} variants, {} backups)",
            module.slug,
            result.newly_archived.len(),
            result.backups_created.len()
        );
        self.sinks
            .audit(
                actor,
                AuditAction::ModuleArchived,
                "base_module",
                base_module_id,
                json!({
                    "slug": module.slug,
                    "variants": result.newly_archived,
                    "backups": result.backups_created,
                }),
            )
            .await;
        Ok(result)
    }

    /// Write a pre-archive backup for `variant` unless an identical live one exists
    fn backup_variant(
        &self,
        variant: &ImplementationVariant,
        now: u64,
    ) -> Result<Option<String>, ModuleError> {
        let metadata = serde_json::to_value(variant)?;
        let already_backed_up = self
            .backups
            .list_for_implementation(&variant.id)?
            .into_iter()
            .any(|b| {
                b.backup_type == self.config.backup_type
                    && b.expires_at >= now
                    && b.metadata == metadata
            });
        if already_backed_up {
            return Ok(None);
        }

        let backup = ModuleBackup {
            id: Uuid::new_v4().to_string(),
            implementation_id: variant.id.clone(),
            backup_type: self.config.backup_type.clone(),
            size_bytes: serde_json::to_vec(&metadata)?.len() as u64,
            created_at: now,
            expires_at: now.saturating_add(self.config.backup_retention_secs),
            metadata,
        };
        self.backups.insert(&backup)?;
        debug!(
            "Backed up variant {} as {}",
            variant.implementation_key, backup.id
        );
        Ok(Some(backup.id))
    }

    /// Reverse an archive: clear `archived_at` on the variants, then on the
    /// module, and reactivate the module. Deleted modules stay NotFound.
    /// Restoring a module that is not archived is a successful no-op.
    pub async fn restore_module(
        &self,
        base_module_id: &str,
        actor: &ActorContext,
    ) -> Result<RestoreResult, ModuleError> {
        let module = self.live_module(base_module_id)?;
        let variants = self.catalog.list_variants(base_module_id)?;

        let mut result = RestoreResult {
            module_id: module.id.clone(),
            ..Default::default()
        };

        for variant in &variants {
            match self.catalog.update_variant(&variant.id, |v| {
                if v.archived_at.is_none() {
                    return false;
                }
                v.archived_at = None;
                true
            }) {
                Ok(Some((_, true))) => result.restored_variants.push(variant.id.clone()),
                Ok(_) => {}
                Err(e) => {
                    let still_archived: Vec<String> = variants
                        .iter()
                        .filter(|v| {
                            v.archived_at.is_some() && !result.restored_variants.contains(&v.id)
                        })
                        .map(|v| v.id.clone())
                        .collect();
                    warn!("Restore of module {} interrupted: {}", base_module_id, e);
                    return Err(ModuleError::CascadeFailure {
                        module_id: base_module_id.to_string(),
                        archived: still_archived,
                        message: format!("restore variants: {}", e),
                    });
                }
            }
        }

        match self.catalog.update_module(base_module_id, |m| {
            if !m.is_archived() {
                return false;
            }
            m.archived_at = None;
            m.is_active = true;
            true
        }) {
            Ok(Some((_, changed))) => result.module_restored = changed,
            Ok(None) => return Err(ModuleError::NotFound(format!("module {}", base_module_id))),
            Err(e) => {
                // Every variant is restored by now; only the module row is left
                warn!("Restore of module {} interrupted: {}", base_module_id, e);
                return Err(ModuleError::CascadeFailure {
                    module_id: base_module_id.to_string(),
                    archived: Vec::new(),
                    message: format!("restore module: {}", e),
                });
            }
        }

        if !result.module_restored && result.restored_variants.is_empty() {
            debug!("Module {} was not archived", module.slug);
            return Ok(result);
        }

        info!(
            "Restored module {} ({} variants)",
            module.slug,
            result.restored_variants.len()
        );
        self.sinks
            .audit(
                actor,
                AuditAction::ModuleRestored,
                "base_module",
                base_module_id,
                json!({ "slug": module.slug, "variants": result.restored_variants }),
            )
            .await;
        Ok(result)
    }

    /// Delete expired and orphaned backups
    ///
    /// Pass (a) removes rows with `expires_at < now`; pass (b) removes rows
    /// whose implementation no longer exists. Each row is removed with a
    /// compare-and-delete, so a concurrent sweep never double counts. Per-row
    /// failures are collected and never abort the sweep.
    pub async fn cleanup_expired_backups(&self) -> Result<CleanupReport, ModuleError> {
        let now = self.clock.now();
        let mut report = CleanupReport::default();

        let expired: Vec<Versioned<ModuleBackup>> = self
            .backups
            .list()?
            .into_iter()
            .filter(|row| row.value.expires_at < now)
            .collect();
        for row in &expired {
            self.delete_backup(row, "expired", &mut report);
        }

        // Re-read so rows removed by pass (a) are not attempted twice
        for row in self.backups.list()? {
            match self.catalog.variant_exists(&row.value.implementation_id) {
                Ok(true) => {}
                Ok(false) => self.delete_backup(&row, "orphaned", &mut report),
                Err(e) => report.errors.push(CleanupError {
                    backup_id: row.value.id.clone(),
                    message: format!("implementation lookup failed: {}", e),
                }),
            }
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.sweeps += 1;
            stats.backups_deleted += report.deleted as u64;
            stats.bytes_freed += report.total_size_freed;
            stats.errors += report.errors.len() as u64;
            stats.last_sweep_at = Some(now);
        }

        info!(
            "Backup sweep finished: {} deleted, {} bytes freed, {} errors",
            report.deleted,
            report.total_size_freed,
            report.errors.len()
        );

        if report.deleted > 0 {
            self.sinks
                .audit(
                    &ActorContext::system(),
                    AuditAction::BackupsCleaned,
                    "module_backup",
                    "*",
                    json!({ "deleted": report.deleted, "totalSizeFreed": report.total_size_freed }),
                )
                .await;
        }

        if report.total_size_freed > self.config.notify_threshold_bytes {
            self.sinks
                .notify_administrators(
                    &format!(
                        "Backup cleanup freed {} bytes across {} backups",
                        report.total_size_freed, report.deleted
                    ),
                    json!({
                        "deleted": report.deleted,
                        "totalSizeFreed": report.total_size_freed,
                        "errors": report.errors.len(),
                    }),
                )
                .await;
        }

        Ok(report)
    }

    fn delete_backup(
        &self,
        row: &Versioned<ModuleBackup>,
        reason: &str,
        report: &mut CleanupReport,
    ) {
        match self.backups.remove_if_unchanged(row) {
            Ok(true) => {
                debug!("Deleted {} backup {}", reason, row.value.id);
                report.deleted += 1;
                report.total_size_freed += row.value.size_bytes;
            }
            // Another sweep got there first
            Ok(false) => {}
            Err(e) => report.errors.push(CleanupError {
                backup_id: row.value.id.clone(),
                message: e.to_string(),
            }),
        }
    }
}
