//! Catalog, assignment and backup records
//!
//! Persisted rows keep their canonical snake_case field names. Values returned
//! to UI callers (`ResolvedModule`, `AssignedModule`, operation reports) are
//! serialized camelCase.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::module::registry::ImplementationDescriptor;
use crate::module::status::OperationalStatus;

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A catalog entry: one installable capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseModule {
    pub id: String,
    /// Unique and immutable
    pub slug: String,
    pub name: String,
    pub category: String,
    pub is_active: bool,
    pub archived_at: Option<u64>,
    /// Append-only; a deleted module is invisible to every read path
    pub deleted_at: Option<u64>,
    #[serde(default)]
    pub created_at: u64,
}

impl BaseModule {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Deactivated without being archived. Archived modules stay resolvable
    /// for tenants that already hold them.
    pub fn is_resolvable(&self) -> bool {
        !self.is_deleted() && (self.is_active || self.is_archived())
    }

    /// Open for new assignments
    pub fn is_assignable(&self) -> bool {
        !self.is_deleted() && self.is_active && !self.is_archived()
    }
}

/// One concrete implementation of a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationVariant {
    pub id: String,
    pub base_module_id: String,
    /// Unique within `base_module_id`
    pub implementation_key: String,
    /// Opaque handle for the rendering layer
    pub component_path: String,
    pub target_audience: String,
    pub complexity_tier: String,
    pub is_active: bool,
    pub archived_at: Option<u64>,
    /// Lowest-precedence layer of the resolved config
    #[serde(default = "empty_object")]
    pub default_config: Value,
}

impl ImplementationVariant {
    /// Whether the variant may be served to a tenant of `module`.
    ///
    /// A variant archived by its module's cascade stays usable while the module
    /// is archived, so grandfathered tenants keep working.
    pub fn is_usable(&self, module: &BaseModule) -> bool {
        self.is_active && (self.archived_at.is_none() || module.is_archived())
    }
}

/// The (tenant, module) relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantAssignment {
    pub tenant_id: String,
    pub base_module_id: String,
    /// None = audience default
    pub implementation_id: Option<String>,
    pub status: OperationalStatus,
    pub is_visible: bool,
    #[serde(default = "empty_object")]
    pub custom_config: Value,
    pub assigned_by: String,
    pub activated_at: Option<u64>,
    pub updated_at: u64,
}

/// Restoration record written before a variant is archived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleBackup {
    pub id: String,
    pub implementation_id: String,
    pub backup_type: String,
    pub size_bytes: u64,
    pub created_at: u64,
    pub expires_at: u64,
    pub metadata: Value,
}

/// Who is performing an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    PlatformAdmin,
    TenantAdmin,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub tenant_id: String,
    pub actor_id: String,
    pub role: ActorRole,
}

impl ActorContext {
    pub fn new(tenant_id: impl Into<String>, actor_id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: actor_id.into(),
            role,
        }
    }

    /// Actor used by scheduled jobs such as the backup sweep
    pub fn system() -> Self {
        Self::new("platform", "system", ActorRole::System)
    }
}

/// Input for `create_module`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewModule {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
}

/// Input for `add_variant`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVariant {
    pub implementation_key: String,
    pub component_path: String,
    #[serde(default = "default_audience")]
    pub target_audience: String,
    #[serde(default = "default_tier")]
    pub complexity_tier: String,
    #[serde(default = "empty_object")]
    pub default_config: Value,
}

fn default_audience() -> String {
    "all".to_string()
}

fn default_tier() -> String {
    "basic".to_string()
}

impl NewVariant {
    pub fn new(implementation_key: impl Into<String>, component_path: impl Into<String>) -> Self {
        Self {
            implementation_key: implementation_key.into(),
            component_path: component_path.into(),
            target_audience: default_audience(),
            complexity_tier: default_tier(),
            default_config: empty_object(),
        }
    }

    pub fn with_default_config(mut self, config: Value) -> Self {
        self.default_config = config;
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.target_audience = audience.into();
        self
    }
}

/// An assignment joined with its module and (when pinned) its variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedModule {
    pub module: BaseModule,
    pub assignment: TenantAssignment,
    pub variant: Option<ImplementationVariant>,
    pub is_active: bool,
}

/// Outcome of `resolve`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedModule {
    pub module: BaseModule,
    pub variant: ImplementationVariant,
    pub implementation: ImplementationDescriptor,
    pub config: Value,
    pub status: OperationalStatus,
    /// False means "render the inactive state", not "not found"
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveResult {
    pub module_id: String,
    /// Variant ids archived by this call; empty when already archived
    pub newly_archived: Vec<String>,
    pub backups_created: Vec<String>,
    pub module_newly_archived: bool,
}

impl ArchiveResult {
    pub fn is_noop(&self) -> bool {
        !self.module_newly_archived && self.newly_archived.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub module_id: String,
    pub restored_variants: Vec<String>,
    pub module_restored: bool,
}

/// One row the sweep failed to delete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupError {
    pub backup_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub deleted: usize,
    pub errors: Vec<CleanupError>,
    pub total_size_freed: u64,
}
