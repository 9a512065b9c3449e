//! Module engine traits and error types
//!
//! Defines the error enum shared by every write and read path, and the
//! collaborator seams the engine consumes (audit, notifications, the
//! administrator directory, and the transition permission policy).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::module::status::OperationalStatus;
use crate::module::types::{ActorContext, ActorRole};
use crate::utils::IsRetryable;

/// Module engine errors
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    /// Absent, deleted and "never existed" are indistinguishable
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: OperationalStatus,
        to: OperationalStatus,
    },

    #[error("Config validation failed: {}", .0.join("; "))]
    ConfigValidation(Vec<String>),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Cascade failed for module {module_id} (archived: {archived:?}): {message}")]
    CascadeFailure {
        module_id: String,
        archived: Vec<String>,
        message: String,
    },

    /// Audit or notification delivery failure; logged, never surfaced to the caller
    #[error("Dependency sink failed: {0}")]
    DependencySink(String),

    #[error("Implementation unavailable: {0}")]
    ImplementationUnavailable(String),

    #[error("Module is archived: {0}")]
    ModuleArchived(String),

    #[error("Tenant {tenant_id} already has an assignment for module {module_id}")]
    AlreadyAssigned { tenant_id: String, module_id: String },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid catalog manifest: {0}")]
    InvalidManifest(String),

    #[error("Mutation {operation_id} rejected: {message}")]
    MutationRejected { operation_id: Uuid, message: String },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ModuleError {
    fn from(e: serde_json::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for ModuleError {
    fn from(e: anyhow::Error) -> Self {
        ModuleError::StorageError(e.to_string())
    }
}

impl IsRetryable for ModuleError {
    fn is_retryable(&self) -> bool {
        matches!(self, ModuleError::ConcurrentModification(_))
    }
}

/// Audit record handed to an `AuditSink`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor: String,
    pub tenant_id: String,
    pub action_type: String,
    pub resource_type: String,
    pub resource_id: String,
    pub details: serde_json::Value,
    pub recorded_at: u64,
}

/// Fire-and-forget audit trail
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_event(&self, event: AuditEvent) -> anyhow::Result<()>;
}

/// Best-effort notification delivery
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        recipients: &[String],
        message: &str,
        metadata: serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Source of administrator recipients for operational notifications
#[async_trait]
pub trait AdminDirectory: Send + Sync {
    async fn administrators(&self) -> anyhow::Result<Vec<String>>;
}

/// Decides whether an actor may trigger a given status transition
///
/// Checked before the transition table; the table still applies afterwards.
pub trait TransitionPolicy: Send + Sync {
    fn authorize(
        &self,
        actor: &ActorContext,
        from: OperationalStatus,
        to: OperationalStatus,
    ) -> Result<(), ModuleError>;
}

/// Allows every actor to trigger every transition
#[derive(Debug, Clone, Copy, Default)]
pub struct PermitAllTransitions;

impl TransitionPolicy for PermitAllTransitions {
    fn authorize(
        &self,
        _actor: &ActorContext,
        _from: OperationalStatus,
        _to: OperationalStatus,
    ) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// Platform administrators and the system may trigger anything; tenant
/// administrators are limited to self-service moves.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleTransitionPolicy;

impl RoleTransitionPolicy {
    fn tenant_may_trigger(from: OperationalStatus, to: OperationalStatus) -> bool {
        use OperationalStatus::*;
        matches!(
            (from, to),
            (Requested, PendingApproval)
                | (Requested, Disabled)
                | (Enabled, Suspended)
                | (UpToDate, Suspended)
                | (Suspended, Enabled)
                | (Enabled, Disabled)
                | (UpToDate, Disabled)
                | (Suspended, Disabled)
        )
    }
}

impl TransitionPolicy for RoleTransitionPolicy {
    fn authorize(
        &self,
        actor: &ActorContext,
        from: OperationalStatus,
        to: OperationalStatus,
    ) -> Result<(), ModuleError> {
        match actor.role {
            ActorRole::PlatformAdmin | ActorRole::System => Ok(()),
            ActorRole::TenantAdmin if Self::tenant_may_trigger(from, to) => Ok(()),
            ActorRole::TenantAdmin => Err(ModuleError::PermissionDenied(format!(
                "{} may not move an assignment from {} to {}",
                actor.actor_id, from, to
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: ActorRole) -> ActorContext {
        ActorContext::new("acme", "jane", role)
    }

    #[test]
    fn test_only_concurrent_modification_is_retryable() {
        assert!(ModuleError::ConcurrentModification("row".into()).is_retryable());
        assert!(!ModuleError::NotFound("alerts".into()).is_retryable());
        assert!(!ModuleError::InvalidTransition {
            from: OperationalStatus::Provisioning,
            to: OperationalStatus::Disabled,
        }
        .is_retryable());
    }

    #[test]
    fn test_role_policy_limits_tenant_admins() {
        use OperationalStatus::*;
        let policy = RoleTransitionPolicy;

        assert!(policy
            .authorize(&actor(ActorRole::TenantAdmin), Suspended, Enabled)
            .is_ok());
        assert!(matches!(
            policy.authorize(&actor(ActorRole::TenantAdmin), PendingApproval, Provisioning),
            Err(ModuleError::PermissionDenied(_))
        ));
        assert!(policy
            .authorize(&actor(ActorRole::PlatformAdmin), PendingApproval, Provisioning)
            .is_ok());
    }

    #[test]
    fn test_config_validation_message_lists_every_problem() {
        let err = ModuleError::ConfigValidation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Config validation failed: a; b");
    }
}
