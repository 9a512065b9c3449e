//! Audit and notification sinks
//!
//! Concrete `AuditSink`, `NotificationSink` and `AdminDirectory`
//! implementations, plus the `SinkDispatcher` the engine writes through. Sink
//! failures never fail the operation that triggered them: they are turned
//! into `ModuleError::DependencySink`, logged, and dropped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::module::traits::{AdminDirectory, AuditEvent, AuditSink, ModuleError, NotificationSink};
use crate::module::types::ActorContext;
use crate::utils::{Clock, TtlCache};

/// Audited actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    ModuleCreated,
    ModuleDeleted,
    VariantAdded,
    VariantRemoved,
    ModuleArchived,
    ModuleRestored,
    AssignmentRequested,
    AssignmentStatusChanged,
    AssignmentConfigUpdated,
    AssignmentVisibilityChanged,
    AssignmentImplementationChanged,
    BackupsCleaned,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::ModuleCreated => "MODULE_CREATED",
            AuditAction::ModuleDeleted => "MODULE_DELETED",
            AuditAction::VariantAdded => "VARIANT_ADDED",
            AuditAction::VariantRemoved => "VARIANT_REMOVED",
            AuditAction::ModuleArchived => "MODULE_ARCHIVED",
            AuditAction::ModuleRestored => "MODULE_RESTORED",
            AuditAction::AssignmentRequested => "ASSIGNMENT_REQUESTED",
            AuditAction::AssignmentStatusChanged => "ASSIGNMENT_STATUS_CHANGED",
            AuditAction::AssignmentConfigUpdated => "ASSIGNMENT_CONFIG_UPDATED",
            AuditAction::AssignmentVisibilityChanged => "ASSIGNMENT_VISIBILITY_CHANGED",
            AuditAction::AssignmentImplementationChanged => "ASSIGNMENT_IMPLEMENTATION_CHANGED",
            AuditAction::BackupsCleaned => "BACKUPS_CLEANED",
        }
    }
}

/// Writes audit events to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record_event(&self, event: AuditEvent) -> anyhow::Result<()> {
        info!(
            target: "audit",
            actor = %event.actor,
            tenant = %event.tenant_id,
            action = %event.action_type,
            resource_type = %event.resource_type,
            resource_id = %event.resource_id,
            details = %event.details,
            "audit event"
        );
        Ok(())
    }
}

/// Keeps audit events in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events with the given action type
    pub fn events_of(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.action_type == action.as_str())
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record_event(&self, event: AuditEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("Audit sink lock poisoned"))?
            .push(event);
        Ok(())
    }
}

/// A delivered notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipients: Vec<String>,
    pub message: String,
    pub metadata: Value,
}

/// Writes notifications to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(
        &self,
        recipients: &[String],
        message: &str,
        metadata: Value,
    ) -> anyhow::Result<()> {
        info!(
            "Notification for {} recipient(s): {} ({})",
            recipients.len(),
            message,
            metadata
        );
        Ok(())
    }
}

/// Keeps notifications in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryNotificationSink {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn notify(
        &self,
        recipients: &[String],
        message: &str,
        metadata: Value,
    ) -> anyhow::Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("Notification sink lock poisoned"))?
            .push(Notification {
                recipients: recipients.to_vec(),
                message: message.to_string(),
                metadata,
            });
        Ok(())
    }
}

/// Posts notifications to an HTTP endpoint
#[cfg(feature = "webhook")]
pub struct WebhookNotificationSink {
    client: reqwest::Client,
    webhook_url: String,
}

#[cfg(feature = "webhook")]
impl WebhookNotificationSink {
    pub fn new(webhook_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        info!("Notification webhook initialized: {}", webhook_url);
        Self {
            client,
            webhook_url,
        }
    }
}

#[cfg(feature = "webhook")]
#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify(
        &self,
        recipients: &[String],
        message: &str,
        metadata: Value,
    ) -> anyhow::Result<()> {
        let payload = serde_json::json!({
            "recipients": recipients,
            "message": message,
            "metadata": metadata,
        });

        // Fire and forget: delivery must not hold up the sweep
        let client = self.client.clone();
        let url = self.webhook_url.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Notification webhook delivered to {}", url);
                }
                Ok(response) => {
                    warn!(
                        "Notification webhook returned error status {} from {}",
                        response.status(),
                        url
                    );
                }
                Err(e) => {
                    warn!("Failed to send notification webhook to {}: {}", url, e);
                }
            }
        });
        Ok(())
    }
}

/// Fixed administrator list
#[derive(Debug, Clone, Default)]
pub struct StaticAdminDirectory {
    administrators: Vec<String>,
}

impl StaticAdminDirectory {
    pub fn new(administrators: Vec<String>) -> Self {
        Self { administrators }
    }
}

#[async_trait]
impl AdminDirectory for StaticAdminDirectory {
    async fn administrators(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.administrators.clone())
    }
}

/// Routes audit events and notifications to their sinks
///
/// Administrator recipients are cached for `recipients_ttl_secs`.
pub struct SinkDispatcher {
    audit: Arc<dyn AuditSink>,
    notifications: Arc<dyn NotificationSink>,
    directory: Arc<dyn AdminDirectory>,
    recipients: TtlCache<&'static str, Vec<String>>,
    clock: Arc<dyn Clock>,
}

const ADMINISTRATORS_KEY: &str = "administrators";

impl SinkDispatcher {
    pub fn new(
        audit: Arc<dyn AuditSink>,
        notifications: Arc<dyn NotificationSink>,
        directory: Arc<dyn AdminDirectory>,
        recipients_ttl_secs: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            audit,
            notifications,
            directory,
            recipients: TtlCache::new(recipients_ttl_secs, Arc::clone(&clock)),
            clock,
        }
    }

    /// Record an audit event; failures are logged and swallowed
    pub async fn audit(
        &self,
        actor: &ActorContext,
        action: AuditAction,
        resource_type: &str,
        resource_id: &str,
        details: Value,
    ) {
        let event = AuditEvent {
            actor: actor.actor_id.clone(),
            tenant_id: actor.tenant_id.clone(),
            action_type: action.as_str().to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            details,
            recorded_at: self.clock.now(),
        };
        if let Err(e) = self.audit.record_event(event).await {
            let err = ModuleError::DependencySink(format!("audit {}: {}", action.as_str(), e));
            warn!("{}", err);
        }
    }

    /// Notify every administrator; failures are logged and swallowed
    pub async fn notify_administrators(&self, message: &str, metadata: Value) {
        let recipients = match self
            .recipients
            .get_or_try_insert_with(ADMINISTRATORS_KEY, || self.directory.administrators())
            .await
        {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!(
                    "{}",
                    ModuleError::DependencySink(format!("administrator lookup: {}", e))
                );
                return;
            }
        };

        if recipients.is_empty() {
            debug!("No administrators configured, skipping notification: {}", message);
            return;
        }

        if let Err(e) = self
            .notifications
            .notify(&recipients, message, metadata)
            .await
        {
            warn!(
                "{}",
                ModuleError::DependencySink(format!("notification: {}", e))
            );
        }
    }
}
