//! Assignment operational status state machine
//!
//! Pure validation: the allowed-transition table, the "active" predicate and
//! parsing. Every write to `TenantAssignment.status` goes through
//! `validate_transition`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::module::traits::ModuleError;

/// Operational status of a tenant assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationalStatus {
    Requested,
    PendingApproval,
    Provisioning,
    Enabled,
    Upgrading,
    UpToDate,
    Suspended,
    Disabled,
    Archived,
    Error,
}

impl OperationalStatus {
    pub const ALL: [OperationalStatus; 10] = [
        OperationalStatus::Requested,
        OperationalStatus::PendingApproval,
        OperationalStatus::Provisioning,
        OperationalStatus::Enabled,
        OperationalStatus::Upgrading,
        OperationalStatus::UpToDate,
        OperationalStatus::Suspended,
        OperationalStatus::Disabled,
        OperationalStatus::Archived,
        OperationalStatus::Error,
    ];

    /// Status a freshly requested assignment starts in
    pub const INITIAL: OperationalStatus = OperationalStatus::Requested;

    /// States reachable in exactly one step
    pub fn allowed_targets(self) -> &'static [OperationalStatus] {
        use OperationalStatus::*;
        match self {
            Requested => &[PendingApproval, Disabled],
            PendingApproval => &[Provisioning, Disabled],
            Provisioning => &[Enabled, Error],
            Enabled => &[UpToDate, Upgrading, Suspended, Disabled, Error],
            UpToDate => &[Upgrading, Suspended, Disabled, Error],
            Upgrading => &[UpToDate, Error],
            Suspended => &[Enabled, Disabled],
            Disabled => &[Enabled, Archived],
            Error => &[Provisioning, Disabled],
            Archived => &[Disabled],
        }
    }

    pub fn can_transition_to(self, next: OperationalStatus) -> bool {
        self.allowed_targets().contains(&next)
    }

    /// Whether a tenant in this state receives the module's functionality
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OperationalStatus::Enabled | OperationalStatus::Upgrading | OperationalStatus::UpToDate
        )
    }

    pub fn as_str(self) -> &'static str {
        use OperationalStatus::*;
        match self {
            Requested => "REQUESTED",
            PendingApproval => "PENDING_APPROVAL",
            Provisioning => "PROVISIONING",
            Enabled => "ENABLED",
            Upgrading => "UPGRADING",
            UpToDate => "UP_TO_DATE",
            Suspended => "SUSPENDED",
            Disabled => "DISABLED",
            Archived => "ARCHIVED",
            Error => "ERROR",
        }
    }
}

/// Check a single-step transition. Self-loops are rejected.
pub fn validate_transition(
    current: OperationalStatus,
    next: OperationalStatus,
) -> Result<(), ModuleError> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(ModuleError::InvalidTransition {
            from: current,
            to: next,
        })
    }
}

impl fmt::Display for OperationalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationalStatus {
    type Err = ModuleError;

    /// Case-insensitive; accepts `-` in place of `_`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        OperationalStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ModuleError::InvalidInput(format!("Unknown status: {}", s)))
    }
}
