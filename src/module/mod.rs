//! Module lifecycle and resolution
//!
//! The catalog of reusable feature modules and their implementation variants,
//! per-tenant assignments driven by an operational status machine, request-time
//! variant resolution, archive/restore cascades with retention-bound backups,
//! and client-side optimistic mutation reconciliation.
//!
//! ## Layout
//!
//! - **status**: the assignment state machine
//! - **catalog / assignment**: administration over modules, variants and assignments
//! - **resolver**: pure reads deciding which variant a tenant receives
//! - **manager**: archive/restore cascades and the backup retention sweep
//! - **optimistic**: apply-then-reconcile mutations for interactive callers
//! - **sinks**: audit and notification delivery, never fatal to the caller

pub mod assignment;
pub mod catalog;
pub mod manager;
pub mod optimistic;
pub mod registry;
pub mod resolver;
pub mod sinks;
pub mod status;
pub mod traits;
pub mod types;
pub mod validation;

pub use assignment::AssignmentService;
pub use catalog::{CatalogService, ImportReport};
pub use manager::{LifecycleManager, SweepStats};
pub use optimistic::{
    LocalView, MutationCommand, MutationCoordinator, MutationHandle, MutationOutcome,
};
pub use registry::{
    AudiencePolicy, CatalogManifest, ConfiguredAudiencePolicy, ImplementationDescriptor,
    ImplementationRegistry,
};
pub use resolver::{merge_config, ResolutionEngine};
pub use sinks::{AuditAction, SinkDispatcher};
pub use status::{validate_transition, OperationalStatus};
pub use traits::{
    AdminDirectory, AuditEvent, AuditSink, ModuleError, NotificationSink, PermitAllTransitions,
    RoleTransitionPolicy, TransitionPolicy,
};
pub use types::*;
