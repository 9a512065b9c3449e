//! Tenant Module Engine - module lifecycle and resolution for a multi-tenant admin console
//!
//! This crate keeps the catalog of reusable feature modules, their interchangeable
//! implementation variants and the per-tenant assignments that decide which
//! tenant runs which module in which operational state.
//!
//! ## Components
//!
//! 1. Catalog store (modules and variants, soft delete, archive markers)
//! 2. Status state machine (the only path to an assignment's status)
//! 3. Resolution engine (tenant + slug -> variant + merged config)
//! 4. Lifecycle manager (archive/restore cascades, backup retention sweep)
//! 5. Optimistic mutation coordinator (apply locally, reconcile with the server)
//!
//! ## Design Principles
//!
//! 1. **Reads never lock**: resolution is a pure read over the store
//! 2. **Single-row writes**: every assignment change is a compare-and-swap
//! 3. **Resumable cascades**: each cascade step is idempotent
//! 4. **Sinks never fail callers**: audit and notification errors are logged and dropped

pub mod config;
pub mod engine;
pub mod module;
pub mod storage;
pub mod utils;

pub use config::EngineConfig;
pub use engine::{ModuleEngine, ModuleEngineBuilder};
pub use module::{ModuleError, OperationalStatus};
