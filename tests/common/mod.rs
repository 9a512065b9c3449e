//! Shared fixture for integration tests
#![allow(dead_code)]

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tenant_module_engine::config::{DatabaseBackendConfig, EngineConfig, StorageConfig};
use tenant_module_engine::module::sinks::{
    MemoryAuditSink, MemoryNotificationSink, StaticAdminDirectory,
};
use tenant_module_engine::module::types::{
    ActorContext, ActorRole, BaseModule, ImplementationVariant, NewModule, NewVariant,
};
use tenant_module_engine::module::OperationalStatus;
use tenant_module_engine::storage::database::{create_database, Database, DatabaseBackend, Tree};
use tenant_module_engine::storage::catalog::CatalogStore;
use tenant_module_engine::storage::Storage;
use tenant_module_engine::utils::ManualClock;
use tenant_module_engine::ModuleEngine;

pub const START: u64 = 1_700_000_000;
pub const DAY: u64 = 24 * 60 * 60;

pub fn memory_config() -> EngineConfig {
    EngineConfig {
        storage: StorageConfig {
            database_backend: DatabaseBackendConfig::Memory,
            data_dir: String::new(),
        },
        ..Default::default()
    }
}

pub fn admin() -> ActorContext {
    ActorContext::new("platform", "ops@example.com", ActorRole::PlatformAdmin)
}

/// Engine over the in-memory backend with a manual clock and recording sinks
pub struct TestEngine {
    pub engine: Arc<ModuleEngine>,
    pub clock: Arc<ManualClock>,
    pub audit: MemoryAuditSink,
    pub notifications: MemoryNotificationSink,
    pub faults: FaultInjector,
    /// Direct access to catalog rows, for states no engine operation produces
    pub catalog: Arc<CatalogStore>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(memory_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let audit = MemoryAuditSink::new();
        let notifications = MemoryNotificationSink::new();
        let faults = FaultInjector::default();

        let db = FaultyDatabase::new(faults.clone()).expect("memory database");
        let storage = Storage::from_database(Arc::new(db)).expect("storage");
        let catalog = storage.catalog();
        let engine = ModuleEngine::builder(config)
            .storage(storage)
            .clock(clock.clone())
            .audit_sink(Arc::new(audit.clone()))
            .notification_sink(Arc::new(notifications.clone()))
            .admin_directory(Arc::new(StaticAdminDirectory::new(vec![
                "admin@example.com".to_string(),
            ])))
            .build()
            .expect("engine");

        Self {
            engine: Arc::new(engine),
            clock,
            audit,
            notifications,
            faults,
            catalog,
        }
    }

    /// Create a module with one variant per `(implementation_key, default_config)`
    pub async fn seed_module(
        &self,
        slug: &str,
        variants: &[(&str, Value)],
    ) -> (BaseModule, Vec<ImplementationVariant>) {
        let module = self
            .engine
            .create_module(
                NewModule {
                    slug: slug.to_string(),
                    name: slug.to_uppercase(),
                    category: "operations".to_string(),
                },
                &admin(),
            )
            .await
            .expect("create module");

        let mut created = Vec::new();
        for (key, config) in variants {
            let variant = self
                .engine
                .add_variant(
                    &module.id,
                    NewVariant::new(*key, format!("{}/{}", slug, key))
                        .with_default_config(config.clone()),
                    &admin(),
                )
                .await
                .expect("add variant");
            created.push(variant);
        }
        (module, created)
    }

    /// Request a module for a tenant and walk it to ENABLED
    pub async fn enable(&self, tenant_id: &str, module: &BaseModule) {
        self.engine
            .request_assignment(tenant_id, &module.slug, None, &admin())
            .await
            .expect("request assignment");
        for status in [
            OperationalStatus::PendingApproval,
            OperationalStatus::Provisioning,
            OperationalStatus::Enabled,
        ] {
            self.engine
                .update_assignment_status(tenant_id, &module.id, status, &admin())
                .await
                .expect("status step");
        }
    }
}

/// Makes writes to one tree fail after a number of successful writes
#[derive(Clone, Default)]
pub struct FaultInjector {
    /// tree name -> writes still allowed
    budgets: Arc<Mutex<HashMap<String, usize>>>,
}

impl FaultInjector {
    /// Allow `allowed` more writes to `tree`, then fail every write
    pub fn fail_writes_after(&self, tree: &str, allowed: usize) {
        self.budgets.lock().unwrap().insert(tree.to_string(), allowed);
    }

    pub fn clear(&self) {
        self.budgets.lock().unwrap().clear();
    }

    fn check_write(&self, tree: &str) -> Result<()> {
        let mut budgets = self.budgets.lock().unwrap();
        match budgets.get_mut(tree) {
            Some(0) => Err(anyhow::anyhow!("injected write failure on {}", tree)),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// In-memory database whose trees consult a `FaultInjector` before writing
pub struct FaultyDatabase {
    inner: Box<dyn Database>,
    faults: FaultInjector,
}

impl FaultyDatabase {
    pub fn new(faults: FaultInjector) -> Result<Self> {
        Ok(Self {
            inner: create_database("", DatabaseBackend::Memory)?,
            faults,
        })
    }
}

impl Database for FaultyDatabase {
    fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
        Ok(Box::new(FaultyTree {
            name: name.to_string(),
            inner: self.inner.open_tree(name)?,
            faults: self.faults.clone(),
        }))
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}

struct FaultyTree {
    name: String,
    inner: Box<dyn Tree>,
    faults: FaultInjector,
}

impl Tree for FaultyTree {
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.faults.check_write(&self.name)?;
        self.inner.insert(key, value)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.faults.check_write(&self.name)?;
        self.inner.remove(key)
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        self.inner.contains_key(key)
    }

    fn len(&self) -> Result<usize> {
        self.inner.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
        self.inner.iter()
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
        self.inner.scan_prefix(prefix)
    }

    fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool> {
        self.faults.check_write(&self.name)?;
        self.inner.compare_and_swap(key, expected, new)
    }
}
